//! URL canonicalization for frontier deduplication.
//!
//! Normalization is idempotent and total: every input maps to either one
//! canonical URL string or a reject (`None`).

use url::Url;

/// Tracking parameters stripped during normalization.
const IGNORED_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "ref",
    "fbclid",
    "gclid",
];

/// Binary and asset extensions that are never worth fetching.
const IGNORED_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".css", ".js", ".woff", ".woff2",
    ".ttf", ".zip", ".tar", ".gz", ".mp4", ".mp3", ".wav",
];

/// Normalize `url` relative to `base`. Returns `None` when the URL should be
/// skipped entirely (non-HTTP scheme, asset extension, unparseable).
pub fn normalize(url: &str, base: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let mut resolved = base.join(url.trim()).ok()?;

    // The url crate lowercases scheme and host during parsing.
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    let path_lower = resolved.path().to_lowercase();
    if IGNORED_EXTENSIONS
        .iter()
        .any(|ext| path_lower.ends_with(ext))
    {
        return None;
    }

    resolved.set_fragment(None);

    // Strip tracking parameters, re-encoding the survivors in input order.
    if resolved.query().is_some() {
        let kept: Vec<(String, String)> = resolved
            .query_pairs()
            .filter(|(k, _)| !IGNORED_PARAMS.contains(&k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            resolved.set_query(None);
        } else {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish();
            resolved.set_query(Some(&encoded));
        }
    }

    // Trim a single trailing slash unless the path is just "/".
    let path = resolved.path();
    if path != "/" && path.ends_with('/') {
        let trimmed = path[..path.len() - 1].to_string();
        resolved.set_path(&trimmed);
    }

    Some(resolved.to_string())
}

/// Stable 128-bit hex fingerprint of a (normalized) URL.
pub fn fingerprint(url: &str) -> String {
    format!("{:032x}", xxhash_rust::xxh3::xxh3_128(url.as_bytes()))
}

/// Stable 128-bit hex fingerprint of a page body, for duplicate-content
/// detection.
pub fn content_fingerprint(html: &str) -> String {
    format!("{:032x}", xxhash_rust::xxh3::xxh3_128(html.as_bytes()))
}

/// True when `url`'s host is the root domain or any subdomain of it.
pub fn same_domain(url: &str, root_domain: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    host == root_domain || host.ends_with(&format!(".{root_domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_url() {
        assert_eq!(
            normalize("/about", "https://example.com/"),
            Some("https://example.com/about".to_string())
        );
    }

    #[test]
    fn removes_fragment() {
        assert_eq!(
            normalize("https://example.com/page#section", "https://example.com"),
            Some("https://example.com/page".to_string())
        );
    }

    #[test]
    fn removes_tracking_params_keeps_others() {
        let result = normalize(
            "https://example.com/page?utm_source=google&id=123",
            "https://example.com",
        )
        .unwrap();
        assert!(!result.contains("utm_source"));
        assert!(result.contains("id=123"));
    }

    #[test]
    fn lowercases_host_and_strips_utm() {
        assert_eq!(
            normalize("/x?utm_source=g&id=1#frag", "https://EX.com/"),
            Some("https://ex.com/x?id=1".to_string())
        );
    }

    #[test]
    fn rejects_asset_extensions() {
        assert_eq!(normalize("https://example.com/doc.pdf", "https://example.com"), None);
        assert_eq!(normalize("/style.CSS", "https://example.com"), None);
        assert_eq!(normalize("/font.woff2", "https://example.com"), None);
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert_eq!(normalize("mailto:test@example.com", "https://example.com"), None);
        assert_eq!(normalize("javascript:void(0)", "https://example.com"), None);
        assert_eq!(normalize("ftp://example.com/file", "https://example.com"), None);
    }

    #[test]
    fn trims_single_trailing_slash() {
        assert_eq!(
            normalize("https://example.com/page/", "https://example.com"),
            Some("https://example.com/page".to_string())
        );
    }

    #[test]
    fn root_trailing_slash_preserved() {
        assert_eq!(
            normalize("https://example.com/", "https://example.com"),
            Some("https://example.com/".to_string())
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "/a/b/?utm_campaign=x&q=rust+crawler#top",
            "HTTPS://Example.COM/Page/",
            "/search?q=a%20b&ref=nav",
        ];
        for input in inputs {
            let once = normalize(input, "https://example.com/").unwrap();
            let twice = normalize(&once, "https://example.com/").unwrap();
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn same_domain_includes_subdomains() {
        assert!(same_domain("https://example.com/page", "example.com"));
        assert!(same_domain("https://sub.example.com/page", "example.com"));
        assert!(!same_domain("https://other.com/page", "example.com"));
        // Suffix match must respect the label boundary.
        assert!(!same_domain("https://notexample.com/", "example.com"));
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a1 = fingerprint("https://example.com/page");
        let a2 = fingerprint("https://example.com/page");
        let b = fingerprint("https://example.com/page2");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), 32);
    }
}
