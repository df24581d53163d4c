//! XML sitemap discovery.
//!
//! Probes the conventional sitemap locations, follows sitemap indexes up to
//! a bounded depth, and flattens everything into one deduplicated URL list.

use quick_xml::events::Event;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

const SITEMAP_CANDIDATES: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemap/sitemap.xml"];
const MAX_INDEX_DEPTH: u8 = 3;
const SITEMAP_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

pub struct SitemapDiscoverer {
    client: reqwest::Client,
}

impl SitemapDiscoverer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Probe the candidate sitemap paths under `root_url` and return every
    /// page URL found, deduplicated in discovery order.
    pub async fn discover(&self, root_url: &str) -> Vec<String> {
        let Ok(root) = Url::parse(root_url) else {
            return Vec::new();
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut urls: Vec<String> = Vec::new();

        // Worklist of (sitemap url, index depth); an entry from a
        // <sitemapindex> re-enters at depth + 1, bounded by MAX_INDEX_DEPTH.
        let mut pending: Vec<(String, u8)> = SITEMAP_CANDIDATES
            .iter()
            .filter_map(|path| root.join(path).ok())
            .map(|u| (u.to_string(), 0))
            .collect();
        let mut fetched: HashSet<String> = HashSet::new();

        while let Some((sitemap_url, depth)) = pending.pop() {
            if !fetched.insert(sitemap_url.clone()) {
                continue;
            }
            let Some(content) = self.fetch(&sitemap_url).await else {
                continue;
            };

            let locs = extract_locs(&content);
            if content.contains("<sitemapindex") {
                if depth < MAX_INDEX_DEPTH {
                    for loc in locs {
                        pending.push((loc, depth + 1));
                    }
                } else {
                    debug!(url = %sitemap_url, "sitemap index nesting too deep, skipping");
                }
            } else {
                for loc in locs {
                    if seen.insert(loc.clone()) {
                        urls.push(loc);
                    }
                }
            }
        }

        debug!(count = urls.len(), "sitemap discovery complete");
        urls
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .timeout(SITEMAP_FETCH_TIMEOUT)
            .send()
            .await
            .ok()?;
        if response.status() != reqwest::StatusCode::OK {
            return None;
        }
        response.text().await.ok()
    }
}

/// Pull every `<loc>` text out of a sitemap or sitemap-index document.
/// Malformed XML yields whatever was readable before the error.
fn extract_locs(content: &str) -> Vec<String> {
    let mut reader = quick_xml::Reader::from_str(content);
    let mut locs = Vec::new();
    let mut buf = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::Text(e)) if in_loc => {
                if let Ok(text) = e.decode() {
                    let text = text.trim();
                    if !text.is_empty() {
                        locs.push(text.to_string());
                    }
                }
                in_loc = false;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(error = %e, "sitemap XML parse error");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    locs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_urlset_locs() {
        let xml = r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc><priority>1.0</priority></url>
  <url><loc> https://example.com/about </loc></url>
</urlset>"#;
        let locs = extract_locs(xml);
        assert_eq!(
            locs,
            vec!["https://example.com/", "https://example.com/about"]
        );
    }

    #[test]
    fn extracts_sitemapindex_locs() {
        let xml = r#"<sitemapindex>
  <sitemap><loc>https://example.com/sitemap-posts.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemap-pages.xml</loc></sitemap>
</sitemapindex>"#;
        assert_eq!(extract_locs(xml).len(), 2);
    }

    #[test]
    fn malformed_xml_yields_partial_results() {
        let xml = "<urlset><url><loc>https://example.com/a</loc></url><url><lo";
        let locs = extract_locs(xml);
        assert_eq!(locs, vec!["https://example.com/a"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(extract_locs("").is_empty());
    }
}
