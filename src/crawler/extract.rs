//! HTML extraction into the normalized page model.
//!
//! Parse errors never propagate: anything unreadable just leaves the
//! corresponding field empty.

use scraper::{Html, Selector};
use tracing::debug;

use crate::core::types::{ImageInfo, PageData};

/// Link prefixes that are navigation noise, not crawlable URLs.
const SKIPPED_LINK_PREFIXES: &[&str] = &["#", "mailto:", "tel:", "javascript:"];

/// Tags whose subtrees are excluded from the extracted plain text.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "nav", "footer"];

/// Populate the extracted fields of `page` from an HTML body.
pub fn populate_page(page: &mut PageData, html: &str) {
    let document = Html::parse_document(html);

    extract_meta(page, &document);
    extract_canonical(page, &document);
    extract_links(page, &document);
    extract_images(page, &document);
    extract_structured_data(page, &document);
    page.text_content = extract_text(&document);
}

fn extract_meta(page: &mut PageData, document: &Html) {
    if let Ok(selector) = Selector::parse("meta") {
        for element in document.select(&selector) {
            let name = element
                .value()
                .attr("name")
                .or_else(|| element.value().attr("property"))
                .unwrap_or("");
            let content = element.value().attr("content").unwrap_or("");
            if !name.is_empty() && !content.is_empty() {
                page.meta.insert(name.to_lowercase(), content.to_string());
            }
        }
    }

    if let Ok(selector) = Selector::parse("title") {
        if let Some(element) = document.select(&selector).next() {
            let title = element.text().collect::<String>().trim().to_string();
            if !title.is_empty() {
                page.meta.insert("title".to_string(), title);
            }
        }
    }
}

fn extract_canonical(page: &mut PageData, document: &Html) {
    if let Ok(selector) = Selector::parse("link[rel=\"canonical\"]") {
        if let Some(element) = document.select(&selector).next() {
            if let Some(href) = element.value().attr("href") {
                let href = href.trim();
                if !href.is_empty() {
                    page.canonical_url = Some(href.to_string());
                }
            }
        }
    }
}

fn extract_links(page: &mut PageData, document: &Html) {
    let Ok(selector) = Selector::parse("a[href]") else {
        return;
    };
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || SKIPPED_LINK_PREFIXES
                .iter()
                .any(|prefix| href.starts_with(prefix))
        {
            continue;
        }
        page.links.push(href.to_string());
    }
}

fn extract_images(page: &mut PageData, document: &Html) {
    let Ok(selector) = Selector::parse("img") else {
        return;
    };
    for element in document.select(&selector) {
        let value = element.value();
        page.images.push(ImageInfo {
            src: value.attr("src").unwrap_or("").to_string(),
            alt: value.attr("alt").unwrap_or("").to_string(),
            width: value.attr("width").map(str::to_string),
            height: value.attr("height").map(str::to_string),
            loading: value.attr("loading").map(str::to_string),
        });
    }
}

fn extract_structured_data(page: &mut PageData, document: &Html) {
    let Ok(selector) = Selector::parse("script[type=\"application/ld+json\"]") else {
        return;
    };
    for script in document.select(&selector) {
        let json_text = script.inner_html();
        if json_text.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&json_text) {
            Ok(value) => page.structured_data.push(value),
            // Malformed JSON-LD blocks are common in the wild; skip quietly.
            Err(e) => debug!(error = %e, "skipping malformed JSON-LD block"),
        }
    }
}

/// Document text with script/style/nav/footer subtrees removed and all
/// whitespace collapsed to single spaces.
fn extract_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    collect_text(document.tree.root(), &mut parts);
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_text<'a>(node: ego_tree::NodeRef<'a, scraper::Node>, parts: &mut Vec<&'a str>) {
    if let Some(element) = node.value().as_element() {
        if NON_CONTENT_TAGS.contains(&element.name()) {
            return;
        }
    }
    if let Some(text) = node.value().as_text() {
        parts.push(text);
    }
    for child in node.children() {
        collect_text(child, parts);
    }
}
