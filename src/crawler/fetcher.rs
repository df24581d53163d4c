//! Page fetching: plain HTTP with manual redirect accounting, plus a
//! headless-render fallback for script-heavy pages.

use aho_corasick::AhoCorasick;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::core::types::PageData;
use crate::crawler::browser;
use crate::crawler::extract;

/// Markers that a page is driven by a client-side framework and needs a
/// real DOM to be meaningful.
const JS_INDICATORS: &[&str] = &[
    "application/javascript",
    "__NEXT_DATA__",
    "window.__data",
    "ng-version",
    "data-reactroot",
    "Vue.createApp",
    "nuxt",
];

const MAX_REDIRECT_HOPS: u32 = 10;

pub struct FetchOutcome {
    pub page: PageData,
    pub rendered: bool,
}

pub struct PageFetcher {
    client: reqwest::Client,
    user_agent: String,
    render_timeout_ms: u64,
    force_render: bool,
    js_markers: AhoCorasick,
}

impl PageFetcher {
    pub fn new(
        client: reqwest::Client,
        user_agent: impl Into<String>,
        render_timeout_ms: u64,
        force_render: bool,
    ) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            render_timeout_ms,
            force_render,
            js_markers: AhoCorasick::new(JS_INDICATORS).expect("JS indicator set builds"),
        }
    }

    /// Fetch one URL. Never fails: transport problems come back as a
    /// `PageData` with status 0 (failure), 408 (timeout) or 310 (redirect
    /// cycle).
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        if self.force_render {
            return match self.fetch_rendered(url).await {
                Some(page) => FetchOutcome {
                    page,
                    rendered: true,
                },
                None => FetchOutcome {
                    page: PageData::new(url, 0),
                    rendered: false,
                },
            };
        }

        let page = self.fetch_http(url).await;
        if self.needs_rendering(&page) {
            debug!(url = %url, "render heuristic triggered");
            if let Some(rendered) = self.fetch_rendered(url).await {
                return FetchOutcome {
                    page: rendered,
                    rendered: true,
                };
            }
            // Rendering is best-effort; keep the HTTP snapshot on failure.
        }
        FetchOutcome {
            page,
            rendered: false,
        }
    }

    /// Plain HTTP fetch. Redirects are followed manually so the hop count
    /// can be recorded on the resulting page (`meta["redirect_hops"]`).
    async fn fetch_http(&self, url: &str) -> PageData {
        let start = Instant::now();
        let mut current = url.to_string();
        let mut seen: HashSet<String> = HashSet::from([current.clone()]);
        let mut hops: u32 = 0;

        loop {
            let response = match self.client.get(&current).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    debug!(url = %current, "fetch timed out");
                    return PageData::new(current, 408);
                }
                Err(e) => {
                    warn!(url = %current, error = %e, "fetch failed");
                    return PageData::new(current, 0);
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let Some(location) = location else {
                    // Redirect without a target: treat as the terminal page.
                    return self.finalize(response, current, hops, start).await;
                };
                let next = match Url::parse(&current).and_then(|u| u.join(&location)) {
                    Ok(u) => u.to_string(),
                    Err(_) => return PageData::new(current, 0),
                };
                hops += 1;
                if hops > MAX_REDIRECT_HOPS || !seen.insert(next.clone()) {
                    debug!(url = %url, hops, "redirect cycle");
                    return PageData::new(url, 310);
                }
                current = next;
                continue;
            }

            return self.finalize(response, current, hops, start).await;
        }
    }

    async fn finalize(
        &self,
        response: reqwest::Response,
        final_url: String,
        hops: u32,
        start: Instant,
    ) -> PageData {
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %final_url, error = %e, "failed to read response body");
                return PageData::new(final_url, 0);
            }
        };

        let mut page = PageData::new(final_url, status);
        page.content_type = content_type;
        page.headers = headers;
        page.page_size_bytes = body.len();
        page.load_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        page.html = String::from_utf8_lossy(&body).to_string();
        if hops > 0 {
            page.meta
                .insert("redirect_hops".to_string(), hops.to_string());
        }

        if page.status_code == 200 && page.is_html() {
            let html = std::mem::take(&mut page.html);
            extract::populate_page(&mut page, &html);
            page.html = html;
        }
        page
    }

    async fn fetch_rendered(&self, url: &str) -> Option<PageData> {
        match browser::render_page(url, &self.user_agent, self.render_timeout_ms).await {
            Ok(rendered) => {
                let mut page = PageData::new(rendered.final_url, 200);
                page.content_type = "text/html".to_string();
                page.page_size_bytes = rendered.html.len();
                page.load_time_ms = rendered.load_time_ms;
                extract::populate_page(&mut page, &rendered.html);
                page.html = rendered.html;
                Some(page)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "headless render failed");
                None
            }
        }
    }

    /// Heuristic: does this page need a browser to produce meaningful HTML?
    fn needs_rendering(&self, page: &PageData) -> bool {
        // Only escalate successful fetches: rendering cannot observe the
        // original status code, and a failed connection will not improve.
        if page.status_code != 200 || page.html.is_empty() {
            return false;
        }

        if self.js_markers.is_match(&page.html) {
            return true;
        }

        // Thin markup: a big document with no paragraphs at all is almost
        // always an unhydrated application shell.
        if page.html.len() > 1000 {
            let document = Html::parse_document(&page.html);
            if let Ok(selector) = Selector::parse("p") {
                if document.select(&selector).next().is_none() {
                    return true;
                }
            }
        }
        false
    }
}
