//! robots.txt fetching and enforcement.
//!
//! One fetch per host (TTL-cached). A missing, failing, or non-200
//! robots.txt allows everything.

use moka::future::Cache;
use robotstxt::DefaultMatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const ROBOTS_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
pub struct RobotsRecord {
    pub body: String,
    pub crawl_delay: Option<f64>,
}

pub struct RobotsGate {
    client: reqwest::Client,
    user_agent: String,
    cache: Cache<String, Arc<RobotsRecord>>,
}

impl RobotsGate {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Cache::builder().time_to_live(ROBOTS_CACHE_TTL).build(),
        }
    }

    /// Fetch (or reuse) the robots.txt record for a host.
    pub async fn load(&self, host: &str) -> Arc<RobotsRecord> {
        let client = self.client.clone();
        let host_owned = host.to_string();
        self.cache
            .get_with(host_owned.clone(), async move {
                let body = fetch_robots_txt(&client, &host_owned).await;
                let crawl_delay = parse_crawl_delay(&body);
                debug!(host = %host_owned, ?crawl_delay, bytes = body.len(), "robots.txt loaded");
                Arc::new(RobotsRecord { body, crawl_delay })
            })
            .await
    }

    /// Whether the configured user agent may fetch `url`.
    pub async fn can_fetch(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        else {
            return false;
        };
        let record = self.load(&host).await;
        allowed_by(&record.body, &self.user_agent, url)
    }

    /// `Crawl-delay` directive for a host, if present.
    pub async fn crawl_delay(&self, host: &str) -> Option<f64> {
        self.load(host).await.crawl_delay
    }
}

/// Pure matcher over a robots.txt body. Empty body allows everything.
pub fn allowed_by(robots_body: &str, user_agent: &str, url: &str) -> bool {
    let mut matcher = DefaultMatcher::default();
    matcher.one_agent_allowed_by_robots(robots_body, user_agent, url)
}

async fn fetch_robots_txt(client: &reqwest::Client, host: &str) -> String {
    let robots_url = format!("https://{host}/robots.txt");
    let response = match client
        .get(&robots_url)
        .timeout(ROBOTS_FETCH_TIMEOUT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(host = %host, error = %e, "robots.txt fetch failed, allowing all");
            return String::new();
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        debug!(host = %host, status = %response.status(), "robots.txt not found, allowing all");
        return String::new();
    }

    response.text().await.unwrap_or_default()
}

fn parse_crawl_delay(robots_body: &str) -> Option<f64> {
    for line in robots_body.lines() {
        let line = line.trim().to_lowercase();
        if let Some(rest) = line.strip_prefix("crawl-delay:") {
            if let Ok(delay) = rest.trim().parse::<f64>() {
                if delay > 0.0 {
                    return Some(delay);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "User-agent: *\nCrawl-delay: 2.5\nDisallow: /admin\n";

    #[test]
    fn crawl_delay_parsing() {
        assert_eq!(parse_crawl_delay(SAMPLE), Some(2.5));
        assert_eq!(parse_crawl_delay(""), None);
        assert_eq!(parse_crawl_delay("Crawl-delay: nope"), None);
        assert_eq!(parse_crawl_delay("Crawl-delay: -1"), None);
    }

    #[test]
    fn empty_body_allows_everything() {
        assert!(allowed_by("", "SiteAuditBot", "https://example.com/anything"));
    }

    #[test]
    fn disallow_rules_are_enforced() {
        assert!(!allowed_by(SAMPLE, "SiteAuditBot", "https://example.com/admin/settings"));
        assert!(allowed_by(SAMPLE, "SiteAuditBot", "https://example.com/blog"));
    }

    #[test]
    fn agent_specific_rules() {
        let body = "User-agent: SiteAuditBot\nDisallow: /private\n\nUser-agent: *\nDisallow:\n";
        assert!(!allowed_by(body, "SiteAuditBot", "https://example.com/private"));
        assert!(allowed_by(body, "OtherBot", "https://example.com/private"));
    }
}
