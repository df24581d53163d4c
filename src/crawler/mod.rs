//! Concurrent BFS crawler.
//!
//! Flow: fetch robots.txt (honoring `Crawl-delay`), discover sitemaps, seed
//! the frontier, then expand it in batches. Each batch is processed
//! concurrently with a bounded in-flight count; the visited-set insert is
//! the dedup point, and a body-fingerprint set catches duplicate content
//! (first writer wins, later pages carry the flag).

pub mod browser;
pub mod extract;
pub mod fetcher;
pub mod rate_limit;
pub mod robots;
pub mod sitemap;
pub mod url_norm;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::types::{
    AuditResult, CrawlStats, DiscoverySource, EngineStatus, Issue, IssueCategory, PageData,
    Severity, SiteData,
};
use crate::core::types::grade_for_score;
use fetcher::PageFetcher;
use rate_limit::RateLimiter;
use robots::RobotsGate;
use sitemap::SitemapDiscoverer;

pub const ENGINE_NAME: &str = "crawler";

/// At most this many sitemap URLs are used to seed the frontier.
const SITEMAP_SEED_CAP: usize = 1000;

/// Issue samples are bounded regardless of how many pages are affected.
const MAX_SAMPLE_URLS: usize = 50;

#[derive(Debug, Clone)]
struct CrawlItem {
    url: String,
    depth: u32,
    #[allow(dead_code)]
    parent_url: Option<String>,
    source: DiscoverySource,
}

pub struct Crawler;

impl Crawler {
    /// Execute the crawl, populating `site_data.pages`, `sitemap_urls`,
    /// `robots_txt` and `crawl_stats`. Returns the crawlability result.
    pub async fn run(site_data: &mut SiteData) -> Result<AuditResult> {
        let config = site_data.settings.clone().sanitized();
        let start = Instant::now();

        // The crawl client skips TLS verification on purpose: enterprise
        // targets routinely serve broken chains and the audit must still
        // see their pages. The support client (robots, sitemaps) verifies.
        let crawl_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build crawl HTTP client")?;
        let support_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build support HTTP client")?;

        let fetcher = PageFetcher::new(
            crawl_client,
            config.user_agent.clone(),
            config.render_timeout_ms,
            config.js_render,
        );
        let robots_gate = RobotsGate::new(support_client.clone(), config.user_agent.clone());
        let rate_limiter = RateLimiter::for_rps(config.rate_limit_rps);

        // Robots first: the root host's record also drives the rate limit.
        let robots_record = robots_gate.load(&site_data.domain).await;
        site_data.robots_txt = robots_record.body.clone();
        if let Some(delay) = robots_record.crawl_delay {
            info!(delay, domain = %site_data.domain, "respecting crawl-delay");
            rate_limiter.set_rate(1.0 / delay).await;
        }

        let sitemap_urls = SitemapDiscoverer::new(support_client)
            .discover(&site_data.root_url)
            .await;
        info!(count = sitemap_urls.len(), "sitemap URLs discovered");
        site_data.sitemap_urls = sitemap_urls.clone();

        // Seed the frontier: sitemap URLs at depth 1, then the root itself.
        let mut seed: VecDeque<CrawlItem> = VecDeque::new();
        for surl in sitemap_urls.iter().take(SITEMAP_SEED_CAP) {
            if let Some(normalized) = url_norm::normalize(surl, &site_data.root_url) {
                seed.push_back(CrawlItem {
                    url: normalized,
                    depth: 1,
                    parent_url: None,
                    source: DiscoverySource::Sitemap,
                });
            }
        }
        seed.push_back(CrawlItem {
            url: site_data.root_url.clone(),
            depth: 0,
            parent_url: None,
            source: DiscoverySource::Manual,
        });

        let frontier: Mutex<VecDeque<CrawlItem>> = Mutex::new(seed);
        let visited: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let fingerprints: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let stats: Mutex<CrawlStats> = Mutex::new(CrawlStats {
            total_queued: frontier.lock().await.len(),
            sitemap_urls_found: sitemap_urls.len(),
            ..CrawlStats::default()
        });

        let mut crawled_pages: Vec<PageData> = Vec::new();
        let site_view: &SiteData = &*site_data;

        loop {
            let batch: Vec<CrawlItem> = {
                let mut queue = frontier.lock().await;
                if queue.is_empty() || crawled_pages.len() >= config.max_pages {
                    break;
                }
                let take = (config.concurrency * 2)
                    .min(queue.len())
                    .min(config.max_pages - crawled_pages.len());
                queue.drain(..take).collect()
            };

            let results: Vec<Option<PageData>> = stream::iter(batch)
                .map(|item| {
                    process_item(
                        item, site_view, &config, &fetcher, &robots_gate, &rate_limiter,
                        &frontier, &visited, &fingerprints, &stats,
                    )
                })
                .buffer_unordered(config.concurrency)
                .collect()
                .await;

            for page in results.into_iter().flatten() {
                crawled_pages.push(page);
            }
        }

        let mut crawl_stats = stats.into_inner();
        crawl_stats.elapsed_seconds = start.elapsed().as_secs_f64();
        crawl_stats.pages_per_second = if crawl_stats.elapsed_seconds > 0.0 {
            crawl_stats.total_crawled as f64 / crawl_stats.elapsed_seconds
        } else {
            0.0
        };
        info!(
            crawled = crawl_stats.total_crawled,
            failed = crawl_stats.total_failed,
            skipped = crawl_stats.total_skipped,
            pps = format!("{:.2}", crawl_stats.pages_per_second),
            "crawl complete"
        );

        site_data.pages = crawled_pages;
        site_data.crawl_stats = crawl_stats.clone();

        let issues = analyze_crawl_issues(&site_data.pages);
        let score = calculate_crawl_score(&site_data.pages, &issues);

        Ok(AuditResult {
            engine_name: ENGINE_NAME.to_string(),
            audit_id: site_data.audit_id,
            status: EngineStatus::Success,
            category: IssueCategory::Crawlability,
            score,
            grade: grade_for_score(score).to_string(),
            issues,
            recommendations: Vec::new(),
            metadata: serde_json::to_value(&crawl_stats)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            pages_analyzed: site_data.pages.len(),
            error_message: None,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_item(
    item: CrawlItem,
    site_data: &SiteData,
    config: &crate::core::config::AuditConfig,
    fetcher: &PageFetcher,
    robots_gate: &RobotsGate,
    rate_limiter: &RateLimiter,
    frontier: &Mutex<VecDeque<CrawlItem>>,
    visited: &Mutex<HashSet<String>>,
    fingerprints: &Mutex<HashSet<String>>,
    stats: &Mutex<CrawlStats>,
) -> Option<PageData> {
    let normalized = url_norm::normalize(&item.url, &site_data.root_url)?;

    if !url_norm::same_domain(&normalized, &site_data.domain) {
        return None;
    }

    // Linearization point for dedup: first inserter proceeds.
    if !visited.lock().await.insert(normalized.clone()) {
        return None;
    }

    if item.depth > config.max_depth {
        stats.lock().await.total_skipped += 1;
        return None;
    }

    if !robots_gate.can_fetch(&normalized).await {
        debug!(url = %normalized, "blocked by robots.txt");
        stats.lock().await.total_skipped += 1;
        return None;
    }

    rate_limiter.acquire().await;

    let outcome = fetcher.fetch(&normalized).await;
    let mut page = outcome.page;
    page.depth = item.depth;

    {
        let mut s = stats.lock().await;
        s.total_crawled += 1;
        if outcome.rendered {
            s.js_rendered += 1;
        }
        if page.status_code == 0 {
            s.total_failed += 1;
        }
        if s.total_crawled % 100 == 0 {
            info!(
                crawled = s.total_crawled,
                queued = s.total_queued,
                source = ?item.source,
                "crawl progress"
            );
        }
    }

    // Duplicate-content detection: the first page to write a fingerprint
    // is canonical, later identical bodies get flagged.
    if !page.html.is_empty() {
        let fp = url_norm::content_fingerprint(&page.html);
        let mut set = fingerprints.lock().await;
        if !set.insert(fp) {
            page.meta
                .insert("is_duplicate_content".to_string(), "true".to_string());
        }
    }

    if item.depth < config.max_depth {
        let links: Vec<String> = page.links.clone();
        let mut queue = frontier.lock().await;
        let seen = visited.lock().await;
        let mut s = stats.lock().await;
        for link in links {
            // Resolve against the final URL the page was actually served at.
            let Some(link_normalized) = url_norm::normalize(&link, &page.url) else {
                continue;
            };
            if !url_norm::same_domain(&link_normalized, &site_data.domain) {
                continue;
            }
            if seen.contains(&link_normalized) {
                continue;
            }
            // Growth cap against pathological link explosions.
            if queue.len() + seen.len() >= config.max_pages * 2 {
                break;
            }
            queue.push_back(CrawlItem {
                url: link_normalized,
                depth: item.depth + 1,
                parent_url: Some(normalized.clone()),
                source: DiscoverySource::Link,
            });
            s.total_queued += 1;
        }
    }

    if page.status_code == 0 {
        warn!(url = %page.url, "page fetch failed");
    }
    Some(page)
}

// ---------------------------------------------------------------------------
// Crawl-level issues
// ---------------------------------------------------------------------------

fn sample_urls<'a>(pages: impl Iterator<Item = &'a PageData>) -> Vec<String> {
    pages.take(MAX_SAMPLE_URLS).map(|p| p.url.clone()).collect()
}

fn crawl_issue(
    rule_id: &str,
    title: &str,
    description: String,
    severity: Severity,
    affected: Vec<&PageData>,
    impact_factor: f64,
    impact_ceiling: f64,
    recommendation: &str,
) -> Issue {
    Issue {
        rule_id: rule_id.to_string(),
        title: title.to_string(),
        description,
        severity,
        category: IssueCategory::Crawlability,
        affected_urls: sample_urls(affected.iter().copied()),
        affected_count: affected.len(),
        impact_score: (affected.len() as f64 * impact_factor).clamp(0.0, impact_ceiling),
        effort_score: 5.0,
        recommendation: recommendation.to_string(),
        documentation_url: String::new(),
        metadata: serde_json::Map::new(),
    }
}

/// Analyze crawled pages for crawlability and indexation issues.
pub fn analyze_crawl_issues(pages: &[PageData]) -> Vec<Issue> {
    let mut issues = Vec::new();

    let error_4xx: Vec<&PageData> = pages
        .iter()
        .filter(|p| (400..500).contains(&p.status_code))
        .collect();
    if !error_4xx.is_empty() {
        issues.push(crawl_issue(
            "crawl-4xx-pages",
            "Pages returning 4xx errors",
            format!("{} pages return client error status codes.", error_4xx.len()),
            Severity::High,
            error_4xx,
            2.0,
            100.0,
            "Fix or redirect broken URLs. Use 301 redirects for permanently moved content.",
        ));
    }

    let error_5xx: Vec<&PageData> = pages.iter().filter(|p| p.status_code >= 500).collect();
    if !error_5xx.is_empty() {
        issues.push(crawl_issue(
            "crawl-5xx-pages",
            "Pages returning 5xx server errors",
            format!("{} pages return server error status codes.", error_5xx.len()),
            Severity::Critical,
            error_5xx,
            3.0,
            100.0,
            "Investigate server errors immediately. These pages are unindexable.",
        ));
    }

    let slow: Vec<&PageData> = pages
        .iter()
        .filter(|p| p.load_time_ms > 5000.0 && p.status_code == 200)
        .collect();
    if !slow.is_empty() {
        issues.push(crawl_issue(
            "crawl-slow-pages",
            "Pages with slow server response time",
            format!("{} pages took over 5 seconds to respond.", slow.len()),
            Severity::High,
            slow,
            2.0,
            80.0,
            "Optimize server response time. Target < 200ms TTFB.",
        ));
    }

    let duplicates: Vec<&PageData> = pages
        .iter()
        .filter(|p| p.meta.get("is_duplicate_content").map(String::as_str) == Some("true"))
        .collect();
    if !duplicates.is_empty() {
        issues.push(crawl_issue(
            "crawl-duplicate-content",
            "Duplicate content detected",
            format!(
                "{} pages have identical or near-identical content.",
                duplicates.len()
            ),
            Severity::Medium,
            duplicates,
            1.5,
            80.0,
            "Implement canonical tags or 301 redirects to consolidate duplicate content.",
        ));
    }

    let no_canonical: Vec<&PageData> = pages
        .iter()
        .filter(|p| p.status_code == 200 && p.canonical_url.is_none())
        .collect();
    if !no_canonical.is_empty() {
        issues.push(crawl_issue(
            "crawl-missing-canonical",
            "Pages without canonical tags",
            format!(
                "{} pages are missing canonical link elements.",
                no_canonical.len()
            ),
            Severity::Medium,
            no_canonical,
            0.5,
            60.0,
            "Add self-referencing canonical tags to all indexable pages.",
        ));
    }

    let canonical_mismatch: Vec<&PageData> = pages
        .iter()
        .filter(|p| {
            p.status_code == 200
                && p.canonical_url
                    .as_ref()
                    .is_some_and(|canonical| canonical != &p.url)
        })
        .collect();
    if !canonical_mismatch.is_empty() {
        issues.push(crawl_issue(
            "crawl-canonical-mismatch",
            "Crawled URLs differ from canonical",
            format!(
                "{} crawled URLs point to a different canonical URL, wasting crawl budget.",
                canonical_mismatch.len()
            ),
            Severity::Medium,
            canonical_mismatch,
            1.0,
            70.0,
            "Ensure internal links point to the canonical version of each URL.",
        ));
    }

    issues
}

/// Crawlability score: success rate carries most of the weight, canonical
/// coverage adds a bonus, and each issue deducts by severity.
pub fn calculate_crawl_score(pages: &[PageData], issues: &[Issue]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }

    let total = pages.len() as f64;
    let successful = pages.iter().filter(|p| p.is_success()).count() as f64;
    let mut score = (successful / total) * 70.0;

    let with_canonical = pages.iter().filter(|p| p.canonical_url.is_some()).count() as f64;
    score += (with_canonical / total) * 20.0;

    for issue in issues {
        score -= match issue.severity {
            Severity::Critical => 20.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
            Severity::Info => 0.0,
        };
    }

    (score.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, status: u16) -> PageData {
        PageData::new(url, status)
    }

    #[test]
    fn detects_4xx_pages() {
        let pages = vec![
            page("https://example.com/404", 404),
            page("https://example.com/404-2", 404),
            page("https://example.com/ok", 200),
        ];
        let issues = analyze_crawl_issues(&pages);
        let issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-4xx-pages")
            .expect("4xx issue emitted");
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.affected_count, 2);
        assert_eq!(issue.impact_score, 4.0);
    }

    #[test]
    fn detects_5xx_as_critical() {
        let pages = vec![page("https://example.com/error", 500)];
        let issues = analyze_crawl_issues(&pages);
        let issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-5xx-pages")
            .expect("5xx issue emitted");
        assert_eq!(issue.severity, Severity::Critical);
    }

    #[test]
    fn duplicate_flag_counts_only_later_pages() {
        let first = page("https://example.com/a", 200);
        let mut second = page("https://example.com/a-copy", 200);
        second
            .meta
            .insert("is_duplicate_content".into(), "true".into());
        let issues = analyze_crawl_issues(&[first, second]);
        let issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-duplicate-content")
            .expect("duplicate issue emitted");
        assert_eq!(issue.affected_count, 1);
        assert_eq!(issue.affected_urls, vec!["https://example.com/a-copy"]);
    }

    #[test]
    fn canonical_checks_only_apply_to_ok_pages() {
        let mut ok_with_canonical = page("https://example.com/a", 200);
        ok_with_canonical.canonical_url = Some("https://example.com/a".into());
        let mut mismatched = page("https://example.com/b", 200);
        mismatched.canonical_url = Some("https://example.com/canonical".into());
        let missing = page("https://example.com/c", 200);
        let broken = page("https://example.com/d", 404);

        let issues = analyze_crawl_issues(&[ok_with_canonical, mismatched, missing, broken]);

        let missing_issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-missing-canonical")
            .unwrap();
        assert_eq!(missing_issue.affected_count, 1);

        let mismatch_issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-canonical-mismatch")
            .unwrap();
        assert_eq!(mismatch_issue.affected_count, 1);
        assert_eq!(mismatch_issue.affected_urls, vec!["https://example.com/b"]);
    }

    #[test]
    fn slow_pages_require_ok_status() {
        let mut slow_ok = page("https://example.com/slow", 200);
        slow_ok.load_time_ms = 6000.0;
        let mut slow_broken = page("https://example.com/slow-404", 404);
        slow_broken.load_time_ms = 9000.0;

        let issues = analyze_crawl_issues(&[slow_ok, slow_broken]);
        let issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-slow-pages")
            .unwrap();
        assert_eq!(issue.affected_count, 1);
    }

    #[test]
    fn sample_urls_are_bounded() {
        let pages: Vec<PageData> = (0..120)
            .map(|i| page(&format!("https://example.com/missing-{i}"), 404))
            .collect();
        let issues = analyze_crawl_issues(&pages);
        let issue = issues
            .iter()
            .find(|i| i.rule_id == "crawl-4xx-pages")
            .unwrap();
        assert_eq!(issue.affected_count, 120);
        assert_eq!(issue.affected_urls.len(), 50);
        // Factor 2.0 capped at the 100 ceiling.
        assert_eq!(issue.impact_score, 100.0);
    }

    #[test]
    fn score_decreases_with_errors() {
        let good: Vec<PageData> = (0..10)
            .map(|i| page(&format!("https://example.com/{i}"), 200))
            .collect();
        let good_score = calculate_crawl_score(&good, &[]);

        let bad: Vec<PageData> = (0..10)
            .map(|i| page(&format!("https://example.com/{i}"), 404))
            .collect();
        let bad_issues = analyze_crawl_issues(&bad);
        let bad_score = calculate_crawl_score(&bad, &bad_issues);

        assert!(good_score > bad_score);
        assert!(bad_score >= 0.0);
    }

    #[test]
    fn empty_crawl_scores_zero() {
        assert_eq!(calculate_crawl_score(&[], &[]), 0.0);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let mut pages = Vec::new();
        for i in 0..5 {
            let mut p = page(&format!("https://example.com/{i}"), 200);
            p.canonical_url = Some(p.url.clone());
            pages.push(p);
        }
        let score = calculate_crawl_score(&pages, &[]);
        assert!(score <= 100.0);
        assert_eq!(score, 90.0); // 70 success + 20 canonical coverage
    }
}
