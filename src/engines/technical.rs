//! Technical SEO engine: protocol and server-level factors.

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

use crate::core::rules::{calculate_category_score, calculate_impact_score, Rule, RuleRegistry};
use crate::core::types::{
    grade_for_score, AuditResult, EngineStatus, Issue, IssueCategory, PageData, Severity, SiteData,
};
use crate::engines::AuditEngine;

pub const ENGINE_NAME: &str = "technical";

/// Number of distinct checks this engine performs; used to normalize the
/// category score.
const TOTAL_CHECKS: usize = 10;

/// URL shapes that look like pagination series.
const PAGINATION_MARKERS: &[&str] = &["/page/", "?page=", "&page=", "/p/", "?p="];

pub struct TechnicalSeoEngine {
    rules: Arc<RuleRegistry>,
}

impl TechnicalSeoEngine {
    pub fn new(rules: Arc<RuleRegistry>) -> Self {
        Self { rules }
    }

    /// Evaluate a declarative rule over all pages, returning the affected
    /// subset.
    fn pages_matching<'a>(&self, rule: &Rule, pages: &'a [PageData]) -> Vec<&'a PageData> {
        pages
            .iter()
            .filter(|p| rule.triggers(&p.as_value()))
            .collect()
    }

    fn issue_from_rule(
        &self,
        rule: &Rule,
        description: String,
        affected: Vec<&PageData>,
        total_pages: usize,
    ) -> Issue {
        Issue {
            rule_id: rule.id.clone(),
            title: rule.name.clone(),
            description,
            severity: rule.severity,
            category: rule.category,
            affected_urls: affected.iter().take(50).map(|p| p.url.clone()).collect(),
            affected_count: affected.len(),
            impact_score: calculate_impact_score(
                rule.severity,
                affected.len(),
                total_pages,
                rule.impact_score,
            ),
            effort_score: rule.effort_score,
            recommendation: rule.recommendation.clone(),
            documentation_url: rule.documentation_url.clone(),
            metadata: serde_json::Map::new(),
        }
    }
}

#[async_trait]
impl AuditEngine for TechnicalSeoEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Technical
    }

    async fn run(&self, site_data: &SiteData) -> Result<AuditResult> {
        let pages = &site_data.pages;
        let total_pages = pages.len().max(1);
        let mut issues: Vec<Issue> = Vec::new();

        // HTTPS coverage
        let http_pages: Vec<&PageData> = pages
            .iter()
            .filter(|p| p.url.starts_with("http://") && p.status_code == 200)
            .collect();
        if !http_pages.is_empty() {
            issues.push(Issue {
                rule_id: "tech-http-pages".to_string(),
                title: "Pages served over HTTP (not HTTPS)".to_string(),
                description: format!(
                    "{} pages are accessible over insecure HTTP.",
                    http_pages.len()
                ),
                severity: Severity::Critical,
                category: IssueCategory::Technical,
                affected_urls: http_pages.iter().take(50).map(|p| p.url.clone()).collect(),
                affected_count: http_pages.len(),
                impact_score: calculate_impact_score(
                    Severity::Critical,
                    http_pages.len(),
                    total_pages,
                    90.0,
                ),
                effort_score: 5.0,
                recommendation:
                    "Implement HTTPS sitewide and redirect all HTTP to HTTPS with 301.".to_string(),
                documentation_url:
                    "https://developers.google.com/search/docs/crawling-indexing/http-https"
                        .to_string(),
                metadata: serde_json::Map::new(),
            });
        }

        // Mixed content
        let mixed = find_mixed_content(pages);
        if !mixed.is_empty() {
            issues.push(Issue {
                rule_id: "tech-mixed-content".to_string(),
                title: "Mixed content (HTTP resources on HTTPS pages)".to_string(),
                description: format!("{} HTTPS pages load insecure HTTP resources.", mixed.len()),
                severity: Severity::High,
                category: IssueCategory::Technical,
                affected_urls: mixed.iter().take(50).map(|p| p.url.clone()).collect(),
                affected_count: mixed.len(),
                impact_score: calculate_impact_score(Severity::High, mixed.len(), total_pages, 70.0),
                effort_score: 5.0,
                recommendation: "Update all resource references to use HTTPS.".to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        // Redirect chains (hop counts recorded by the fetcher)
        let chained: Vec<&PageData> = pages
            .iter()
            .filter(|p| {
                p.meta
                    .get("redirect_hops")
                    .and_then(|v| v.parse::<u32>().ok())
                    .is_some_and(|hops| hops > 1)
            })
            .collect();
        if !chained.is_empty() {
            issues.push(Issue {
                rule_id: "tech-redirect-chains".to_string(),
                title: "Long redirect chains detected".to_string(),
                description: format!(
                    "{} URLs have redirect chains longer than 1 hop.",
                    chained.len()
                ),
                severity: Severity::Medium,
                category: IssueCategory::Technical,
                affected_urls: chained.iter().take(50).map(|p| p.url.clone()).collect(),
                affected_count: chained.len(),
                impact_score: calculate_impact_score(
                    Severity::Medium,
                    chained.len(),
                    total_pages,
                    55.0,
                ),
                effort_score: 5.0,
                recommendation: "Reduce redirect chains to a single hop. Update internal links to point directly to final URLs.".to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        // Noindex directives, both header- and meta-level, via the rule set.
        let mut noindex_count = 0;
        for rule_id in ["tech-xrobots-noindex", "tech-meta-noindex"] {
            if let Some(rule) = self.rules.get(rule_id) {
                let affected = self.pages_matching(rule, pages);
                noindex_count += affected.len();
                if !affected.is_empty() {
                    let description = match rule_id {
                        "tech-xrobots-noindex" => format!(
                            "{} pages are excluded from indexing via HTTP header.",
                            affected.len()
                        ),
                        _ => format!(
                            "{} pages have meta robots noindex directive.",
                            affected.len()
                        ),
                    };
                    issues.push(self.issue_from_rule(rule, description, affected, total_pages));
                }
            }
        }

        // WWW consistency
        if let Some(issue) = check_www_consistency(pages) {
            issues.push(issue);
        }

        // Pagination rel hints
        if let Some(issue) = check_pagination(pages) {
            issues.push(issue);
        }

        // robots.txt presence
        if site_data.robots_txt.is_empty() {
            issues.push(Issue {
                rule_id: "tech-missing-robots-txt".to_string(),
                title: "robots.txt file is missing or inaccessible".to_string(),
                description: "No robots.txt was found at the root of the domain.".to_string(),
                severity: Severity::Medium,
                category: IssueCategory::Technical,
                affected_urls: vec![site_data.root_url.clone()],
                affected_count: 1,
                impact_score: 45.0,
                effort_score: 2.0,
                recommendation: "Create a robots.txt file at yourdomain.com/robots.txt."
                    .to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        // HSTS over a small sample
        if let Some(issue) = check_hsts(pages) {
            issues.push(issue);
        }

        let score = calculate_category_score(&issues, TOTAL_CHECKS, total_pages);

        let https_count = pages
            .iter()
            .filter(|p| p.url.starts_with("https://"))
            .count();
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "https_coverage".to_string(),
            serde_json::json!(https_count as f64 / total_pages as f64),
        );
        metadata.insert("noindex_count".to_string(), serde_json::json!(noindex_count));

        Ok(AuditResult {
            engine_name: ENGINE_NAME.to_string(),
            audit_id: site_data.audit_id,
            status: EngineStatus::Success,
            category: IssueCategory::Technical,
            score,
            grade: grade_for_score(score).to_string(),
            issues,
            recommendations: Vec::new(),
            metadata,
            execution_time_ms: 0.0,
            pages_analyzed: total_pages,
            error_message: None,
        })
    }
}

fn find_mixed_content(pages: &[PageData]) -> Vec<&PageData> {
    let pattern = regex::Regex::new(r#"(?i)(src|href|action)\s*=\s*["']http://"#)
        .expect("mixed-content pattern is a valid regex");
    pages
        .iter()
        .filter(|p| {
            p.url.starts_with("https://") && p.status_code == 200 && pattern.is_match(&p.html)
        })
        .collect()
}

fn check_www_consistency(pages: &[PageData]) -> Option<Issue> {
    let host_of = |p: &PageData| {
        Url::parse(&p.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    };
    let www: Vec<&PageData> = pages
        .iter()
        .filter(|p| host_of(p).starts_with("www."))
        .collect();
    let bare: Vec<&PageData> = pages
        .iter()
        .filter(|p| {
            let host = host_of(p);
            !host.is_empty() && !host.starts_with("www.")
        })
        .collect();

    if www.is_empty() || bare.is_empty() {
        return None;
    }

    let affected_urls: Vec<String> = www
        .iter()
        .chain(bare.iter())
        .take(50)
        .map(|p| p.url.clone())
        .collect();
    Some(Issue {
        rule_id: "tech-www-consistency".to_string(),
        title: "Inconsistent www/non-www URLs".to_string(),
        description: "Both www and non-www versions of pages are accessible.".to_string(),
        severity: Severity::Medium,
        category: IssueCategory::Technical,
        affected_urls,
        affected_count: www.len() + bare.len(),
        impact_score: 50.0,
        effort_score: 3.0,
        recommendation: "Choose one canonical version (www or non-www) and redirect the other."
            .to_string(),
        documentation_url: String::new(),
        metadata: serde_json::Map::new(),
    })
}

fn check_pagination(pages: &[PageData]) -> Option<Issue> {
    let rel_next = Selector::parse("link[rel=\"next\"]").ok()?;
    let rel_prev = Selector::parse("link[rel=\"prev\"]").ok()?;

    let affected: Vec<&PageData> = pages
        .iter()
        .filter(|p| {
            if p.status_code != 200 || p.html.is_empty() {
                return false;
            }
            let url_lower = p.url.to_lowercase();
            if !PAGINATION_MARKERS.iter().any(|m| url_lower.contains(m)) {
                return false;
            }
            let document = Html::parse_document(&p.html);
            document.select(&rel_next).next().is_none()
                && document.select(&rel_prev).next().is_none()
        })
        .collect();

    if affected.is_empty() {
        return None;
    }
    Some(Issue {
        rule_id: "tech-missing-pagination-rel".to_string(),
        title: "Paginated pages missing rel=next/prev".to_string(),
        description: format!(
            "{} paginated pages lack proper rel=next/prev link elements.",
            affected.len()
        ),
        severity: Severity::Low,
        category: IssueCategory::Technical,
        affected_urls: affected.iter().take(50).map(|p| p.url.clone()).collect(),
        affected_count: affected.len(),
        impact_score: 25.0,
        effort_score: 4.0,
        recommendation: "Add rel=next and rel=prev link tags to paginated series.".to_string(),
        documentation_url: String::new(),
        metadata: serde_json::Map::new(),
    })
}

fn check_hsts(pages: &[PageData]) -> Option<Issue> {
    let sample: Vec<&PageData> = pages.iter().filter(|p| p.status_code == 200).take(10).collect();
    if sample.is_empty() {
        return None;
    }

    let no_hsts: Vec<&PageData> = sample
        .iter()
        .filter(|p| p.url.starts_with("https://") && p.header("strict-transport-security").is_none())
        .copied()
        .collect();
    if no_hsts.len() as f64 <= sample.len() as f64 * 0.5 {
        return None;
    }

    Some(Issue {
        rule_id: "tech-missing-hsts".to_string(),
        title: "HTTP Strict Transport Security (HSTS) not configured".to_string(),
        description: "HTTPS pages are missing the Strict-Transport-Security header.".to_string(),
        severity: Severity::Low,
        category: IssueCategory::Technical,
        affected_urls: no_hsts.iter().map(|p| p.url.clone()).collect(),
        affected_count: no_hsts.len(),
        impact_score: 20.0,
        effort_score: 2.0,
        recommendation:
            "Configure HSTS header: Strict-Transport-Security: max-age=31536000; includeSubDomains"
                .to_string(),
        documentation_url: String::new(),
        metadata: serde_json::Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AuditConfig;
    use crate::engines::execute;

    fn engine() -> TechnicalSeoEngine {
        TechnicalSeoEngine::new(Arc::new(RuleRegistry::builtin()))
    }

    fn site_with(pages: Vec<PageData>) -> SiteData {
        let mut site = SiteData::new("https://example.com/", AuditConfig::default());
        site.robots_txt = "User-agent: *\nDisallow:\n".to_string();
        site.pages = pages;
        site
    }

    fn ok_page(url: &str) -> PageData {
        let mut p = PageData::new(url, 200);
        p.content_type = "text/html".to_string();
        p
    }

    #[tokio::test]
    async fn flags_http_pages_as_critical() {
        // Both protocol variants present and reachable.
        let site = site_with(vec![
            ok_page("http://example.com/"),
            ok_page("https://example.com/"),
        ]);
        let result = execute(&engine(), &site).await;
        let issue = result
            .issues
            .iter()
            .find(|i| i.rule_id == "tech-http-pages")
            .expect("http issue emitted");
        assert_eq!(issue.severity, Severity::Critical);
        assert!(issue.affected_count >= 1);
    }

    #[tokio::test]
    async fn flags_mixed_content_on_https_pages() {
        let mut page = ok_page("https://example.com/");
        page.html = r#"<img SRC = "http://cdn.example.com/logo.png">"#.to_string();
        let site = site_with(vec![page]);
        let result = execute(&engine(), &site).await;
        assert!(result.issues.iter().any(|i| i.rule_id == "tech-mixed-content"));
    }

    #[tokio::test]
    async fn flags_noindex_header_and_meta() {
        let mut header_page = ok_page("https://example.com/a");
        header_page
            .headers
            .push(("X-Robots-Tag".into(), "noindex, nofollow".into()));
        let mut meta_page = ok_page("https://example.com/b");
        meta_page.meta.insert("robots".into(), "NOINDEX".into());

        let site = site_with(vec![header_page, meta_page]);
        let result = execute(&engine(), &site).await;
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == "tech-xrobots-noindex" && i.affected_count == 1));
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == "tech-meta-noindex" && i.affected_count == 1));
        assert_eq!(result.metadata["noindex_count"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn flags_redirect_chains_beyond_one_hop() {
        let mut chained = ok_page("https://example.com/final");
        chained.meta.insert("redirect_hops".into(), "3".into());
        let mut single_hop = ok_page("https://example.com/moved");
        single_hop.meta.insert("redirect_hops".into(), "1".into());

        let site = site_with(vec![chained, single_hop]);
        let result = execute(&engine(), &site).await;
        let issue = result
            .issues
            .iter()
            .find(|i| i.rule_id == "tech-redirect-chains")
            .expect("redirect chain issue emitted");
        assert_eq!(issue.affected_count, 1);
    }

    #[tokio::test]
    async fn flags_www_mixture() {
        let site = site_with(vec![
            ok_page("https://www.example.com/"),
            ok_page("https://example.com/about"),
        ]);
        let result = execute(&engine(), &site).await;
        let issue = result
            .issues
            .iter()
            .find(|i| i.rule_id == "tech-www-consistency")
            .expect("www issue emitted");
        assert_eq!(issue.affected_count, 2);
    }

    #[tokio::test]
    async fn flags_paginated_urls_without_rel_links() {
        let mut paginated = ok_page("https://example.com/blog?page=2");
        paginated.html = "<html><head></head><body><p>posts</p></body></html>".to_string();
        let mut with_rel = ok_page("https://example.com/blog?page=3");
        with_rel.html =
            r#"<html><head><link rel="next" href="/blog?page=4"></head><body></body></html>"#
                .to_string();

        let site = site_with(vec![paginated, with_rel]);
        let result = execute(&engine(), &site).await;
        let issue = result
            .issues
            .iter()
            .find(|i| i.rule_id == "tech-missing-pagination-rel")
            .expect("pagination issue emitted");
        assert_eq!(issue.affected_count, 1);
    }

    #[tokio::test]
    async fn missing_robots_txt_is_reported() {
        let mut site = site_with(vec![ok_page("https://example.com/")]);
        site.robots_txt.clear();
        let result = execute(&engine(), &site).await;
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == "tech-missing-robots-txt" && i.affected_count == 1));
    }

    #[tokio::test]
    async fn hsts_issue_requires_majority_of_sample() {
        // 2 of 3 HTTPS pages missing HSTS: flagged.
        let mut with_hsts = ok_page("https://example.com/a");
        with_hsts
            .headers
            .push(("Strict-Transport-Security".into(), "max-age=31536000".into()));
        let site = site_with(vec![
            with_hsts.clone(),
            ok_page("https://example.com/b"),
            ok_page("https://example.com/c"),
        ]);
        let result = execute(&engine(), &site).await;
        assert!(result.issues.iter().any(|i| i.rule_id == "tech-missing-hsts"));

        // Majority has the header: not flagged.
        let site = site_with(vec![
            with_hsts.clone(),
            with_hsts.clone(),
            ok_page("https://example.com/d"),
        ]);
        let result = execute(&engine(), &site).await;
        assert!(!result.issues.iter().any(|i| i.rule_id == "tech-missing-hsts"));
    }

    #[tokio::test]
    async fn clean_site_scores_high() {
        let mut page = ok_page("https://example.com/");
        page.headers
            .push(("Strict-Transport-Security".into(), "max-age=31536000".into()));
        let site = site_with(vec![page]);
        let result = execute(&engine(), &site).await;
        assert!(result.issues.is_empty());
        assert_eq!(result.score, 100.0);
        assert_eq!(result.grade, "A");
    }
}
