use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::config::AuditConfig;

// ---------------------------------------------------------------------------
// Enums shared by every engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocking issue, fix immediately.
    Critical,
    /// Significant impact, fix soon.
    High,
    /// Moderate impact.
    Medium,
    /// Minor, fix when convenient.
    Low,
    /// Informational only.
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Crawlability,
    Technical,
    OnPage,
    Content,
    Performance,
    InternalLinks,
    Schema,
    Authority,
    Competitor,
    International,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Success,
    /// Ran but with some failures.
    Partial,
    Failed,
    /// Not applicable for this site.
    Skipped,
}

/// Lifecycle of one audit as seen by callers and the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Pending,
    Crawling,
    Analyzing,
    Complete,
    Failed,
}

/// How a URL entered the crawl frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Link,
    Sitemap,
    Manual,
}

// ---------------------------------------------------------------------------
// Page model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub loading: Option<String>,
}

/// Normalized view of one crawled URL, handed read-only to every engine.
///
/// A `status_code` of 0 denotes a transport failure, 408 a timeout and 310 a
/// redirect cycle. For non-200 or non-HTML responses the extracted fields are
/// present but empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageData {
    /// Final URL after redirects.
    pub url: String,
    #[serde(default)]
    pub canonical_url: Option<String>,
    pub status_code: u16,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub text_content: String,
    /// Response headers as received, with case-preserving keys.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Meta tags, lowercased name/property -> content. The document title is
    /// stored under `meta["title"]`.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Outbound link hrefs in document order.
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    /// One entry per parseable `<script type="application/ld+json">`.
    #[serde(default)]
    pub structured_data: Vec<serde_json::Value>,
    #[serde(default)]
    pub load_time_ms: f64,
    #[serde(default)]
    pub page_size_bytes: usize,
    /// BFS depth at which the URL was discovered.
    #[serde(default)]
    pub depth: u32,
    pub crawled_at: DateTime<Utc>,
}

impl PageData {
    pub fn new(url: impl Into<String>, status_code: u16) -> Self {
        Self {
            url: url.into(),
            canonical_url: None,
            status_code,
            content_type: String::new(),
            html: String::new(),
            text_content: String::new(),
            headers: Vec::new(),
            meta: BTreeMap::new(),
            links: Vec::new(),
            images: Vec::new(),
            structured_data: Vec::new(),
            load_time_ms: 0.0,
            page_size_bytes: 0,
            depth: 0,
            crawled_at: Utc::now(),
        }
    }

    /// Case-insensitive header lookup over the as-received header list.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html")
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    /// JSON projection used by the rule engine's dot-path field access.
    pub fn as_value(&self) -> serde_json::Value {
        // Headers become a lowercased map so rules can address them by name.
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            let headers: serde_json::Map<String, serde_json::Value> = self
                .headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), serde_json::Value::String(v.clone())))
                .collect();
            obj.insert("headers".into(), serde_json::Value::Object(headers));
        }
        value
    }
}

// ---------------------------------------------------------------------------
// Site model
// ---------------------------------------------------------------------------

/// Live crawl statistics, stamped onto `SiteData` when the crawl finishes
/// (or is cut short).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total_queued: usize,
    pub total_crawled: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub js_rendered: usize,
    pub elapsed_seconds: f64,
    pub pages_per_second: f64,
    pub sitemap_urls_found: usize,
}

/// Audit-wide state. Owned by one audit: the crawler populates `pages`,
/// after which it is read-only to every analysis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteData {
    pub audit_id: Uuid,
    pub site_id: Uuid,
    /// Root domain host, lowercase.
    pub domain: String,
    pub root_url: String,
    #[serde(default)]
    pub pages: Vec<PageData>,
    #[serde(default)]
    pub sitemap_urls: Vec<String>,
    #[serde(default)]
    pub robots_txt: String,
    #[serde(default)]
    pub crawl_stats: CrawlStats,
    pub settings: AuditConfig,
}

impl SiteData {
    pub fn new(root_url: impl Into<String>, settings: AuditConfig) -> Self {
        let root_url = root_url.into();
        let domain = url::Url::parse(&root_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();
        Self {
            audit_id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            domain,
            root_url,
            pages: Vec::new(),
            sitemap_urls: Vec::new(),
            robots_txt: String::new(),
            crawl_stats: CrawlStats::default(),
            settings,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine output
// ---------------------------------------------------------------------------

/// A concrete SEO defect tied to a rule id and a set of affected URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub rule_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: IssueCategory,
    /// Bounded sample of affected URLs (at most 50).
    #[serde(default)]
    pub affected_urls: Vec<String>,
    #[serde(default)]
    pub affected_count: usize,
    /// 0-100.
    #[serde(default)]
    pub impact_score: f64,
    /// 1-10 scale; higher means more work to fix.
    #[serde(default = "default_effort")]
    pub effort_score: f64,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub documentation_url: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_effort() -> f64 {
    5.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
}

/// A prioritized fix, ranked against every other issue found in the audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Rule id of the originating issue.
    pub issue_id: String,
    /// Dense 1-based rank.
    pub priority_rank: usize,
    pub title: String,
    pub description: String,
    pub effort: EffortLevel,
    pub impact: EffortLevel,
    /// Estimated additional monthly visits if fixed.
    #[serde(default)]
    pub estimated_traffic_gain: f64,
    /// Estimated monthly revenue impact in currency units.
    #[serde(default)]
    pub estimated_revenue_impact: f64,
    #[serde(default)]
    pub implementation_steps: Vec<String>,
}

/// Score for a single audit category, produced by the scoring stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: IssueCategory,
    pub score: f64,
    pub grade: String,
    pub issues_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub weight: f64,
}

/// Standardized output of every engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub engine_name: String,
    pub audit_id: Uuid,
    pub status: EngineStatus,
    pub category: IssueCategory,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "default_grade")]
    pub grade: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub pages_analyzed: usize,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_grade() -> String {
    "F".to_string()
}

impl AuditResult {
    pub fn failed(
        engine_name: impl Into<String>,
        audit_id: Uuid,
        category: IssueCategory,
        error: impl Into<String>,
    ) -> Self {
        Self {
            engine_name: engine_name.into(),
            audit_id,
            status: EngineStatus::Failed,
            category,
            score: 0.0,
            grade: "F".to_string(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            metadata: serde_json::Map::new(),
            execution_time_ms: 0.0,
            pages_analyzed: 0,
            error_message: Some(error.into()),
        }
    }
}

/// Convert a 0-100 score to a letter grade at the 90/80/65/50 bands.
pub fn grade_for_score(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 65.0 {
        "C"
    } else if score >= 50.0 {
        "D"
    } else {
        "F"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut page = PageData::new("https://example.com/", 200);
        page.headers
            .push(("X-Robots-Tag".to_string(), "noindex".to_string()));
        assert_eq!(page.header("x-robots-tag"), Some("noindex"));
        assert_eq!(page.header("X-ROBOTS-TAG"), Some("noindex"));
        assert_eq!(page.header("content-type"), None);
    }

    #[test]
    fn grade_bands() {
        assert_eq!(grade_for_score(95.0), "A");
        assert_eq!(grade_for_score(90.0), "A");
        assert_eq!(grade_for_score(80.0), "B");
        assert_eq!(grade_for_score(65.0), "C");
        assert_eq!(grade_for_score(50.0), "D");
        assert_eq!(grade_for_score(49.9), "F");
    }

    #[test]
    fn page_value_exposes_lowercased_headers() {
        let mut page = PageData::new("https://example.com/", 200);
        page.headers.push((
            "Strict-Transport-Security".to_string(),
            "max-age=1".to_string(),
        ));
        let value = page.as_value();
        assert_eq!(
            value["headers"]["strict-transport-security"],
            serde_json::json!("max-age=1")
        );
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&IssueCategory::OnPage).unwrap(),
            "\"on_page\""
        );
    }
}
