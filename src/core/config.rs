use serde::{Deserialize, Serialize};

use crate::core::types::IssueCategory;

/// Hard ceiling on pages per audit, regardless of configuration.
pub const MAX_PAGES_CEILING: usize = 50_000;

const DEFAULT_USER_AGENT: &str = "SiteAuditBot/1.0 (+https://siteaudit.dev/bot)";

// ---------------------------------------------------------------------------
// Category weights
// ---------------------------------------------------------------------------

/// Per-category contribution to the overall score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub crawlability: f64,
    pub technical: f64,
    pub on_page: f64,
    pub content: f64,
    pub performance: f64,
    pub internal_links: f64,
    pub schema: f64,
    pub authority: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            crawlability: 0.15,
            technical: 0.20,
            on_page: 0.15,
            content: 0.15,
            performance: 0.15,
            internal_links: 0.10,
            schema: 0.05,
            authority: 0.05,
        }
    }
}

impl CategoryWeights {
    /// Weight for a category; reserved categories contribute nothing.
    pub fn weight(&self, category: IssueCategory) -> f64 {
        match category {
            IssueCategory::Crawlability => self.crawlability,
            IssueCategory::Technical => self.technical,
            IssueCategory::OnPage => self.on_page,
            IssueCategory::Content => self.content,
            IssueCategory::Performance => self.performance,
            IssueCategory::InternalLinks => self.internal_links,
            IssueCategory::Schema => self.schema,
            IssueCategory::Authority => self.authority,
            _ => 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.crawlability
            + self.technical
            + self.on_page
            + self.content
            + self.performance
            + self.internal_links
            + self.schema
            + self.authority
    }
}

// ---------------------------------------------------------------------------
// Audit configuration
// ---------------------------------------------------------------------------

/// Per-audit configuration. Every field has a working default; a JSON config
/// file and `SITEAUDIT_*` env vars can override individual values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Frontier cap and crawled-page cap (clamped to `MAX_PAGES_CEILING`).
    pub max_pages: usize,
    /// BFS depth limit.
    pub max_depth: u32,
    /// Crawler in-flight fetch bound.
    pub concurrency: usize,
    /// Token-bucket refill rate, requests per second per domain.
    pub rate_limit_rps: f64,
    /// Force headless rendering for every fetch.
    pub js_render: bool,
    /// Revenue baseline for scoring and prioritization.
    pub monthly_traffic: u64,
    pub user_agent: String,
    /// HTTP fetch timeout, seconds.
    pub request_timeout_secs: u64,
    /// Headless render deadline, milliseconds.
    pub render_timeout_ms: u64,
    /// Per-engine soft time limit, seconds.
    pub engine_soft_timeout_secs: u64,
    pub weights: CategoryWeights,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_pages: 5000,
            max_depth: 10,
            concurrency: 20,
            rate_limit_rps: 5.0,
            js_render: false,
            monthly_traffic: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            render_timeout_ms: 15_000,
            engine_soft_timeout_secs: 1800,
            weights: CategoryWeights::default(),
        }
    }
}

impl AuditConfig {
    /// Clamp out-of-range values instead of rejecting the config outright.
    /// Weight sums that drift from 1.0 are reported by `validate`.
    pub fn sanitized(mut self) -> Self {
        self.max_pages = self.max_pages.clamp(1, MAX_PAGES_CEILING);
        self.concurrency = self.concurrency.max(1);
        if self.rate_limit_rps <= 0.0 {
            self.rate_limit_rps = 5.0;
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("category weights sum to {sum}, expected 1.0"));
        }
        Ok(())
    }
}

/// Load configuration from standard locations, then apply env overrides.
///
/// Search order (first found wins): `SITEAUDIT_CONFIG` env var path,
/// `./siteaudit.json`. Missing file means defaults; a parse error logs a
/// warning and also falls back to defaults.
pub fn load_config() -> AuditConfig {
    let mut candidates = vec![std::path::PathBuf::from("siteaudit.json")];
    if let Ok(env_path) = std::env::var("SITEAUDIT_CONFIG") {
        candidates.insert(0, std::path::PathBuf::from(env_path));
    }

    let mut config = AuditConfig::default();
    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<AuditConfig>(&contents) {
                Ok(parsed) => {
                    tracing::info!("config loaded from {}", path.display());
                    config = parsed;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        "config parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    break;
                }
            },
            Err(_) => continue,
        }
    }

    apply_env_overrides(&mut config);
    config.sanitized()
}

fn apply_env_overrides(config: &mut AuditConfig) {
    if let Some(v) = env_parse::<usize>("SITEAUDIT_MAX_PAGES") {
        config.max_pages = v;
    }
    if let Some(v) = env_parse::<u32>("SITEAUDIT_MAX_DEPTH") {
        config.max_depth = v;
    }
    if let Some(v) = env_parse::<usize>("SITEAUDIT_CONCURRENCY") {
        config.concurrency = v;
    }
    if let Some(v) = env_parse::<f64>("SITEAUDIT_RATE_LIMIT_RPS") {
        config.rate_limit_rps = v;
    }
    if let Some(v) = env_parse::<bool>("SITEAUDIT_JS_RENDER") {
        config.js_render = v;
    }
    if let Some(v) = env_parse::<u64>("SITEAUDIT_MONTHLY_TRAFFIC") {
        config.monthly_traffic = v;
    }
    if let Ok(ua) = std::env::var("SITEAUDIT_USER_AGENT") {
        if !ua.trim().is_empty() {
            config.user_agent = ua;
        }
    }
    if let Some(v) = env_parse::<u64>("SITEAUDIT_RENDER_TIMEOUT_MS") {
        config.render_timeout_ms = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
