//! On-page SEO engine: titles, descriptions, headings, content depth and
//! URL hygiene, evaluated over the 200-OK HTML subset of the crawl.

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::core::rules::{calculate_category_score, calculate_impact_score, RuleRegistry};
use crate::core::types::{
    grade_for_score, AuditResult, EngineStatus, Issue, IssueCategory, PageData, Severity, SiteData,
};
use crate::engines::AuditEngine;

pub const ENGINE_NAME: &str = "onpage";

const TOTAL_CHECKS: usize = 12;
const MIN_WORD_COUNT: usize = 300;
const MAX_QUERY_PARAMS: usize = 3;

pub struct OnPageEngine {
    rules: Arc<RuleRegistry>,
}

impl OnPageEngine {
    pub fn new(rules: Arc<RuleRegistry>) -> Self {
        Self { rules }
    }
}

/// Per-page observations gathered in one pass.
#[derive(Default)]
struct PageBuckets<'a> {
    missing_title: Vec<&'a PageData>,
    short_title: Vec<&'a PageData>,
    long_title: Vec<&'a PageData>,
    missing_meta: Vec<&'a PageData>,
    missing_h1: Vec<&'a PageData>,
    multiple_h1: Vec<&'a PageData>,
    missing_alt: Vec<(&'a PageData, usize)>,
    thin_content: Vec<&'a PageData>,
    long_urls: Vec<&'a PageData>,
    uppercase_urls: Vec<&'a PageData>,
    dynamic_urls: Vec<&'a PageData>,
    titles: Vec<String>,
    meta_descs: Vec<String>,
    word_counts: Vec<usize>,
}

fn sample(pages: &[&PageData]) -> Vec<String> {
    pages.iter().take(50).map(|p| p.url.clone()).collect()
}

#[async_trait]
impl AuditEngine for OnPageEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::OnPage
    }

    async fn run(&self, site_data: &SiteData) -> Result<AuditResult> {
        let pages: Vec<&PageData> = site_data
            .pages
            .iter()
            .filter(|p| p.status_code == 200 && p.is_html() && !p.html.is_empty())
            .collect();
        let total_pages = pages.len().max(1);

        let h1_selector = Selector::parse("h1").expect("h1 selector parses");
        let mut buckets = PageBuckets::default();

        for &page in &pages {
            let value = page.as_value();
            let title = page
                .meta
                .get("title")
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            let meta_desc = page
                .meta
                .get("description")
                .map(|d| d.trim().to_string())
                .unwrap_or_default();

            // Title and description checks are declarative rules.
            for (rule_id, bucket) in [
                ("onpage-missing-title", &mut buckets.missing_title),
                ("onpage-short-title", &mut buckets.short_title),
                ("onpage-long-title", &mut buckets.long_title),
                ("onpage-missing-meta-description", &mut buckets.missing_meta),
                ("onpage-long-urls", &mut buckets.long_urls),
            ] {
                if let Some(rule) = self.rules.get(rule_id) {
                    if rule.triggers(&value) {
                        bucket.push(page);
                    }
                }
            }
            if !title.is_empty() {
                buckets.titles.push(title);
            }
            if !meta_desc.is_empty() {
                buckets.meta_descs.push(meta_desc);
            }

            // Heading structure
            let document = Html::parse_document(&page.html);
            let h1_count = document.select(&h1_selector).count();
            if h1_count == 0 {
                buckets.missing_h1.push(page);
            } else if h1_count > 1 {
                buckets.multiple_h1.push(page);
            }

            // Image alt coverage
            let no_alt = page.images.iter().filter(|img| img.alt.is_empty()).count();
            if no_alt > 0 {
                buckets.missing_alt.push((page, no_alt));
            }

            // Content depth
            let word_count = page.text_content.split_whitespace().count();
            buckets.word_counts.push(word_count);
            if word_count < MIN_WORD_COUNT {
                buckets.thin_content.push(page);
            }

            // URL hygiene
            if let Ok(parsed) = Url::parse(&page.url) {
                let path = parsed.path();
                if path != path.to_lowercase() {
                    buckets.uppercase_urls.push(page);
                }
                let query_params = parsed.query().map(|q| q.split('&').count()).unwrap_or(0);
                if query_params > MAX_QUERY_PARAMS {
                    buckets.dynamic_urls.push(page);
                }
            }
        }

        // Site-wide duplicate detection over exact strings.
        let duplicate_titles = duplicated(&buckets.titles);
        let dup_title_urls: Vec<&PageData> = pages
            .iter()
            .filter(|p| {
                p.meta
                    .get("title")
                    .is_some_and(|t| duplicate_titles.contains_key(t.trim()))
            })
            .copied()
            .collect();
        let duplicate_descs = duplicated(&buckets.meta_descs);
        let dup_desc_urls: Vec<&PageData> = pages
            .iter()
            .filter(|p| {
                p.meta
                    .get("description")
                    .is_some_and(|d| duplicate_descs.contains_key(d.trim()))
            })
            .copied()
            .collect();

        let mut issues: Vec<Issue> = Vec::new();
        let mut push_rule_issue = |rule_id: &str, affected: &[&PageData], description: String| {
            if affected.is_empty() {
                return;
            }
            let Some(rule) = self.rules.get(rule_id) else {
                return;
            };
            issues.push(Issue {
                rule_id: rule.id.clone(),
                title: rule.name.clone(),
                description,
                severity: rule.severity,
                category: rule.category,
                affected_urls: sample(affected),
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
            });
        };

        push_rule_issue(
            "onpage-missing-title",
            &buckets.missing_title,
            format!("{} pages have no title tag.", buckets.missing_title.len()),
        );
        push_rule_issue(
            "onpage-short-title",
            &buckets.short_title,
            format!(
                "{} pages have title tags under 30 characters.",
                buckets.short_title.len()
            ),
        );
        push_rule_issue(
            "onpage-long-title",
            &buckets.long_title,
            format!(
                "{} pages have title tags over 60 characters.",
                buckets.long_title.len()
            ),
        );
        push_rule_issue(
            "onpage-missing-meta-description",
            &buckets.missing_meta,
            format!(
                "{} pages have no meta description tag.",
                buckets.missing_meta.len()
            ),
        );
        push_rule_issue(
            "onpage-long-urls",
            &buckets.long_urls,
            format!(
                "{} pages have URLs longer than 115 characters.",
                buckets.long_urls.len()
            ),
        );

        if !dup_title_urls.is_empty() {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "duplicates".to_string(),
                serde_json::json!(duplicate_titles
                    .iter()
                    .take(10)
                    .collect::<HashMap<_, _>>()),
            );
            issues.push(Issue {
                rule_id: "onpage-duplicate-title".to_string(),
                title: "Duplicate title tags across pages".to_string(),
                description: format!(
                    "{} pages share title tags with other pages.",
                    dup_title_urls.len()
                ),
                severity: Severity::High,
                category: IssueCategory::OnPage,
                affected_urls: sample(&dup_title_urls),
                affected_count: dup_title_urls.len(),
                impact_score: calculate_impact_score(
                    Severity::High,
                    dup_title_urls.len(),
                    total_pages,
                    75.0,
                ),
                effort_score: 5.0,
                recommendation: "Write unique title tags for every page. Include target keywords."
                    .to_string(),
                documentation_url: String::new(),
                metadata,
            });
        }

        if !dup_desc_urls.is_empty() {
            issues.push(Issue {
                rule_id: "onpage-duplicate-meta-description".to_string(),
                title: "Duplicate meta descriptions".to_string(),
                description: format!(
                    "{} pages share identical meta descriptions.",
                    dup_desc_urls.len()
                ),
                severity: Severity::Medium,
                category: IssueCategory::OnPage,
                affected_urls: sample(&dup_desc_urls),
                affected_count: dup_desc_urls.len(),
                impact_score: calculate_impact_score(
                    Severity::Medium,
                    dup_desc_urls.len(),
                    total_pages,
                    50.0,
                ),
                effort_score: 5.0,
                recommendation: "Write unique meta descriptions for every page.".to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        if !buckets.missing_h1.is_empty() {
            issues.push(Issue {
                rule_id: "onpage-missing-h1".to_string(),
                title: "Pages missing H1 heading".to_string(),
                description: format!("{} pages have no H1 heading.", buckets.missing_h1.len()),
                severity: Severity::High,
                category: IssueCategory::OnPage,
                affected_urls: sample(&buckets.missing_h1),
                affected_count: buckets.missing_h1.len(),
                impact_score: calculate_impact_score(
                    Severity::High,
                    buckets.missing_h1.len(),
                    total_pages,
                    65.0,
                ),
                effort_score: 5.0,
                recommendation: "Add a single, keyword-rich H1 heading to every page.".to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        if !buckets.multiple_h1.is_empty() {
            issues.push(Issue {
                rule_id: "onpage-multiple-h1".to_string(),
                title: "Pages with multiple H1 headings".to_string(),
                description: format!(
                    "{} pages have more than one H1 heading.",
                    buckets.multiple_h1.len()
                ),
                severity: Severity::Medium,
                category: IssueCategory::OnPage,
                affected_urls: sample(&buckets.multiple_h1),
                affected_count: buckets.multiple_h1.len(),
                impact_score: calculate_impact_score(
                    Severity::Medium,
                    buckets.multiple_h1.len(),
                    total_pages,
                    40.0,
                ),
                effort_score: 5.0,
                recommendation: "Use only one H1 per page. Use H2-H6 for subheadings.".to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        if !buckets.missing_alt.is_empty() {
            let total_missing: usize = buckets.missing_alt.iter().map(|(_, n)| n).sum();
            let affected: Vec<&PageData> = buckets.missing_alt.iter().map(|(p, _)| *p).collect();
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "total_images_missing_alt".to_string(),
                serde_json::json!(total_missing),
            );
            issues.push(Issue {
                rule_id: "onpage-missing-alt-text".to_string(),
                title: "Images missing alt text".to_string(),
                description: format!(
                    "{} images across {} pages are missing alt attributes.",
                    total_missing,
                    affected.len()
                ),
                severity: Severity::Medium,
                category: IssueCategory::OnPage,
                affected_urls: sample(&affected),
                affected_count: affected.len(),
                impact_score: calculate_impact_score(
                    Severity::Medium,
                    affected.len(),
                    total_pages,
                    45.0,
                ),
                effort_score: 5.0,
                recommendation: "Add descriptive alt text to all meaningful images. Use empty alt='' for decorative images.".to_string(),
                documentation_url: String::new(),
                metadata,
            });
        }

        if !buckets.thin_content.is_empty() {
            issues.push(Issue {
                rule_id: "onpage-thin-content".to_string(),
                title: "Pages with thin content".to_string(),
                description: format!(
                    "{} pages have fewer than {MIN_WORD_COUNT} words.",
                    buckets.thin_content.len()
                ),
                severity: Severity::Medium,
                category: IssueCategory::OnPage,
                affected_urls: sample(&buckets.thin_content),
                affected_count: buckets.thin_content.len(),
                impact_score: calculate_impact_score(
                    Severity::Medium,
                    buckets.thin_content.len(),
                    total_pages,
                    55.0,
                ),
                effort_score: 5.0,
                recommendation: format!(
                    "Expand content to at least {MIN_WORD_COUNT} words. Focus on depth and value."
                ),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        if !buckets.uppercase_urls.is_empty() {
            issues.push(Issue {
                rule_id: "onpage-uppercase-urls".to_string(),
                title: "URLs containing uppercase characters".to_string(),
                description: format!(
                    "{} pages have uppercase letters in their URL paths.",
                    buckets.uppercase_urls.len()
                ),
                severity: Severity::Low,
                category: IssueCategory::OnPage,
                affected_urls: sample(&buckets.uppercase_urls),
                affected_count: buckets.uppercase_urls.len(),
                impact_score: 20.0,
                effort_score: 5.0,
                recommendation:
                    "Use only lowercase URLs. Redirect uppercase variants to lowercase equivalents."
                        .to_string(),
                documentation_url: String::new(),
                metadata: serde_json::Map::new(),
            });
        }

        let score = calculate_category_score(&issues, TOTAL_CHECKS, total_pages);

        let avg_title_length = buckets.titles.iter().map(|t| t.chars().count()).sum::<usize>()
            as f64
            / buckets.titles.len().max(1) as f64;
        let avg_word_count =
            buckets.word_counts.iter().sum::<usize>() as f64 / total_pages as f64;
        let unique_titles: std::collections::HashSet<&String> = buckets.titles.iter().collect();
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "avg_title_length".to_string(),
            serde_json::json!(avg_title_length),
        );
        metadata.insert(
            "avg_word_count".to_string(),
            serde_json::json!(avg_word_count),
        );
        metadata.insert(
            "unique_titles".to_string(),
            serde_json::json!(unique_titles.len()),
        );
        metadata.insert(
            "total_titles".to_string(),
            serde_json::json!(buckets.titles.len()),
        );
        metadata.insert(
            "dynamic_url_count".to_string(),
            serde_json::json!(buckets.dynamic_urls.len()),
        );

        Ok(AuditResult {
            engine_name: ENGINE_NAME.to_string(),
            audit_id: site_data.audit_id,
            status: EngineStatus::Success,
            category: IssueCategory::OnPage,
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

/// Values appearing more than once, with their occurrence counts.
fn duplicated(values: &[String]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.clone()).or_default() += 1;
    }
    counts.retain(|_, c| *c > 1);
    counts
}
