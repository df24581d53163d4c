//! Recommendation prioritizer.
//!
//! Orders every discovered issue by a multi-factor ROI score:
//!
//! `P = 0.40*impact + 0.25*traffic_potential + 0.20*effort_ease + 0.15*severity`
//!
//! where `effort_ease = (10 - effort_score) * 10` so cheaper fixes rank
//! higher. Ties break on rule id so the ordering is total.

use crate::core::types::{EffortLevel, Issue, Recommendation, Severity};

/// Only the top slice becomes recommendations; the full issue list is
/// persisted separately.
const MAX_RECOMMENDATIONS: usize = 50;

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 100.0,
        Severity::High => 75.0,
        Severity::Medium => 50.0,
        Severity::Low => 25.0,
        Severity::Info => 0.0,
    }
}

fn traffic_potential(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 80.0,
        Severity::High => 60.0,
        Severity::Medium => 35.0,
        Severity::Low => 15.0,
        Severity::Info => 0.0,
    }
}

/// Multi-factor priority score for issue ordering.
pub fn priority_score(issue: &Issue) -> f64 {
    let impact = issue.impact_score;
    let traffic = traffic_potential(issue.severity);
    let effort_ease = (10.0 - issue.effort_score) * 10.0;
    let severity = severity_weight(issue.severity);

    let priority = impact * 0.40 + traffic * 0.25 + effort_ease * 0.20 + severity * 0.15;
    (priority * 100.0).round() / 100.0
}

pub fn effort_label(score: f64) -> EffortLevel {
    if score <= 3.0 {
        EffortLevel::Low
    } else if score <= 7.0 {
        EffortLevel::Medium
    } else {
        EffortLevel::High
    }
}

pub fn impact_label(score: f64) -> EffortLevel {
    if score >= 70.0 {
        EffortLevel::High
    } else if score >= 40.0 {
        EffortLevel::Medium
    } else {
        EffortLevel::Low
    }
}

/// Curated implementation playbooks for the most common fixes; anything
/// else gets the generic template.
fn implementation_steps(rule_id: &str) -> Vec<String> {
    let steps: &[&str] = match rule_id {
        "onpage-missing-title" => &[
            "Identify all pages without title tags using the affected URLs list",
            "Research target keywords for each page category",
            "Write unique titles following the formula: Primary Keyword | Secondary Keyword | Brand",
            "Keep titles between 30-60 characters",
            "Deploy via CMS or template modification",
            "Verify with a re-crawl within 48 hours",
        ],
        "onpage-missing-meta-description" => &[
            "Export the list of affected pages from the audit report",
            "Write compelling meta descriptions that include the primary keyword",
            "Target 70-160 characters with a clear value proposition",
            "Include a soft call-to-action where appropriate",
            "Update via CMS or developer template",
        ],
        "tech-http-pages" => &[
            "Purchase and install an SSL certificate (Let's Encrypt for free, or premium CA)",
            "Configure web server to redirect HTTP to HTTPS (301)",
            "Update internal links to use HTTPS",
            "Update canonical tags to HTTPS versions",
            "Verify in Google Search Console that HTTPS version is preferred",
            "Monitor for mixed content warnings after switch",
        ],
        "crawl-4xx-pages" => &[
            "Export all 4xx URLs from the audit report",
            "For 404s with inbound links: implement 301 redirects to the most relevant page",
            "For 404s with no external links: update or remove internal links pointing to them",
            "Set up monitoring to catch future 404s early",
            "Submit a recrawl request via Google Search Console after fixes",
        ],
        "crawl-duplicate-content" => &[
            "Identify which version of the duplicate should be canonical",
            "Add rel=canonical tags pointing to the preferred URL",
            "Alternatively, implement 301 redirects from duplicate to canonical",
            "Consolidate PageRank by removing internal links to non-canonical versions",
            "For e-commerce sites, review faceted navigation as a common cause",
        ],
        "onpage-missing-h1" => &[
            "Audit each affected page for its primary content theme",
            "Write a clear H1 that reflects the page's primary keyword focus",
            "Ensure the H1 is different from the page title (complementary, not identical)",
            "Add via CMS or template change",
        ],
        "onpage-thin-content" => &[
            "Prioritize high-traffic and high-value pages first",
            "Research what users are looking for on each page (search intent)",
            "Expand content by adding FAQs, examples, tables, or detailed explanations",
            "Target at minimum 500-1000 words for competitive keywords",
            "Add relevant internal links to related content",
            "Monitor rankings after content updates",
        ],
        _ => &[
            "Review the affected URLs listed in the audit report",
            "Implement the recommended fix on the highest-traffic pages first",
            "Validate the fix using Google Search Console or re-crawl",
            "Monitor rankings for affected pages over the next 4-8 weeks",
        ],
    };
    steps.iter().map(|s| s.to_string()).collect()
}

/// Rank all issues and produce the top recommendations with dense 1-based
/// ranks.
pub fn prioritize(issues: &[Issue], monthly_traffic: u64) -> Vec<Recommendation> {
    let mut scored: Vec<(&Issue, f64)> = issues
        .iter()
        .map(|issue| (issue, priority_score(issue)))
        .collect();
    scored.sort_by(|(a, pa), (b, pb)| {
        pb.partial_cmp(pa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    scored
        .into_iter()
        .take(MAX_RECOMMENDATIONS)
        .enumerate()
        .map(|(index, (issue, _priority))| {
            let traffic_gain = monthly_traffic as f64
                * (traffic_potential(issue.severity) / 100.0)
                * (issue.impact_score / 100.0);
            let revenue_impact = traffic_gain * 0.02 * 100.0;

            Recommendation {
                issue_id: issue.rule_id.clone(),
                priority_rank: index + 1,
                title: issue.title.clone(),
                description: if issue.recommendation.is_empty() {
                    issue.description.clone()
                } else {
                    issue.recommendation.clone()
                },
                effort: effort_label(issue.effort_score),
                impact: impact_label(issue.impact_score),
                estimated_traffic_gain: traffic_gain.round(),
                estimated_revenue_impact: (revenue_impact * 100.0).round() / 100.0,
                implementation_steps: implementation_steps(&issue.rule_id),
            }
        })
        .collect()
}
