//! Score aggregation: weighted overall score, confidence, and the revenue
//! impact model.

use serde::{Deserialize, Serialize};

use crate::core::types::{
    grade_for_score, AuditResult, CategoryScore, EngineStatus, Issue, Severity, SiteData,
};

/// Engines a fully-populated deployment runs; confidence is measured
/// against this expectation even when fewer are wired in.
const EXPECTED_ENGINES: usize = 8;

/// Pages needed for full page-coverage confidence.
const PAGE_COVERAGE_BASELINE: f64 = 1000.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// The aggregate the orchestrator persists and stamps onto the audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringSummary {
    pub overall_score: f64,
    pub overall_grade: String,
    pub confidence_score: f64,
    pub estimated_revenue_impact: f64,
    pub category_scores: Vec<CategoryScore>,
    pub issue_summary: IssueSummary,
    pub engines_run: usize,
    pub engines_successful: usize,
    /// Every issue from every non-failed engine, in engine order.
    pub all_issues: Vec<Issue>,
}

/// Aggregate engine results into the overall score, confidence, and revenue
/// estimate. Failed engines are excluded from the weighted mean but still
/// count against confidence.
pub fn evaluate(site_data: &SiteData, engine_results: &[AuditResult]) -> ScoringSummary {
    let weights = &site_data.settings.weights;

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut category_scores = Vec::new();
    let mut all_issues: Vec<Issue> = Vec::new();

    for result in engine_results {
        if result.status == EngineStatus::Failed {
            continue;
        }
        let weight = weights.weight(result.category);
        if weight == 0.0 {
            continue;
        }

        category_scores.push(CategoryScore {
            category: result.category,
            score: result.score,
            grade: result.grade.clone(),
            issues_count: result.issues.len(),
            critical_count: count_severity(&result.issues, Severity::Critical),
            high_count: count_severity(&result.issues, Severity::High),
            weight,
        });
        all_issues.extend(result.issues.iter().cloned());

        weighted_sum += result.score * weight;
        total_weight += weight;
    }

    let overall_score = if total_weight > 0.0 {
        round2(weighted_sum / total_weight)
    } else {
        0.0
    };

    let confidence_score = calculate_confidence_score(engine_results, site_data.pages.len());
    let estimated_revenue_impact =
        estimate_revenue_impact(&all_issues, site_data.settings.monthly_traffic);

    let issue_summary = IssueSummary {
        total: all_issues.len(),
        critical: count_severity(&all_issues, Severity::Critical),
        high: count_severity(&all_issues, Severity::High),
        medium: count_severity(&all_issues, Severity::Medium),
        low: count_severity(&all_issues, Severity::Low),
    };

    ScoringSummary {
        overall_score,
        overall_grade: grade_for_score(overall_score).to_string(),
        confidence_score,
        estimated_revenue_impact,
        category_scores,
        issue_summary,
        engines_run: engine_results.len(),
        engines_successful: engine_results
            .iter()
            .filter(|r| r.status == EngineStatus::Success)
            .count(),
        all_issues,
    }
}

/// Confidence (0-100): how complete and reliable is this audit?
pub fn calculate_confidence_score(engine_results: &[AuditResult], pages_crawled: usize) -> f64 {
    let successful = engine_results
        .iter()
        .filter(|r| r.status == EngineStatus::Success)
        .count();
    let engine_coverage = successful as f64 / EXPECTED_ENGINES as f64;
    let page_coverage = (pages_crawled as f64 / PAGE_COVERAGE_BASELINE).min(1.0);
    round2((engine_coverage * 0.6 + page_coverage * 0.4) * 100.0)
}

fn base_traffic_lift(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 0.15,
        Severity::High => 0.08,
        Severity::Medium => 0.03,
        Severity::Low => 0.01,
        Severity::Info => 0.0,
    }
}

/// Estimated monthly revenue impact of the discovered issues, using a flat
/// 2% conversion rate and a 100-unit order value.
pub fn estimate_revenue_impact(issues: &[Issue], monthly_traffic: u64) -> f64 {
    const CONVERSION_RATE: f64 = 0.02;
    const ORDER_VALUE: f64 = 100.0;

    let total: f64 = issues
        .iter()
        .map(|issue| {
            let coverage = (issue.affected_count as f64 / 1000.0).min(1.0);
            let lift = monthly_traffic as f64
                * base_traffic_lift(issue.severity)
                * coverage
                * (issue.impact_score / 100.0);
            lift * CONVERSION_RATE * ORDER_VALUE
        })
        .sum();
    round2(total)
}

fn count_severity(issues: &[Issue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
