//! Declarative rule engine driving per-page SEO checks.
//!
//! Rules are data: a condition list over dot-notation paths into the page
//! model, combined with AND/OR. Engines evaluate rules against the JSON
//! projection of a `PageData` and turn triggered rules into issues. The
//! registry is built once at startup and is immutable afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::types::{IssueCategory, Severity};

// ---------------------------------------------------------------------------
// Rule schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Contains,
    NotContains,
    Matches,
    NotMatches,
    Exists,
    NotExists,
    In,
    NotIn,
    LengthLt,
    LengthGt,
    LengthEq,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Len,
    Lower,
    Upper,
    Strip,
    Count,
    Bool,
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionLogic {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Page,
    Site,
    All,
}

/// A single condition evaluated against page data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-notation path, e.g. `meta.title` or `images.0.alt`.
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub transform: Option<Transform>,
}

/// Complete rule definition. The atomic unit of SEO check logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub conditions: Vec<Condition>,
    #[serde(default = "default_logic")]
    pub condition_logic: ConditionLogic,
    #[serde(default = "default_impact")]
    pub impact_score: f64,
    #[serde(default = "default_effort")]
    pub effort_score: f64,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub documentation_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scope")]
    pub applies_to: RuleScope,
}

fn default_logic() -> ConditionLogic {
    ConditionLogic::And
}
fn default_impact() -> f64 {
    50.0
}
fn default_effort() -> f64 {
    5.0
}
fn default_enabled() -> bool {
    true
}
fn default_scope() -> RuleScope {
    RuleScope::Page
}

impl Rule {
    /// A rule triggers (an issue is emitted) when its combined condition
    /// expression is true. Evaluation never fails; operator errors count
    /// as false.
    pub fn triggers(&self, page: &Value) -> bool {
        let mut results = self.conditions.iter().map(|c| c.holds(page));
        match self.condition_logic {
            ConditionLogic::And => results.all(|r| r),
            ConditionLogic::Or => results.any(|r| r),
        }
    }
}

// ---------------------------------------------------------------------------
// Field access and transforms
// ---------------------------------------------------------------------------

/// Resolve a dot-notation path into nested maps and arrays. Integer segments
/// index into arrays. Missing keys yield `Null`.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&Value::Null),
            _ => return &Value::Null,
        };
    }
    current
}

fn apply_transform(value: &Value, transform: Option<Transform>) -> Value {
    let Some(transform) = transform else {
        return value.clone();
    };
    match transform {
        Transform::Len | Transform::Count => Value::from(value_len(value).unwrap_or(0) as u64),
        Transform::Lower => match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other.clone(),
        },
        Transform::Upper => match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other.clone(),
        },
        Transform::Strip => match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        },
        Transform::Bool => Value::Bool(!is_empty_value(value)),
        Transform::Int => Value::from(coerce_f64(value).unwrap_or(0.0) as i64),
        Transform::Float => Value::from(coerce_f64(value).unwrap_or(0.0)),
    }
}

fn value_len(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

/// Null, empty string and empty sequence all count as absent.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Object(map) => map.is_empty(),
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

impl Condition {
    pub fn holds(&self, page: &Value) -> bool {
        let raw = resolve_path(page, &self.field);
        let left = apply_transform(raw, self.transform);

        // Absent left operand: most operators are vacuously false; the
        // negated ones are vacuously true.
        if is_absent(&left) {
            return matches!(
                self.operator,
                Operator::NotContains
                    | Operator::NotMatches
                    | Operator::NotExists
                    | Operator::LengthLt
            );
        }

        let right = &self.value;
        match self.operator {
            Operator::Eq => left == *right,
            Operator::Ne => left != *right,
            Operator::Lt => compare(&left, right, |o| o == std::cmp::Ordering::Less),
            Operator::Gt => compare(&left, right, |o| o == std::cmp::Ordering::Greater),
            Operator::Lte => compare(&left, right, |o| o != std::cmp::Ordering::Greater),
            Operator::Gte => compare(&left, right, |o| o != std::cmp::Ordering::Less),
            Operator::Contains => contains(&left, right),
            Operator::NotContains => !contains(&left, right),
            Operator::Matches => regex_matches(&left, right),
            Operator::NotMatches => !regex_matches(&left, right),
            Operator::Exists => true,
            Operator::NotExists => false,
            Operator::In => member_of(&left, right),
            Operator::NotIn => !member_of(&left, right),
            Operator::LengthLt => length_cmp(&left, right, |l, r| l < r),
            Operator::LengthGt => length_cmp(&left, right, |l, r| l > r),
            Operator::LengthEq => length_cmp(&left, right, |l, r| l == r),
            Operator::StartsWith => match right.as_str() {
                Some(prefix) => coerce_string(&left).starts_with(prefix),
                None => false,
            },
            Operator::EndsWith => match right.as_str() {
                Some(suffix) => coerce_string(&left).ends_with(suffix),
                None => false,
            },
        }
    }
}

fn is_absent(value: &Value) -> bool {
    matches!(value, Value::Null)
        || matches!(value, Value::String(s) if s.is_empty())
        || matches!(value, Value::Array(items) if items.is_empty())
}

fn compare(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let ordering = match (coerce_f64(left), coerce_f64(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Some(l.cmp(r)),
            _ => None,
        },
    };
    match ordering {
        Some(o) => check(o),
        None => {
            debug!(?left, ?right, "incomparable operands in rule condition");
            false
        }
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::String(haystack) => match right.as_str() {
            Some(needle) => haystack.contains(needle),
            None => false,
        },
        Value::Array(items) => items.contains(right),
        _ => false,
    }
}

fn member_of(left: &Value, right: &Value) -> bool {
    match right {
        Value::Array(items) => items.contains(left),
        Value::String(s) => match left.as_str() {
            Some(l) => s.contains(l),
            None => false,
        },
        _ => false,
    }
}

fn regex_matches(left: &Value, right: &Value) -> bool {
    let Some(pattern) = right.as_str() else {
        return false;
    };
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(&coerce_string(left)),
        Err(e) => {
            debug!(pattern, error = %e, "invalid rule regex");
            false
        }
    }
}

fn length_cmp(left: &Value, right: &Value, check: impl Fn(usize, usize) -> bool) -> bool {
    let Some(len) = value_len(left) else {
        return false;
    };
    match right.as_u64() {
        Some(r) => check(len, r as usize),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable rule registry keyed by id. Built once at process start;
/// disabled rules and rules with malformed ids are skipped at load.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Rule>,
}

impl RuleRegistry {
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let id_pattern = regex::Regex::new("^[a-z][a-z0-9_-]{2,63}$")
            .expect("rule id pattern is a valid regex");
        let mut map = BTreeMap::new();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            if !id_pattern.is_match(&rule.id) {
                tracing::warn!(rule_id = %rule.id, "skipping rule with malformed id");
                continue;
            }
            map.insert(rule.id.clone(), rule);
        }
        tracing::info!(total = map.len(), "rules loaded");
        Self { rules: map }
    }

    /// Registry with the built-in declarative rule set.
    pub fn builtin() -> Self {
        let rules: Vec<Rule> =
            serde_json::from_str(BUILTIN_RULES).expect("built-in rule definitions parse");
        Self::from_rules(rules)
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn by_category(&self, category: IssueCategory) -> Vec<&Rule> {
        self.rules
            .values()
            .filter(|r| r.category == category)
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in per-page rule definitions. Kept as JSON so new checks can be
/// added without touching evaluator code.
const BUILTIN_RULES: &str = r#"[
  {
    "id": "tech-meta-noindex",
    "name": "Pages excluded from indexing via meta robots",
    "description": "Pages carry a meta robots or googlebot noindex directive.",
    "category": "technical",
    "severity": "high",
    "condition_logic": "OR",
    "conditions": [
      {"field": "meta.robots", "operator": "contains", "value": "noindex", "transform": "lower"},
      {"field": "meta.googlebot", "operator": "contains", "value": "noindex", "transform": "lower"}
    ],
    "impact_score": 75.0,
    "effort_score": 2.0,
    "recommendation": "Review meta robots tags. Remove noindex from pages intended for indexation."
  },
  {
    "id": "tech-xrobots-noindex",
    "name": "Pages blocked via X-Robots-Tag: noindex",
    "description": "Pages are excluded from indexing via the X-Robots-Tag HTTP header.",
    "category": "technical",
    "severity": "high",
    "conditions": [
      {"field": "headers.x-robots-tag", "operator": "contains", "value": "noindex", "transform": "lower"}
    ],
    "impact_score": 75.0,
    "effort_score": 3.0,
    "recommendation": "Review X-Robots-Tag directives. Remove noindex from pages that should be indexed."
  },
  {
    "id": "onpage-missing-title",
    "name": "Pages missing title tags",
    "description": "Pages have no title tag.",
    "category": "on_page",
    "severity": "critical",
    "conditions": [
      {"field": "meta.title", "operator": "not_exists", "transform": "strip"}
    ],
    "impact_score": 95.0,
    "effort_score": 2.0,
    "recommendation": "Add unique, descriptive title tags (30-60 chars) to every page.",
    "documentation_url": "https://developers.google.com/search/docs/appearance/title-link"
  },
  {
    "id": "onpage-short-title",
    "name": "Title tags too short",
    "description": "Pages have title tags under 30 characters.",
    "category": "on_page",
    "severity": "medium",
    "conditions": [
      {"field": "meta.title", "operator": "exists", "transform": "strip"},
      {"field": "meta.title", "operator": "length_lt", "value": 30, "transform": "strip"}
    ],
    "impact_score": 55.0,
    "effort_score": 2.0,
    "recommendation": "Expand title tags to 30-60 characters."
  },
  {
    "id": "onpage-long-title",
    "name": "Title tags too long (will be truncated)",
    "description": "Pages have title tags over 60 characters.",
    "category": "on_page",
    "severity": "medium",
    "conditions": [
      {"field": "meta.title", "operator": "length_gt", "value": 60, "transform": "strip"}
    ],
    "impact_score": 45.0,
    "effort_score": 2.0,
    "recommendation": "Trim title tags to under 60 characters."
  },
  {
    "id": "onpage-missing-meta-description",
    "name": "Pages missing meta descriptions",
    "description": "Pages have no meta description tag.",
    "category": "on_page",
    "severity": "high",
    "conditions": [
      {"field": "meta.description", "operator": "not_exists", "transform": "strip"}
    ],
    "impact_score": 70.0,
    "effort_score": 3.0,
    "recommendation": "Write compelling meta descriptions (70-160 chars) to improve CTR from search results."
  },
  {
    "id": "onpage-long-urls",
    "name": "URLs exceeding recommended length",
    "description": "Pages have URLs longer than 115 characters.",
    "category": "on_page",
    "severity": "low",
    "conditions": [
      {"field": "url", "operator": "length_gt", "value": 115}
    ],
    "impact_score": 25.0,
    "effort_score": 6.0,
    "recommendation": "Keep URLs short, descriptive, and keyword-rich."
  }
]"#;

// ---------------------------------------------------------------------------
// Shared scoring math
// ---------------------------------------------------------------------------

pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 25.0,
        Severity::High => 15.0,
        Severity::Medium => 8.0,
        Severity::Low => 3.0,
        Severity::Info => 0.0,
    }
}

fn severity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 1.0,
        Severity::High => 0.75,
        Severity::Medium => 0.50,
        Severity::Low => 0.25,
        Severity::Info => 0.0,
    }
}

/// Coverage ratio of an issue over the analyzed page set.
pub fn coverage(affected_count: usize, total_pages: usize) -> f64 {
    (affected_count as f64 / total_pages.max(1) as f64).min(1.0)
}

/// Impact of one issue (0-100): rule base score scaled by severity and by
/// how much of the site it touches.
pub fn calculate_impact_score(
    severity: Severity,
    affected_count: usize,
    total_pages: usize,
    rule_impact_score: f64,
) -> f64 {
    let impact = rule_impact_score
        * severity_multiplier(severity)
        * (0.3 + 0.7 * coverage(affected_count, total_pages));
    (impact.min(100.0) * 100.0).round() / 100.0
}

/// Category score (0-100): start at 100 and deduct per issue by severity
/// weighted with coverage, normalized against the worst case where every
/// check fails.
pub fn calculate_category_score(
    issues: &[crate::core::types::Issue],
    total_checks: usize,
    pages_analyzed: usize,
) -> f64 {
    if total_checks == 0 {
        return 100.0;
    }

    let penalty: f64 = issues
        .iter()
        .map(|issue| {
            severity_weight(issue.severity)
                * (0.5 + 0.5 * coverage(issue.affected_count, pages_analyzed))
        })
        .sum();

    let weight_sum: f64 = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ]
    .iter()
    .map(|s| severity_weight(*s))
    .sum();
    let max_penalty = weight_sum * total_checks.min(10) as f64;

    let score = (100.0 - (penalty / max_penalty.max(1.0)) * 100.0).max(0.0);
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Issue, PageData};
    use serde_json::json;

    fn page_value(title: &str, description: &str) -> Value {
        let mut page = PageData::new("https://example.com/page", 200);
        if !title.is_empty() {
            page.meta.insert("title".into(), title.into());
        }
        if !description.is_empty() {
            page.meta.insert("description".into(), description.into());
        }
        page.as_value()
    }

    #[test]
    fn resolve_path_walks_maps_and_arrays() {
        let data = json!({"meta": {"title": "Hello"}, "links": ["a", "b"]});
        assert_eq!(resolve_path(&data, "meta.title"), &json!("Hello"));
        assert_eq!(resolve_path(&data, "links.1"), &json!("b"));
        assert_eq!(resolve_path(&data, "meta.missing"), &Value::Null);
        assert_eq!(resolve_path(&data, "links.9"), &Value::Null);
    }

    #[test]
    fn len_transform_counts_chars_and_elements() {
        assert_eq!(apply_transform(&json!("abcd"), Some(Transform::Len)), json!(4));
        assert_eq!(apply_transform(&json!(["a", "b"]), Some(Transform::Count)), json!(2));
        assert_eq!(apply_transform(&Value::Null, Some(Transform::Len)), json!(0));
    }

    #[test]
    fn null_left_operand_semantics() {
        let page = json!({});
        let holds = |op: Operator, value: Value| {
            Condition {
                field: "missing".into(),
                operator: op,
                value,
                transform: None,
            }
            .holds(&page)
        };

        assert!(!holds(Operator::Eq, json!("x")));
        assert!(!holds(Operator::Contains, json!("x")));
        assert!(!holds(Operator::Exists, Value::Null));
        assert!(!holds(Operator::LengthGt, json!(3)));
        assert!(holds(Operator::NotContains, json!("x")));
        assert!(holds(Operator::NotMatches, json!("x")));
        assert!(holds(Operator::NotExists, Value::Null));
        assert!(holds(Operator::LengthLt, json!(3)));
    }

    #[test]
    fn matches_operator_uses_regex_search() {
        let page = json!({"html": "<form action=\"http://insecure.example\">"});
        let cond = Condition {
            field: "html".into(),
            operator: Operator::Matches,
            value: json!("(?i)(src|href|action)\\s*=\\s*[\"']http://"),
            transform: None,
        };
        assert!(cond.holds(&page));
    }

    #[test]
    fn invalid_regex_yields_false_not_panic() {
        let page = json!({"html": "abc"});
        let cond = Condition {
            field: "html".into(),
            operator: Operator::Matches,
            value: json!("("),
            transform: None,
        };
        assert!(!cond.holds(&page));
    }

    #[test]
    fn title_length_boundaries() {
        let registry = RuleRegistry::builtin();
        let short = registry.get("onpage-short-title").unwrap();
        let long = registry.get("onpage-long-title").unwrap();

        // Exactly 30 and 60 chars: neither short nor long.
        let ok30 = page_value(&"t".repeat(30), "d");
        let ok60 = page_value(&"t".repeat(60), "d");
        assert!(!short.triggers(&ok30));
        assert!(!long.triggers(&ok60));

        let too_short = page_value(&"t".repeat(29), "d");
        let too_long = page_value(&"t".repeat(61), "d");
        assert!(short.triggers(&too_short));
        assert!(long.triggers(&too_long));
    }

    #[test]
    fn missing_title_rule_triggers_on_blank() {
        let registry = RuleRegistry::builtin();
        let rule = registry.get("onpage-missing-title").unwrap();
        assert!(rule.triggers(&page_value("", "desc")));
        assert!(rule.triggers(&page_value("   ", "desc")));
        assert!(!rule.triggers(&page_value("A perfectly adequate title", "desc")));
    }

    #[test]
    fn or_logic_for_meta_noindex() {
        let registry = RuleRegistry::builtin();
        let rule = registry.get("tech-meta-noindex").unwrap();

        let mut page = PageData::new("https://example.com/", 200);
        page.meta.insert("googlebot".into(), "NOINDEX, nofollow".into());
        assert!(rule.triggers(&page.as_value()));

        let clean = PageData::new("https://example.com/", 200);
        assert!(!rule.triggers(&clean.as_value()));
    }

    #[test]
    fn xrobots_rule_reads_lowercased_headers() {
        let registry = RuleRegistry::builtin();
        let rule = registry.get("tech-xrobots-noindex").unwrap();

        let mut page = PageData::new("https://example.com/", 200);
        page.headers
            .push(("X-Robots-Tag".into(), "NoIndex".into()));
        assert!(rule.triggers(&page.as_value()));
    }

    #[test]
    fn registry_skips_disabled_and_malformed_ids() {
        let good = Rule {
            id: "my-rule".into(),
            name: "n".into(),
            description: "d".into(),
            category: IssueCategory::Technical,
            severity: Severity::Low,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            impact_score: 50.0,
            effort_score: 5.0,
            recommendation: String::new(),
            documentation_url: String::new(),
            enabled: true,
            applies_to: RuleScope::Page,
        };
        let disabled = Rule {
            id: "off-rule".into(),
            enabled: false,
            ..good.clone()
        };
        let bad_id = Rule {
            id: "Bad_ID".into(),
            ..good.clone()
        };
        let registry = RuleRegistry::from_rules(vec![good, disabled, bad_id]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("my-rule").is_some());
    }

    #[test]
    fn impact_score_scales_with_coverage() {
        // Full coverage: base * mult * 1.0
        let full = calculate_impact_score(Severity::Critical, 10, 10, 90.0);
        assert_eq!(full, 90.0);
        // No coverage floor is 0.3 of the severity-scaled base.
        let sparse = calculate_impact_score(Severity::Critical, 0, 10, 90.0);
        assert_eq!(sparse, 27.0);
        assert!(calculate_impact_score(Severity::High, 1000, 10, 100.0) <= 100.0);
    }

    #[test]
    fn category_score_empty_checks_is_perfect() {
        assert_eq!(calculate_category_score(&[], 0, 10), 100.0);
    }

    #[test]
    fn category_score_decreases_with_issues() {
        let issue = Issue {
            rule_id: "onpage-missing-title".into(),
            title: "t".into(),
            description: "d".into(),
            severity: Severity::Critical,
            category: IssueCategory::OnPage,
            affected_urls: vec![],
            affected_count: 10,
            impact_score: 90.0,
            effort_score: 2.0,
            recommendation: String::new(),
            documentation_url: String::new(),
            metadata: serde_json::Map::new(),
        };
        let with_issue = calculate_category_score(&[issue], 12, 10);
        let without = calculate_category_score(&[], 12, 10);
        assert!(with_issue < without);
        assert!(with_issue >= 0.0);
    }
}
