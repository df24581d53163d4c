//! Audit orchestration.
//!
//! Drives the stage machine `pending -> crawling -> analyzing -> complete |
//! failed`: crawl, fan the analysis engines out in parallel, aggregate with
//! scoring, rank with the prioritizer, and persist through the `AuditStore`
//! sinks between stages. A failed engine never fails the audit; a failed
//! crawl does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::config::AuditConfig;
use crate::core::rules::RuleRegistry;
use crate::core::types::{
    AuditResult, AuditStatus, CrawlStats, EngineStatus, PageData, Recommendation, SiteData,
};
use crate::crawler::Crawler;
use crate::engines::scoring::{self, ScoringSummary};
use crate::engines::{execute, onpage::OnPageEngine, prioritize, technical::TechnicalSeoEngine,
    AuditEngine};

/// Retries per engine before a failure is accepted.
const MAX_ENGINE_RETRIES: u32 = 2;

/// Base of the linearly growing pause between engine retries.
const ENGINE_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Retry policy for transient persistence failures.
fn store_backoff() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..Default::default()
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("crawl failed: {0}")]
    Crawl(String),
    #[error("persistence failed: {0}")]
    Store(String),
}

/// Optional columns for a status transition. Mirrors what the audit row
/// carries; sinks ignore what they do not store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_crawled: Option<usize>,
    pub overall_score: Option<f64>,
    pub overall_grade: Option<String>,
    pub confidence_score: Option<f64>,
    pub estimated_revenue_impact: Option<f64>,
    pub issues_found: Option<usize>,
    pub critical_issues: Option<usize>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// Persistence contract. The core never defines the storage schema; these
/// sinks are invoked between stages and may be backed by anything.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn persist_pages(
        &self,
        audit_id: Uuid,
        site_id: Uuid,
        pages: &[PageData],
    ) -> anyhow::Result<()>;

    async fn persist_engine_result(&self, audit_id: Uuid, result: &AuditResult)
        -> anyhow::Result<()>;

    async fn persist_final_results(
        &self,
        audit_id: Uuid,
        scoring: &ScoringSummary,
        recommendations: &[Recommendation],
    ) -> anyhow::Result<()>;

    async fn update_audit_status(
        &self,
        audit_id: Uuid,
        status: AuditStatus,
        fields: StatusFields,
    ) -> anyhow::Result<()>;
}

/// No-op store for the CLI runner and for tests.
pub struct NullStore;

#[async_trait]
impl AuditStore for NullStore {
    async fn persist_pages(
        &self,
        _audit_id: Uuid,
        _site_id: Uuid,
        _pages: &[PageData],
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn persist_engine_result(
        &self,
        _audit_id: Uuid,
        _result: &AuditResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn persist_final_results(
        &self,
        _audit_id: Uuid,
        _scoring: &ScoringSummary,
        _recommendations: &[Recommendation],
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn update_audit_status(
        &self,
        _audit_id: Uuid,
        _status: AuditStatus,
        _fields: StatusFields,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The finished audit as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub site_id: Uuid,
    pub root_url: String,
    pub status: AuditStatus,
    pub overall_score: f64,
    pub overall_grade: String,
    pub confidence_score: f64,
    pub estimated_revenue_impact: f64,
    pub crawl_stats: CrawlStats,
    pub engine_results: Vec<AuditResult>,
    pub scoring: ScoringSummary,
    pub recommendations: Vec<Recommendation>,
    pub duration_seconds: f64,
}

pub struct AuditPipeline<S: AuditStore> {
    store: S,
    engines: Vec<Box<dyn AuditEngine>>,
}

impl<S: AuditStore> AuditPipeline<S> {
    /// Pipeline with the standard engine set.
    pub fn new(store: S, rules: Arc<RuleRegistry>) -> Self {
        let engines: Vec<Box<dyn AuditEngine>> = vec![
            Box::new(TechnicalSeoEngine::new(rules.clone())),
            Box::new(OnPageEngine::new(rules)),
        ];
        Self { store, engines }
    }

    /// Pipeline with a custom engine set.
    pub fn with_engines(store: S, engines: Vec<Box<dyn AuditEngine>>) -> Self {
        Self { store, engines }
    }

    /// Run one complete audit for `root_url`.
    pub async fn run(
        &self,
        root_url: &str,
        config: AuditConfig,
    ) -> Result<AuditReport, AuditError> {
        config.validate().map_err(AuditError::Config)?;
        let mut site_data = SiteData::new(root_url, config.sanitized());
        if site_data.domain.is_empty() {
            return Err(AuditError::Config(format!("invalid root URL: {root_url}")));
        }

        let started = Instant::now();
        info!(audit_id = %site_data.audit_id, root_url, "audit starting");

        self.transition(
            &site_data,
            AuditStatus::Crawling,
            StatusFields {
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;

        // Stage 1: crawl. A crawl failure fails the whole audit.
        let crawl_result = match Crawler::run(&mut site_data).await {
            Ok(result) => result,
            Err(e) => {
                error!(audit_id = %site_data.audit_id, error = %e, "crawl failed");
                let _ = self
                    .store
                    .update_audit_status(
                        site_data.audit_id,
                        AuditStatus::Failed,
                        StatusFields {
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                return Err(AuditError::Crawl(e.to_string()));
            }
        };

        {
            let store = &self.store;
            let audit_id = site_data.audit_id;
            let site_id = site_data.site_id;
            let pages = &site_data.pages;
            backoff::future::retry(store_backoff(), || async move {
                store
                    .persist_pages(audit_id, site_id, pages)
                    .await
                    .map_err(backoff::Error::transient)
            })
            .await
            .map_err(|e| AuditError::Store(e.to_string()))?;

            let crawl_ref = &crawl_result;
            backoff::future::retry(store_backoff(), || async move {
                store
                    .persist_engine_result(audit_id, crawl_ref)
                    .await
                    .map_err(backoff::Error::transient)
            })
            .await
            .map_err(|e| AuditError::Store(e.to_string()))?;
        }

        self.transition(
            &site_data,
            AuditStatus::Analyzing,
            StatusFields {
                pages_crawled: Some(site_data.pages.len()),
                ..Default::default()
            },
        )
        .await?;

        self.finalize(site_data, crawl_result, started).await
    }

    /// Stages 2-4: fan out the analysis engines, score, prioritize, persist.
    async fn finalize(
        &self,
        site_data: SiteData,
        crawl_result: AuditResult,
        started: Instant,
    ) -> Result<AuditReport, AuditError> {
        let soft_timeout = Duration::from_secs(site_data.settings.engine_soft_timeout_secs);

        let analysis_results: Vec<AuditResult> = futures::future::join_all(
            self.engines
                .iter()
                .map(|engine| run_engine_with_retries(engine.as_ref(), &site_data, soft_timeout)),
        )
        .await;

        // The crawl contributes the crawlability category alongside the
        // analysis engines.
        let mut engine_results = vec![crawl_result];
        engine_results.extend(analysis_results);

        for result in &engine_results[1..] {
            let store = &self.store;
            let audit_id = site_data.audit_id;
            backoff::future::retry(store_backoff(), || async move {
                store
                    .persist_engine_result(audit_id, result)
                    .await
                    .map_err(backoff::Error::transient)
            })
            .await
            .map_err(|e| AuditError::Store(e.to_string()))?;
        }

        let summary = scoring::evaluate(&site_data, &engine_results);
        let recommendations =
            prioritize::prioritize(&summary.all_issues, site_data.settings.monthly_traffic);

        {
            let store = &self.store;
            let audit_id = site_data.audit_id;
            let summary_ref = &summary;
            let recommendations_ref = &recommendations;
            backoff::future::retry(store_backoff(), || async move {
                store
                    .persist_final_results(audit_id, summary_ref, recommendations_ref)
                    .await
                    .map_err(backoff::Error::transient)
            })
            .await
            .map_err(|e| AuditError::Store(e.to_string()))?;
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        self.transition(
            &site_data,
            AuditStatus::Complete,
            StatusFields {
                completed_at: Some(Utc::now()),
                overall_score: Some(summary.overall_score),
                overall_grade: Some(summary.overall_grade.clone()),
                confidence_score: Some(summary.confidence_score),
                estimated_revenue_impact: Some(summary.estimated_revenue_impact),
                issues_found: Some(summary.issue_summary.total),
                critical_issues: Some(summary.issue_summary.critical),
                duration_seconds: Some(duration_seconds),
                ..Default::default()
            },
        )
        .await?;

        info!(
            audit_id = %site_data.audit_id,
            score = summary.overall_score,
            grade = %summary.overall_grade,
            issues = summary.issue_summary.total,
            "audit complete"
        );

        Ok(AuditReport {
            audit_id: site_data.audit_id,
            site_id: site_data.site_id,
            root_url: site_data.root_url.clone(),
            status: AuditStatus::Complete,
            overall_score: summary.overall_score,
            overall_grade: summary.overall_grade.clone(),
            confidence_score: summary.confidence_score,
            estimated_revenue_impact: summary.estimated_revenue_impact,
            crawl_stats: site_data.crawl_stats.clone(),
            engine_results,
            scoring: summary,
            recommendations,
            duration_seconds,
        })
    }

    async fn transition(
        &self,
        site_data: &SiteData,
        status: AuditStatus,
        fields: StatusFields,
    ) -> Result<(), AuditError> {
        self.store
            .update_audit_status(site_data.audit_id, status, fields)
            .await
            .map_err(|e| AuditError::Store(e.to_string()))
    }
}

/// Run one engine under its soft time limit, retrying failures with a
/// linearly growing pause. The last failure is accepted rather than
/// propagated.
async fn run_engine_with_retries(
    engine: &dyn AuditEngine,
    site_data: &SiteData,
    soft_timeout: Duration,
) -> AuditResult {
    let mut attempt: u32 = 0;
    loop {
        let result = match tokio::time::timeout(soft_timeout, execute(engine, site_data)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    engine = engine.name(),
                    timeout_secs = soft_timeout.as_secs(),
                    "engine hit soft time limit"
                );
                let mut failed = AuditResult::failed(
                    engine.name(),
                    site_data.audit_id,
                    engine.category(),
                    "engine execution timed out",
                );
                failed.execution_time_ms = soft_timeout.as_secs_f64() * 1000.0;
                failed
            }
        };

        if result.status != EngineStatus::Failed || attempt >= MAX_ENGINE_RETRIES {
            return result;
        }
        attempt += 1;
        let pause = ENGINE_RETRY_BACKOFF * attempt;
        warn!(
            engine = engine.name(),
            attempt,
            pause_secs = pause.as_secs(),
            "retrying failed engine"
        );
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IssueCategory;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Store that records every sink invocation.
    #[derive(Default)]
    struct RecordingStore {
        events: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }
    }

    #[async_trait]
    impl AuditStore for RecordingStore {
        async fn persist_pages(
            &self,
            _audit_id: Uuid,
            _site_id: Uuid,
            pages: &[PageData],
        ) -> anyhow::Result<()> {
            self.push(format!("pages:{}", pages.len()));
            Ok(())
        }
        async fn persist_engine_result(
            &self,
            _audit_id: Uuid,
            result: &AuditResult,
        ) -> anyhow::Result<()> {
            self.push(format!("engine:{}", result.engine_name));
            Ok(())
        }
        async fn persist_final_results(
            &self,
            _audit_id: Uuid,
            scoring: &ScoringSummary,
            recommendations: &[Recommendation],
        ) -> anyhow::Result<()> {
            self.push(format!(
                "final:{}:{}",
                scoring.issue_summary.total,
                recommendations.len()
            ));
            Ok(())
        }
        async fn update_audit_status(
            &self,
            _audit_id: Uuid,
            status: AuditStatus,
            _fields: StatusFields,
        ) -> anyhow::Result<()> {
            self.push(format!("status:{status:?}"));
            Ok(())
        }
    }

    struct FixedEngine {
        name: &'static str,
        category: IssueCategory,
        score: f64,
        fail: bool,
    }

    #[async_trait]
    impl AuditEngine for FixedEngine {
        fn name(&self) -> &'static str {
            self.name
        }
        fn category(&self) -> IssueCategory {
            self.category
        }
        async fn run(&self, site_data: &SiteData) -> anyhow::Result<AuditResult> {
            if self.fail {
                return Err(anyhow!("engine down"));
            }
            Ok(AuditResult {
                engine_name: self.name.to_string(),
                audit_id: site_data.audit_id,
                status: EngineStatus::Success,
                category: self.category,
                score: self.score,
                grade: crate::core::types::grade_for_score(self.score).to_string(),
                issues: Vec::new(),
                recommendations: Vec::new(),
                metadata: serde_json::Map::new(),
                execution_time_ms: 0.0,
                pages_analyzed: site_data.pages.len(),
                error_message: None,
            })
        }
    }

    fn site() -> SiteData {
        let mut site = SiteData::new("https://example.com/", AuditConfig::default());
        site.pages = vec![PageData::new("https://example.com/", 200)];
        site
    }

    fn crawl_result(site_data: &SiteData) -> AuditResult {
        AuditResult {
            engine_name: "crawler".to_string(),
            audit_id: site_data.audit_id,
            status: EngineStatus::Success,
            category: IssueCategory::Crawlability,
            score: 90.0,
            grade: "A".to_string(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            metadata: serde_json::Map::new(),
            execution_time_ms: 1.0,
            pages_analyzed: 1,
            error_message: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_engine_failure_does_not_fail_audit() {
        let store = RecordingStore::default();
        let engines: Vec<Box<dyn AuditEngine>> = vec![
            Box::new(FixedEngine {
                name: "technical",
                category: IssueCategory::Technical,
                score: 80.0,
                fail: false,
            }),
            Box::new(FixedEngine {
                name: "onpage",
                category: IssueCategory::OnPage,
                score: 0.0,
                fail: true,
            }),
        ];
        let pipeline = AuditPipeline::with_engines(store, engines);

        let site_data = site();
        let crawl = crawl_result(&site_data);
        let report = pipeline
            .finalize(site_data, crawl, Instant::now())
            .await
            .expect("audit completes despite the failed engine");

        assert_eq!(report.status, AuditStatus::Complete);
        assert_eq!(report.engine_results.len(), 3);
        let failed: Vec<&AuditResult> = report
            .engine_results
            .iter()
            .filter(|r| r.status == EngineStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].engine_name, "onpage");
        // Weighted mean over crawler (.15 * 90) and technical (.20 * 80).
        let expected: f64 = (90.0 * 0.15 + 80.0 * 0.20) / 0.35;
        assert!((report.overall_score - (expected * 100.0).round() / 100.0).abs() < 0.01);

        let events = pipeline.store.events();
        assert!(events.contains(&"engine:technical".to_string()));
        assert!(events.contains(&"engine:onpage".to_string()));
        assert!(events.iter().any(|e| e.starts_with("final:")));
        assert_eq!(events.last().unwrap(), "status:Complete");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_engines_are_retried_twice() {
        struct CountingEngine {
            calls: Arc<Mutex<u32>>,
        }

        #[async_trait]
        impl AuditEngine for CountingEngine {
            fn name(&self) -> &'static str {
                "flaky"
            }
            fn category(&self) -> IssueCategory {
                IssueCategory::Technical
            }
            async fn run(&self, _site_data: &SiteData) -> anyhow::Result<AuditResult> {
                *self.calls.lock().unwrap() += 1;
                Err(anyhow!("still broken"))
            }
        }

        let calls = Arc::new(Mutex::new(0));
        let engine = CountingEngine {
            calls: calls.clone(),
        };
        let result =
            run_engine_with_retries(&engine, &site(), Duration::from_secs(1800)).await;
        assert_eq!(result.status, EngineStatus::Failed);
        assert_eq!(*calls.lock().unwrap(), 3); // initial attempt + 2 retries
    }

    #[tokio::test(start_paused = true)]
    async fn engine_soft_timeout_produces_failed_result() {
        struct SleepyEngine;

        #[async_trait]
        impl AuditEngine for SleepyEngine {
            fn name(&self) -> &'static str {
                "sleepy"
            }
            fn category(&self) -> IssueCategory {
                IssueCategory::Technical
            }
            async fn run(&self, site_data: &SiteData) -> anyhow::Result<AuditResult> {
                tokio::time::sleep(Duration::from_secs(7200)).await;
                Ok(AuditResult::failed(
                    "sleepy",
                    site_data.audit_id,
                    IssueCategory::Technical,
                    "unreachable",
                ))
            }
        }

        let result =
            run_engine_with_retries(&SleepyEngine, &site(), Duration::from_secs(10)).await;
        assert_eq!(result.status, EngineStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("engine execution timed out")
        );
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_stage() {
        let mut config = AuditConfig::default();
        config.weights.authority = 0.9;
        let pipeline = AuditPipeline::new(
            RecordingStore::default(),
            Arc::new(RuleRegistry::builtin()),
        );
        let err = pipeline.run("https://example.com/", config).await;
        assert!(matches!(err, Err(AuditError::Config(_))));
        assert!(pipeline.store.events().is_empty());
    }

    #[tokio::test]
    async fn invalid_root_url_is_rejected() {
        let pipeline = AuditPipeline::new(
            RecordingStore::default(),
            Arc::new(RuleRegistry::builtin()),
        );
        let err = pipeline.run("not a url", AuditConfig::default()).await;
        assert!(matches!(err, Err(AuditError::Config(_))));
    }
}
