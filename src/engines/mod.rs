//! Analysis engines.
//!
//! Every engine is stateless across invocations, reads a frozen `SiteData`,
//! and produces a standardized `AuditResult`. The `execute` wrapper owns
//! timing and error capture so engines themselves stay pure.

pub mod onpage;
pub mod prioritize;
pub mod scoring;
pub mod technical;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, info};

use crate::core::types::{AuditResult, IssueCategory, SiteData};

#[async_trait]
pub trait AuditEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> IssueCategory;
    async fn run(&self, site_data: &SiteData) -> Result<AuditResult>;
}

/// Run an engine with timing and error capture. Any `Err` becomes a
/// `Failed` result with score 0 and grade F; the audit carries on.
pub async fn execute(engine: &dyn AuditEngine, site_data: &SiteData) -> AuditResult {
    let start = Instant::now();
    info!(
        engine = engine.name(),
        audit_id = %site_data.audit_id,
        domain = %site_data.domain,
        page_count = site_data.pages.len(),
        "engine starting"
    );

    match engine.run(site_data).await {
        Ok(mut result) => {
            result.execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            info!(
                engine = engine.name(),
                audit_id = %site_data.audit_id,
                score = result.score,
                issues = result.issues.len(),
                elapsed_ms = format!("{:.2}", result.execution_time_ms),
                "engine complete"
            );
            result
        }
        Err(e) => {
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            error!(
                engine = engine.name(),
                audit_id = %site_data.audit_id,
                error = %e,
                "engine failed"
            );
            let mut result = AuditResult::failed(
                engine.name(),
                site_data.audit_id,
                engine.category(),
                e.to_string(),
            );
            result.execution_time_ms = elapsed;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AuditConfig;
    use crate::core::types::EngineStatus;
    use anyhow::anyhow;

    struct FailingEngine;

    #[async_trait]
    impl AuditEngine for FailingEngine {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn category(&self) -> IssueCategory {
            IssueCategory::Technical
        }
        async fn run(&self, _site_data: &SiteData) -> Result<AuditResult> {
            Err(anyhow!("synthetic engine failure"))
        }
    }

    #[tokio::test]
    async fn execute_converts_errors_to_failed_results() {
        let site = SiteData::new("https://example.com/", AuditConfig::default());
        let result = execute(&FailingEngine, &site).await;
        assert_eq!(result.status, EngineStatus::Failed);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.grade, "F");
        assert_eq!(
            result.error_message.as_deref(),
            Some("synthetic engine failure")
        );
    }
}
