pub mod core;
pub mod crawler;
pub mod engines;
pub mod pipeline;

// --- Primary exports ---
pub use crate::core::config::{load_config, AuditConfig, CategoryWeights};
pub use crate::core::rules::{Rule, RuleRegistry};
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::pipeline::{
    AuditError, AuditPipeline, AuditReport, AuditStore, NullStore, StatusFields,
};

// --- Module shortcuts ---
pub use crate::crawler::Crawler;
pub use crate::engines::{execute, AuditEngine};
