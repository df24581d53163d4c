pub mod config;
pub mod rules;
pub mod types;

pub use config::{load_config, AuditConfig, CategoryWeights};
pub use types::*;
