pub mod config;
pub mod domain;
pub mod engine;
pub mod observability;
pub mod rules;
pub mod storage;

pub use config::Config;
pub use domain::{BatchId, ExecutionId, ExecutionStatus, ExecutionSummary, FuelRecord, Violation};
pub use engine::{Engine, EngineError, EngineOptions};
pub use rules::RuleSet;
pub use storage::Storage;
