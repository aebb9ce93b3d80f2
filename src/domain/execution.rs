use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::BatchId;

/// Stable external identifier of one analysis execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        ExecutionId(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        ExecutionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status shared by executions and their per-batch records.
///
/// Transitions are strictly monotonic: QUEUED -> PROCESSING ->
/// {COMPLETED, FAILED}. Replaying a terminal status is a no-op;
/// regression is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Processing => "PROCESSING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(ExecutionStatus::Queued),
            "PROCESSING" => Some(ExecutionStatus::Processing),
            "COMPLETED" => Some(ExecutionStatus::Completed),
            "FAILED" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Whether moving from `self` to `to` is a legal forward transition.
    pub fn can_transition(&self, to: ExecutionStatus) -> bool {
        matches!(
            (self, to),
            (ExecutionStatus::Queued, ExecutionStatus::Processing)
                | (ExecutionStatus::Queued, ExecutionStatus::Failed)
                | (ExecutionStatus::Processing, ExecutionStatus::Completed)
                | (ExecutionStatus::Processing, ExecutionStatus::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end analysis request: a template applied to an ordered
/// list of data batches. Never deleted; retained as audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub template_id: i32,
    pub batch_ids: Vec<BatchId>,
    pub status: ExecutionStatus,
    pub total_batches_completed: u32,
    pub total_violations: u64,
    pub per_rule_counts: HashMap<String, u64>,
    pub progress: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// A freshly registered execution, before the worker picks it up.
    pub fn queued(template_id: i32, batch_ids: Vec<BatchId>) -> Self {
        Execution {
            execution_id: ExecutionId::generate(),
            template_id,
            batch_ids,
            status: ExecutionStatus::Queued,
            total_batches_completed: 0,
            total_violations: 0,
            per_rule_counts: HashMap::new(),
            progress: None,
            started_at: None,
            completed_at: None,
            elapsed_ms: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-batch progress row scoped to one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExecution {
    pub id: i64,
    pub execution_id: ExecutionId,
    pub batch_id: BatchId,
    pub status: ExecutionStatus,
    pub violations_found: u64,
}

/// Aggregate figures persisted when an execution reaches a terminal
/// status.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub total_violations: u64,
    pub per_rule_counts: HashMap<String, u64>,
    pub completed_batches: u32,
    pub elapsed_ms: u64,
}

/// Summary returned to the job system that invoked the engine.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub total_violations: u64,
    pub per_rule_counts: HashMap<String, u64>,
    pub completed_batches: u32,
    pub failed_batches: u32,
    pub malformed_records: u64,
    pub elapsed_ms: u64,
}
