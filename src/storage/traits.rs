use async_trait::async_trait;
use chrono::Duration;

use crate::domain::{
    BatchExecution, BatchId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, FuelRecord,
    RecordId, Template, Violation,
};

/// Persistence boundary of the engine.
///
/// The record store side is read-only; executions, batch records and
/// violations are mutated only through these methods, scoped per
/// execution id.
#[async_trait]
pub trait Storage: Send + Sync {
    // Records (read-only)

    async fn count_records(&self, batch_id: BatchId) -> anyhow::Result<u64>;

    /// Fetch up to `limit` records of a batch in stable record-id
    /// order, starting strictly after `after`. Keyset pagination keeps
    /// memory bounded and repeated scans deterministic.
    async fn fetch_records_after(
        &self,
        batch_id: BatchId,
        after: Option<&RecordId>,
        limit: u32,
    ) -> anyhow::Result<Vec<FuelRecord>>;

    // Templates

    async fn resolve_template(&self, template_id: i32) -> anyhow::Result<Option<Template>>;

    // Executions

    async fn insert_execution(&self, execution: &Execution) -> anyhow::Result<()>;

    async fn get_execution(&self, id: &ExecutionId) -> anyhow::Result<Option<Execution>>;

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> anyhow::Result<()>;

    /// Write the terminal status together with the aggregate totals.
    async fn finalize_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> anyhow::Result<()>;

    /// Best-effort human-readable progress string for external polling.
    async fn set_progress(&self, id: &ExecutionId, message: &str) -> anyhow::Result<()>;

    // Batch execution records

    /// Create (or, on a re-run, reset) the record for one
    /// (execution, batch) pair and return its row id.
    async fn upsert_batch_execution(
        &self,
        id: &ExecutionId,
        batch_id: BatchId,
        status: ExecutionStatus,
    ) -> anyhow::Result<i64>;

    async fn get_batch_execution(&self, row_id: i64) -> anyhow::Result<Option<BatchExecution>>;

    async fn update_batch_execution(
        &self,
        row_id: i64,
        status: ExecutionStatus,
        violations_found: u64,
    ) -> anyhow::Result<()>;

    // Violations

    /// Delete every violation of an execution. Re-runs purge before
    /// rewriting so each (record, rule) pair stays unique.
    async fn purge_violations(&self, id: &ExecutionId) -> anyhow::Result<u64>;

    /// Bulk insert one flushed sink buffer.
    async fn insert_violations(&self, violations: &[Violation]) -> anyhow::Result<()>;

    // Maintenance

    /// Reconcile executions and batch records stuck in PROCESSING
    /// longer than `older_than` to FAILED. Run by a supervisory sweep,
    /// never by the engine itself.
    async fn sweep_stale(&self, older_than: Duration) -> anyhow::Result<u64>;
}
