use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{
    BatchId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus,
};
use crate::storage::Storage;

use super::EngineError;

/// Owns every status transition of executions and their per-batch
/// records, enforcing the monotonic QUEUED -> PROCESSING ->
/// {COMPLETED, FAILED} machine against the stored state.
pub struct LifecycleManager {
    storage: Arc<dyn Storage>,
}

impl LifecycleManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        LifecycleManager { storage }
    }

    /// Register a new execution in QUEUED state.
    pub async fn create_execution(
        &self,
        template_id: i32,
        batch_ids: Vec<BatchId>,
    ) -> Result<Execution, EngineError> {
        let execution = Execution::queued(template_id, batch_ids);
        self.storage.insert_execution(&execution).await?;
        info!(
            execution_id = %execution.execution_id,
            template_id,
            batches = execution.batch_ids.len(),
            "execution registered"
        );
        Ok(execution)
    }

    /// Move an execution forward. Replaying the current terminal
    /// status is an idempotent no-op; regression is an error.
    pub async fn transition_execution(
        &self,
        id: &ExecutionId,
        to: ExecutionStatus,
    ) -> Result<(), EngineError> {
        let current = self
            .storage
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))?
            .status;

        if current == to {
            return Ok(());
        }
        if !current.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to,
            });
        }

        self.storage.update_execution_status(id, to).await?;
        info!(execution_id = %id, from = %current, to = %to, "execution transition");
        Ok(())
    }

    /// Write the terminal status and aggregate totals.
    pub async fn finalize_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> Result<(), EngineError> {
        let current = self
            .storage
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))?
            .status;

        if current != outcome.status && !current.can_transition(outcome.status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: outcome.status,
            });
        }

        self.storage.finalize_execution(id, outcome).await?;
        info!(
            execution_id = %id,
            status = %outcome.status,
            total_violations = outcome.total_violations,
            completed_batches = outcome.completed_batches,
            elapsed_ms = outcome.elapsed_ms,
            "execution finalized"
        );
        Ok(())
    }

    /// Best-effort FAILED transition used on error exits; never masks
    /// the original error.
    pub async fn fail_execution(&self, id: &ExecutionId) {
        if let Err(e) = self.transition_execution(id, ExecutionStatus::Failed).await {
            warn!(execution_id = %id, error = %e, "could not mark execution FAILED");
        }
    }

    /// Create (or reset, on a re-run) the batch record as PROCESSING.
    pub async fn start_batch(
        &self,
        id: &ExecutionId,
        batch_id: BatchId,
    ) -> Result<i64, EngineError> {
        let row_id = self
            .storage
            .upsert_batch_execution(id, batch_id, ExecutionStatus::Processing)
            .await?;
        Ok(row_id)
    }

    /// Finalize one batch record with the same monotonic guard.
    pub async fn finish_batch(
        &self,
        row_id: i64,
        status: ExecutionStatus,
        violations_found: u64,
    ) -> Result<(), EngineError> {
        let current = self
            .storage
            .get_batch_execution(row_id)
            .await?
            .ok_or_else(|| EngineError::BatchRecordNotFound(row_id))?
            .status;

        if current == status {
            return Ok(());
        }
        if !current.can_transition(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        self.storage
            .update_batch_execution(row_id, status, violations_found)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockStorage;
    use std::collections::HashMap;

    fn manager() -> (Arc<MockStorage>, LifecycleManager) {
        let storage = Arc::new(MockStorage::new());
        let manager = LifecycleManager::new(storage.clone());
        (storage, manager)
    }

    #[tokio::test]
    async fn test_create_and_advance() {
        let (storage, manager) = manager();
        let execution = manager
            .create_execution(1, vec![BatchId(1), BatchId(2)])
            .await
            .unwrap();
        let id = execution.execution_id.clone();

        manager
            .transition_execution(&id, ExecutionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(
            storage.execution(&id).unwrap().status,
            ExecutionStatus::Processing
        );
        assert!(storage.execution(&id).unwrap().started_at.is_some());
    }

    #[tokio::test]
    async fn test_no_status_regression() {
        let (_, manager) = manager();
        let execution = manager.create_execution(1, vec![BatchId(1)]).await.unwrap();
        let id = execution.execution_id.clone();

        manager
            .transition_execution(&id, ExecutionStatus::Processing)
            .await
            .unwrap();
        manager
            .transition_execution(&id, ExecutionStatus::Completed)
            .await
            .unwrap();

        let err = manager
            .transition_execution(&id, ExecutionStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_replay_is_noop() {
        let (_, manager) = manager();
        let execution = manager.create_execution(1, vec![BatchId(1)]).await.unwrap();
        let id = execution.execution_id.clone();

        manager
            .transition_execution(&id, ExecutionStatus::Processing)
            .await
            .unwrap();
        manager
            .transition_execution(&id, ExecutionStatus::Failed)
            .await
            .unwrap();
        // same terminal status again is fine
        manager
            .transition_execution(&id, ExecutionStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_batch_record_lifecycle() {
        let (storage, manager) = manager();
        let execution = manager.create_execution(1, vec![BatchId(4)]).await.unwrap();
        let id = execution.execution_id.clone();

        let row = manager.start_batch(&id, BatchId(4)).await.unwrap();
        manager
            .finish_batch(row, ExecutionStatus::Completed, 7)
            .await
            .unwrap();

        let rows = storage.batch_executions_for(&id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Completed);
        assert_eq!(rows[0].violations_found, 7);

        // a completed batch record cannot be reopened
        let err = manager
            .finish_batch(row, ExecutionStatus::Processing, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_finalize_writes_totals() {
        let (storage, manager) = manager();
        let execution = manager.create_execution(1, vec![BatchId(1)]).await.unwrap();
        let id = execution.execution_id.clone();
        manager
            .transition_execution(&id, ExecutionStatus::Processing)
            .await
            .unwrap();

        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Completed,
            total_violations: 11,
            per_rule_counts: HashMap::from([("vol_1".to_string(), 11)]),
            completed_batches: 1,
            elapsed_ms: 42,
        };
        manager.finalize_execution(&id, &outcome).await.unwrap();

        let stored = storage.execution(&id).unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.total_violations, 11);
        assert_eq!(stored.total_batches_completed, 1);
        assert_eq!(stored.elapsed_ms, Some(42));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_execution_is_typed() {
        let (_, manager) = manager();
        let err = manager
            .transition_execution(&ExecutionId::new("nope"), ExecutionStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    }
}
