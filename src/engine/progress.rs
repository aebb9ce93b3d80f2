use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{BatchId, ExecutionId};
use crate::storage::Storage;

/// Observer side channel for live scan progress.
///
/// Best-effort and eventually consistent: delivery failures are
/// tolerated, the durable counts converge at completion.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, batch_id: BatchId, processed: u64, total: u64);
}

/// Progress sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn on_progress(&self, _batch_id: BatchId, _processed: u64, _total: u64) {}
}

/// Persists a human-readable progress string on the execution row so
/// an external status endpoint can poll it.
pub struct StorageProgress {
    storage: Arc<dyn Storage>,
    execution_id: ExecutionId,
}

impl StorageProgress {
    pub fn new(storage: Arc<dyn Storage>, execution_id: ExecutionId) -> Self {
        StorageProgress {
            storage,
            execution_id,
        }
    }
}

#[async_trait]
impl ProgressSink for StorageProgress {
    async fn on_progress(&self, batch_id: BatchId, processed: u64, total: u64) {
        let message = format!("Scanning batch {batch_id} ({processed}/{total})");
        if let Err(e) = self.storage.set_progress(&self.execution_id, &message).await {
            warn!(
                execution_id = %self.execution_id,
                batch_id = %batch_id,
                error = %e,
                "failed to persist progress"
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, Execution};
    use crate::storage::MockStorage;

    #[tokio::test]
    async fn test_storage_progress_writes_message() {
        let storage = Arc::new(MockStorage::new());
        let execution = Execution::queued(1, vec![BatchId(3)]);
        let id = execution.execution_id.clone();
        storage.insert_execution(&execution).await.unwrap();

        let progress = StorageProgress::new(storage.clone(), id.clone());
        progress.on_progress(BatchId(3), 250, 1000).await;

        let stored = storage.execution(&id).unwrap();
        assert_eq!(stored.progress.as_deref(), Some("Scanning batch 3 (250/1000)"));
    }
}
