use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::domain::{
    BatchExecution, BatchId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, FuelRecord,
    RecordId, Template, Violation,
};

use super::traits::Storage;

/// In-memory storage for tests.
///
/// Mirrors the Postgres implementation's semantics, including keyset
/// pagination order and the (execution, batch) upsert, and adds
/// failure-injection hooks for the fetch, flush and template-resolution
/// paths.
#[derive(Default)]
pub struct MockStorage {
    records: Mutex<HashMap<i32, Vec<FuelRecord>>>,
    templates: Mutex<HashMap<i32, Template>>,
    executions: Mutex<HashMap<String, Execution>>,
    batch_executions: Mutex<HashMap<i64, BatchExecution>>,
    violations: Mutex<Vec<Violation>>,
    progress_log: Mutex<Vec<String>>,
    status_changed_at: Mutex<HashMap<String, DateTime<Utc>>>,

    next_batch_row: AtomicI64,
    resolve_calls: AtomicU64,
    fetch_calls: AtomicU64,

    /// Resolve-call indices (0-based) that report template-not-found.
    template_miss_calls: Mutex<HashSet<u64>>,
    /// Fetch-call indices (0-based) that fail mid-scan.
    fetch_fail_calls: Mutex<HashSet<u64>>,
    /// Number of upcoming insert_violations calls that fail.
    fail_flushes: Mutex<u32>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, keeping the batch in record-id order.
    pub fn add_record(&self, record: FuelRecord) {
        let mut records = self.records.lock();
        let batch = records.entry(record.batch_id.0).or_default();
        batch.push(record);
        batch.sort_by(|a, b| a.record_id.cmp(&b.record_id));
    }

    pub fn add_template(&self, template: Template) {
        self.templates.lock().insert(template.template_id, template);
    }

    /// Make the n-th resolve_template call (0-based) miss.
    pub fn miss_template_on_call(&self, call: u64) {
        self.template_miss_calls.lock().insert(call);
    }

    /// Make the n-th fetch_records_after call (0-based) fail.
    pub fn fail_fetch_on_call(&self, call: u64) {
        self.fetch_fail_calls.lock().insert(call);
    }

    /// Fail the next `n` violation flushes.
    pub fn fail_next_flushes(&self, n: u32) {
        *self.fail_flushes.lock() = n;
    }

    /// Backdate an execution's last status change (for sweep tests).
    pub fn set_status_changed_at(&self, id: &ExecutionId, at: DateTime<Utc>) {
        self.status_changed_at.lock().insert(id.0.clone(), at);
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    pub fn execution(&self, id: &ExecutionId) -> Option<Execution> {
        self.executions.lock().get(id.as_str()).cloned()
    }

    pub fn batch_executions_for(&self, id: &ExecutionId) -> Vec<BatchExecution> {
        let mut rows: Vec<BatchExecution> = self
            .batch_executions
            .lock()
            .values()
            .filter(|b| &b.execution_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.id);
        rows
    }

    pub fn progress_log(&self) -> Vec<String> {
        self.progress_log.lock().clone()
    }

    fn touch(&self, id: &ExecutionId) {
        self.status_changed_at.lock().insert(id.0.clone(), Utc::now());
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn count_records(&self, batch_id: BatchId) -> anyhow::Result<u64> {
        Ok(self
            .records
            .lock()
            .get(&batch_id.0)
            .map_or(0, |r| r.len() as u64))
    }

    async fn fetch_records_after(
        &self,
        batch_id: BatchId,
        after: Option<&RecordId>,
        limit: u32,
    ) -> anyhow::Result<Vec<FuelRecord>> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fetch_fail_calls.lock().contains(&call) {
            anyhow::bail!("injected fetch failure");
        }
        let records = self.records.lock();
        let Some(batch) = records.get(&batch_id.0) else {
            return Ok(Vec::new());
        };
        Ok(batch
            .iter()
            .filter(|r| after.map_or(true, |a| r.record_id > *a))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn resolve_template(&self, template_id: i32) -> anyhow::Result<Option<Template>> {
        let call = self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.template_miss_calls.lock().contains(&call) {
            return Ok(None);
        }
        Ok(self.templates.lock().get(&template_id).cloned())
    }

    async fn insert_execution(&self, execution: &Execution) -> anyhow::Result<()> {
        self.executions
            .lock()
            .insert(execution.execution_id.0.clone(), execution.clone());
        self.touch(&execution.execution_id);
        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> anyhow::Result<Option<Execution>> {
        Ok(self.executions.lock().get(id.as_str()).cloned())
    }

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> anyhow::Result<()> {
        let mut executions = self.executions.lock();
        let execution = executions
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow::anyhow!("execution {id} not found"))?;
        execution.status = status;
        if status == ExecutionStatus::Processing && execution.started_at.is_none() {
            execution.started_at = Some(Utc::now());
        }
        drop(executions);
        self.touch(id);
        Ok(())
    }

    async fn finalize_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> anyhow::Result<()> {
        let mut executions = self.executions.lock();
        let execution = executions
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow::anyhow!("execution {id} not found"))?;
        execution.status = outcome.status;
        execution.total_violations = outcome.total_violations;
        execution.per_rule_counts = outcome.per_rule_counts.clone();
        execution.total_batches_completed = outcome.completed_batches;
        execution.completed_at = Some(Utc::now());
        execution.elapsed_ms = Some(outcome.elapsed_ms);
        drop(executions);
        self.touch(id);
        Ok(())
    }

    async fn set_progress(&self, id: &ExecutionId, message: &str) -> anyhow::Result<()> {
        if let Some(execution) = self.executions.lock().get_mut(id.as_str()) {
            execution.progress = Some(message.to_string());
        }
        self.progress_log.lock().push(message.to_string());
        Ok(())
    }

    async fn upsert_batch_execution(
        &self,
        id: &ExecutionId,
        batch_id: BatchId,
        status: ExecutionStatus,
    ) -> anyhow::Result<i64> {
        let mut rows = self.batch_executions.lock();

        // One row per (execution, batch); a re-run resets it.
        if let Some(existing) = rows
            .values_mut()
            .find(|b| &b.execution_id == id && b.batch_id == batch_id)
        {
            existing.status = status;
            existing.violations_found = 0;
            return Ok(existing.id);
        }

        let row_id = self.next_batch_row.fetch_add(1, Ordering::SeqCst) + 1;
        rows.insert(
            row_id,
            BatchExecution {
                id: row_id,
                execution_id: id.clone(),
                batch_id,
                status,
                violations_found: 0,
            },
        );
        Ok(row_id)
    }

    async fn get_batch_execution(&self, row_id: i64) -> anyhow::Result<Option<BatchExecution>> {
        Ok(self.batch_executions.lock().get(&row_id).cloned())
    }

    async fn update_batch_execution(
        &self,
        row_id: i64,
        status: ExecutionStatus,
        violations_found: u64,
    ) -> anyhow::Result<()> {
        let mut rows = self.batch_executions.lock();
        let row = rows
            .get_mut(&row_id)
            .ok_or_else(|| anyhow::anyhow!("batch execution row {row_id} not found"))?;
        row.status = status;
        row.violations_found = violations_found;
        Ok(())
    }

    async fn purge_violations(&self, id: &ExecutionId) -> anyhow::Result<u64> {
        let mut violations = self.violations.lock();
        let before = violations.len();
        violations.retain(|v| &v.execution_id != id);
        Ok((before - violations.len()) as u64)
    }

    async fn insert_violations(&self, violations: &[Violation]) -> anyhow::Result<()> {
        {
            let mut fail = self.fail_flushes.lock();
            if *fail > 0 {
                *fail -= 1;
                anyhow::bail!("injected flush failure");
            }
        }
        self.violations.lock().extend_from_slice(violations);
        Ok(())
    }

    async fn sweep_stale(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - older_than;
        let changed_at = self.status_changed_at.lock();
        let mut executions = self.executions.lock();
        let mut swept = 0;

        for execution in executions.values_mut() {
            let stale = execution.status == ExecutionStatus::Processing
                && changed_at
                    .get(execution.execution_id.as_str())
                    .is_some_and(|at| *at < cutoff);
            if stale {
                execution.status = ExecutionStatus::Failed;
                swept += 1;

                let mut rows = self.batch_executions.lock();
                for row in rows
                    .values_mut()
                    .filter(|b| b.execution_id == execution.execution_id)
                {
                    if row.status == ExecutionStatus::Processing {
                        row.status = ExecutionStatus::Failed;
                    }
                }
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(batch: i32, id: &str) -> FuelRecord {
        FuelRecord {
            record_id: RecordId::new(id),
            batch_id: BatchId(batch),
            event_date: "2024-03-05".to_string(),
            event_time: "08:00:00".to_string(),
            station_code: None,
            product: None,
            volume_liters: None,
            consumer_type: None,
            plate_number: None,
            national_id: None,
            plate_color: None,
        }
    }

    #[tokio::test]
    async fn test_keyset_pagination_order() {
        let storage = MockStorage::new();
        for id in ["TX-3", "TX-1", "TX-2"] {
            storage.add_record(record(1, id));
        }

        let first = storage.fetch_records_after(BatchId(1), None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].record_id.as_str(), "TX-1");
        assert_eq!(first[1].record_id.as_str(), "TX-2");

        let rest = storage
            .fetch_records_after(BatchId(1), Some(&first[1].record_id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].record_id.as_str(), "TX-3");
    }

    #[tokio::test]
    async fn test_batch_execution_upsert_reuses_row() {
        let storage = MockStorage::new();
        let id = ExecutionId::new("exec-1");

        let row_a = storage
            .upsert_batch_execution(&id, BatchId(7), ExecutionStatus::Processing)
            .await
            .unwrap();
        storage
            .update_batch_execution(row_a, ExecutionStatus::Completed, 5)
            .await
            .unwrap();

        let row_b = storage
            .upsert_batch_execution(&id, BatchId(7), ExecutionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(row_a, row_b);
        let row = storage.get_batch_execution(row_b).await.unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Processing);
        assert_eq!(row.violations_found, 0);
    }

    #[tokio::test]
    async fn test_sweep_only_touches_stale_processing() {
        let storage = MockStorage::new();

        let mut stale = Execution::queued(1, vec![BatchId(1)]);
        stale.status = ExecutionStatus::Processing;
        let stale_id = stale.execution_id.clone();
        storage.insert_execution(&stale).await.unwrap();
        storage.set_status_changed_at(&stale_id, Utc::now() - Duration::hours(3));

        let mut fresh = Execution::queued(1, vec![BatchId(2)]);
        fresh.status = ExecutionStatus::Processing;
        let fresh_id = fresh.execution_id.clone();
        storage.insert_execution(&fresh).await.unwrap();

        let swept = storage.sweep_stale(Duration::hours(1)).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            storage.execution(&stale_id).unwrap().status,
            ExecutionStatus::Failed
        );
        assert_eq!(
            storage.execution(&fresh_id).unwrap().status,
            ExecutionStatus::Processing
        );
    }
}
