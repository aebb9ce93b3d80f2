pub mod lifecycle;
pub mod progress;
pub mod scanner;
pub mod sink;

pub use lifecycle::LifecycleManager;
pub use progress::{NoopProgress, ProgressSink, StorageProgress};
pub use scanner::{BatchScanOutcome, BatchScanner};
pub use sink::ViolationSink;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    BatchId, ExecutionId, ExecutionOutcome, ExecutionStatus, ExecutionSummary, RuleId,
};
use crate::observability::EngineMetrics;
use crate::rules::RuleSet;
use crate::storage::Storage;

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("batch execution record {0} not found")]
    BatchRecordNotFound(i64),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Per-rule violation counters with a fixed key set.
///
/// Keys are seeded from the resolved rule set at the start of the
/// execution so the persisted map always carries every active rule,
/// including those that never fired.
#[derive(Debug, Default, Clone)]
pub struct RuleCounters {
    counts: HashMap<String, u64>,
    seeded: bool,
}

impl RuleCounters {
    pub fn for_rules(rules: &RuleSet) -> Self {
        let mut counters = RuleCounters::default();
        counters.seed(rules);
        counters
    }

    /// Seed zero counters for every active rule; later calls are no-ops.
    pub fn seed(&mut self, rules: &RuleSet) {
        if self.seeded {
            return;
        }
        for rule_id in rules.rule_ids() {
            self.counts.insert(rule_id.as_str().to_string(), 0);
        }
        self.seeded = true;
    }

    pub fn increment(&mut self, rule_id: &RuleId) {
        *self.counts.entry(rule_id.as_str().to_string()).or_insert(0) += 1;
    }

    /// Fold another counter set into this one. Batch tallies are kept
    /// local until their batch completes, so counts of failed batches
    /// never reach the execution-level map.
    pub fn merge(&mut self, other: &RuleCounters) {
        for (rule_id, count) in &other.counts {
            *self.counts.entry(rule_id.clone()).or_insert(0) += count;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn to_map(&self) -> HashMap<String, u64> {
        self.counts.clone()
    }
}

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Sink buffer size: violations per bulk write.
    pub flush_size: usize,
    /// Records fetched per storage round trip.
    pub chunk_size: u32,
    /// Records between progress callbacks.
    pub progress_interval: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            flush_size: 1000,
            chunk_size: 1000,
            progress_interval: 250,
        }
    }
}

/// Drives one execution end to end: batches strictly sequential, each
/// scanned, flushed and finalized before the next begins.
///
/// All collaborators are injected; the engine owns no process-wide
/// state.
pub struct Engine {
    storage: Arc<dyn Storage>,
    lifecycle: LifecycleManager,
    progress: Arc<dyn ProgressSink>,
    metrics: Arc<EngineMetrics>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        storage: Arc<dyn Storage>,
        progress: Arc<dyn ProgressSink>,
        metrics: Arc<EngineMetrics>,
        options: EngineOptions,
    ) -> Self {
        Engine {
            lifecycle: LifecycleManager::new(storage.clone()),
            storage,
            progress,
            metrics,
            options,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run one execution over the given batches (defaults to the
    /// batch list the execution was registered with).
    ///
    /// Unexpected errors still drive the execution to FAILED before
    /// propagating, so status rows never stay in an in-between state.
    pub async fn run(
        &self,
        execution_id: &ExecutionId,
        batch_ids: Option<Vec<BatchId>>,
    ) -> Result<ExecutionSummary, EngineError> {
        let started = Instant::now();
        self.metrics.executions_started.inc();

        match self.run_inner(execution_id, batch_ids, started).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.metrics.executions_failed.inc();
                self.lifecycle.fail_execution(execution_id).await;
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        execution_id: &ExecutionId,
        batch_ids: Option<Vec<BatchId>>,
        started: Instant,
    ) -> Result<ExecutionSummary, EngineError> {
        let execution = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.clone()))?;
        let template_id = execution.template_id;
        let batch_ids = batch_ids.unwrap_or_else(|| execution.batch_ids.clone());

        info!(
            execution_id = %execution_id,
            template_id,
            batches = batch_ids.len(),
            "starting execution"
        );

        self.lifecycle
            .transition_execution(execution_id, ExecutionStatus::Processing)
            .await?;
        let _ = self
            .storage
            .set_progress(execution_id, "Preparing analysis")
            .await;

        // Re-runs rewrite the whole execution scope, keeping each
        // (record, rule) pair unique.
        let purged = self.storage.purge_violations(execution_id).await?;
        if purged > 0 {
            debug!(execution_id = %execution_id, purged, "purged prior violations");
        }

        let storage: &dyn Storage = self.storage.as_ref();
        let scanner = BatchScanner::new(
            storage,
            self.options.chunk_size,
            self.options.progress_interval,
        );
        let mut sink = ViolationSink::new(storage, self.options.flush_size);
        let mut counters = RuleCounters::default();

        let mut total_violations = 0u64;
        let mut malformed_records = 0u64;
        let mut completed_batches = 0u32;
        let mut failed_batches = 0u32;

        for &batch_id in &batch_ids {
            let row_id = self.lifecycle.start_batch(execution_id, batch_id).await?;

            // A missing template degrades to a failed batch, not a
            // failed execution.
            let template = match self.storage.resolve_template(template_id).await {
                Ok(Some(template)) => template,
                Ok(None) => {
                    warn!(
                        execution_id = %execution_id,
                        batch_id = %batch_id,
                        template_id,
                        "template not found, skipping batch"
                    );
                    self.fail_batch(row_id, &mut sink, &mut failed_batches).await?;
                    continue;
                }
                Err(e) => {
                    warn!(
                        execution_id = %execution_id,
                        batch_id = %batch_id,
                        error = %e,
                        "template resolution failed, skipping batch"
                    );
                    self.fail_batch(row_id, &mut sink, &mut failed_batches).await?;
                    continue;
                }
            };

            let rules = RuleSet::from_template(&template);
            counters.seed(&rules);

            // Tallies stay batch-local until the batch's violations
            // are durable; a discarded batch must not leak into
            // per_rule_counts.
            let mut batch_counters = RuleCounters::for_rules(&rules);

            let outcome = match scanner
                .scan(
                    execution_id,
                    template_id,
                    batch_id,
                    &rules,
                    &mut sink,
                    &mut batch_counters,
                    self.progress.as_ref(),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        execution_id = %execution_id,
                        batch_id = %batch_id,
                        error = %e,
                        "batch scan failed"
                    );
                    self.fail_batch(row_id, &mut sink, &mut failed_batches).await?;
                    continue;
                }
            };

            // Violations must be durable before the batch can read
            // COMPLETED.
            if let Err(e) = sink.flush().await {
                warn!(
                    execution_id = %execution_id,
                    batch_id = %batch_id,
                    error = %e,
                    "violation flush failed"
                );
                self.fail_batch(row_id, &mut sink, &mut failed_batches).await?;
                continue;
            }

            self.lifecycle
                .finish_batch(row_id, ExecutionStatus::Completed, outcome.violations_found)
                .await?;

            counters.merge(&batch_counters);
            completed_batches += 1;
            total_violations += outcome.violations_found;
            malformed_records += outcome.malformed_records;
            self.metrics.batches_completed.inc();
            self.metrics.records_scanned.add(outcome.records_scanned);
            self.metrics.malformed_records.add(outcome.malformed_records);
            self.metrics.violations_found.add(outcome.violations_found);

            info!(
                execution_id = %execution_id,
                batch_id = %batch_id,
                records = outcome.records_scanned,
                violations = outcome.violations_found,
                malformed = outcome.malformed_records,
                "batch completed"
            );
        }

        // Partial failures leave the execution COMPLETED with the
        // damage visible per batch; only a fully failed run fails the
        // execution.
        let status = if !batch_ids.is_empty() && completed_batches == 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let outcome = ExecutionOutcome {
            status,
            total_violations,
            per_rule_counts: counters.to_map(),
            completed_batches,
            elapsed_ms,
        };
        self.lifecycle
            .finalize_execution(execution_id, &outcome)
            .await?;
        let _ = self.storage.set_progress(execution_id, "Finished").await;

        match status {
            ExecutionStatus::Completed => self.metrics.executions_completed.inc(),
            _ => self.metrics.executions_failed.inc(),
        }

        Ok(ExecutionSummary {
            execution_id: execution_id.clone(),
            status,
            total_violations,
            per_rule_counts: outcome.per_rule_counts,
            completed_batches,
            failed_batches,
            malformed_records,
            elapsed_ms,
        })
    }

    async fn fail_batch(
        &self,
        row_id: i64,
        sink: &mut ViolationSink<'_>,
        failed_batches: &mut u32,
    ) -> Result<(), EngineError> {
        let dropped = sink.discard();
        if dropped > 0 {
            debug!(row_id, dropped, "discarded staged violations of failed batch");
        }
        self.lifecycle
            .finish_batch(row_id, ExecutionStatus::Failed, 0)
            .await?;
        *failed_batches += 1;
        self.metrics.batches_failed.inc();
        Ok(())
    }
}
