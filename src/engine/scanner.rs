use tracing::warn;

use crate::domain::{BatchId, ExecutionId, FuelRecord, Violation};
use crate::rules::{evaluate, AccumulationState, Finding, RuleSet};
use crate::storage::Storage;

use super::progress::ProgressSink;
use super::sink::ViolationSink;
use super::{EngineError, RuleCounters};

/// Figures produced by scanning one batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchScanOutcome {
    pub records_scanned: u64,
    pub violations_found: u64,
    pub malformed_records: u64,
}

/// Streams one batch through the active rule set.
///
/// Records are fetched in fixed-size chunks in stable record-id order,
/// so memory stays bounded and repeated scans over unchanged data
/// produce identical violation sets. Single-record rules run through
/// the pure evaluator; accumulation rules are fed into per-batch
/// streaming state in the same pass.
pub struct BatchScanner<'a> {
    storage: &'a dyn Storage,
    chunk_size: u32,
    progress_interval: u64,
}

impl<'a> BatchScanner<'a> {
    pub fn new(storage: &'a dyn Storage, chunk_size: u32, progress_interval: u64) -> Self {
        BatchScanner {
            storage,
            chunk_size: chunk_size.max(1),
            progress_interval: progress_interval.max(1),
        }
    }

    pub async fn scan(
        &self,
        execution_id: &ExecutionId,
        template_id: i32,
        batch_id: BatchId,
        rules: &RuleSet,
        sink: &mut ViolationSink<'_>,
        counters: &mut RuleCounters,
        progress: &dyn ProgressSink,
    ) -> Result<BatchScanOutcome, EngineError> {
        let total = self.storage.count_records(batch_id).await?;

        let mut accumulation: Vec<AccumulationState> = rules
            .accumulation
            .iter()
            .filter_map(AccumulationState::for_rule)
            .collect();

        let mut outcome = BatchScanOutcome::default();
        let mut cursor = None;
        let mut last_reported = None;

        loop {
            let chunk = self
                .storage
                .fetch_records_after(batch_id, cursor.as_ref(), self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }

            for record in &chunk {
                outcome.records_scanned += 1;

                // A record without a parseable timestamp can anchor no
                // violation; count it and move on rather than aborting
                // the batch.
                let occurred_at = match record.event_timestamp() {
                    Ok(ts) => ts,
                    Err(e) => {
                        outcome.malformed_records += 1;
                        warn!(batch_id = %batch_id, error = %e, "skipping malformed record");
                        continue;
                    }
                };

                for rule in &rules.single {
                    if let Some(finding) = evaluate(record, rule) {
                        counters.increment(&finding.rule_id);
                        outcome.violations_found += 1;
                        sink.stage(build_violation(
                            execution_id,
                            template_id,
                            record,
                            occurred_at,
                            finding,
                        ))
                        .await?;
                    }
                }

                for state in &mut accumulation {
                    if let Some(finding) = state.observe(record) {
                        counters.increment(&finding.rule_id);
                        outcome.violations_found += 1;
                        sink.stage(build_violation(
                            execution_id,
                            template_id,
                            record,
                            occurred_at,
                            finding,
                        ))
                        .await?;
                    }
                }

                if outcome.records_scanned % self.progress_interval == 0 {
                    progress
                        .on_progress(batch_id, outcome.records_scanned, total)
                        .await;
                    last_reported = Some(outcome.records_scanned);
                }
            }

            cursor = chunk.last().map(|r| r.record_id.clone());
        }

        // Final callback always carries processed == total.
        if last_reported != Some(outcome.records_scanned) {
            progress
                .on_progress(batch_id, outcome.records_scanned, total)
                .await;
        }

        Ok(outcome)
    }
}

fn build_violation(
    execution_id: &ExecutionId,
    template_id: i32,
    record: &FuelRecord,
    occurred_at: chrono::NaiveDateTime,
    finding: Finding,
) -> Violation {
    Violation {
        execution_id: execution_id.clone(),
        record_id: record.record_id.clone(),
        batch_id: record.batch_id,
        template_id,
        rule_id: finding.rule_id,
        rule_kind: finding.kind,
        code: finding.code.to_string(),
        occurred_at,
        value: finding.value,
    }
}
