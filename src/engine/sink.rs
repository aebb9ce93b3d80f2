use crate::domain::Violation;
use crate::storage::Storage;

/// Buffered writer for discovered violations.
///
/// Staged violations are written in bounded-size bulk transactions:
/// automatically when the buffer fills, and on explicit flush at the
/// end of a batch. A failed flush keeps the buffer intact so the
/// caller can retry or abandon the batch; nothing is dropped silently.
pub struct ViolationSink<'a> {
    storage: &'a dyn Storage,
    buffer: Vec<Violation>,
    capacity: usize,
    flushed: u64,
}

impl<'a> ViolationSink<'a> {
    pub fn new(storage: &'a dyn Storage, capacity: usize) -> Self {
        ViolationSink {
            storage,
            buffer: Vec::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            flushed: 0,
        }
    }

    /// Buffer one violation, flushing if the buffer is full.
    pub async fn stage(&mut self, violation: Violation) -> anyhow::Result<()> {
        self.buffer.push(violation);
        if self.buffer.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Durably write everything buffered. Returns the number of
    /// violations written by this call.
    pub async fn flush(&mut self) -> anyhow::Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        self.storage.insert_violations(&self.buffer).await?;
        let written = self.buffer.len() as u64;
        self.flushed += written;
        self.buffer.clear();
        Ok(written)
    }

    /// Drop buffered violations without writing them. Used when the
    /// owning batch has already been marked FAILED.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total violations durably written through this sink.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, ExecutionId, RecordId, RuleId, RuleKind};
    use crate::storage::MockStorage;
    use chrono::NaiveDate;

    fn violation(record: &str) -> Violation {
        Violation {
            execution_id: ExecutionId::new("exec-1"),
            record_id: RecordId::new(record),
            batch_id: BatchId(1),
            template_id: 1,
            rule_id: RuleId::new("vol_1"),
            rule_kind: RuleKind::Threshold,
            code: "SINGLE_TX".to_string(),
            occurred_at: NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            value: None,
        }
    }

    #[tokio::test]
    async fn test_auto_flush_at_capacity() {
        let storage = MockStorage::new();
        let mut sink = ViolationSink::new(&storage, 2);

        sink.stage(violation("TX-1")).await.unwrap();
        assert_eq!(storage.violations().len(), 0);
        assert_eq!(sink.buffered(), 1);

        sink.stage(violation("TX-2")).await.unwrap();
        assert_eq!(storage.violations().len(), 2);
        assert_eq!(sink.buffered(), 0);
    }

    #[tokio::test]
    async fn test_explicit_flush_and_totals() {
        let storage = MockStorage::new();
        let mut sink = ViolationSink::new(&storage, 100);

        sink.stage(violation("TX-1")).await.unwrap();
        sink.stage(violation("TX-2")).await.unwrap();
        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(sink.flush().await.unwrap(), 0); // empty flush is a no-op
        assert_eq!(sink.flushed(), 2);
        assert_eq!(storage.violations().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_retains_buffer() {
        let storage = MockStorage::new();
        storage.fail_next_flushes(1);
        let mut sink = ViolationSink::new(&storage, 100);

        sink.stage(violation("TX-1")).await.unwrap();
        assert!(sink.flush().await.is_err());
        assert_eq!(sink.buffered(), 1); // nothing dropped
        assert_eq!(storage.violations().len(), 0);

        // retry succeeds once storage recovers
        assert_eq!(sink.flush().await.unwrap(), 1);
        assert_eq!(storage.violations().len(), 1);
    }

    #[tokio::test]
    async fn test_discard_drops_buffer() {
        let storage = MockStorage::new();
        let mut sink = ViolationSink::new(&storage, 100);

        sink.stage(violation("TX-1")).await.unwrap();
        assert_eq!(sink.discard(), 1);
        assert_eq!(sink.flush().await.unwrap(), 0);
        assert_eq!(storage.violations().len(), 0);
    }
}
