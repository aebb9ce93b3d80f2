use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::execution::ExecutionId;
use super::record::{BatchId, RecordId};
use super::rule::{RuleId, RuleKind};

/// One durable (record, rule) match: the unit of anomaly-detection
/// output.
///
/// Immutable after creation. A re-run of the same execution purges and
/// re-inserts rather than updating in place, so for a given execution
/// at most one violation exists per (record, rule) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub execution_id: ExecutionId,
    pub record_id: RecordId,
    pub batch_id: BatchId,
    pub template_id: i32,

    /// The single rule that fired.
    pub rule_id: RuleId,
    /// Decides which of the two mutually exclusive rule-reference
    /// columns the row lands in (criteria vs accumulation).
    pub rule_kind: RuleKind,

    /// Violation type tag, e.g. `SINGLE_TX`, `NO_ID`.
    pub code: String,
    /// Event timestamp computed from the record's date and time.
    pub occurred_at: NaiveDateTime,
    /// Offending value, when one exists (e.g. the dispensed volume).
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_violation_serializes_rule_reference() {
        let v = Violation {
            execution_id: ExecutionId::new("exec-1"),
            record_id: RecordId::new("TX-9"),
            batch_id: BatchId(4),
            template_id: 2,
            rule_id: RuleId::new("vol_1"),
            rule_kind: RuleKind::Threshold,
            code: "SINGLE_TX".to_string(),
            occurred_at: NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(8, 15, 0)
                .unwrap(),
            value: Some("151.500".to_string()),
        };

        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["rule_id"], "vol_1");
        assert_eq!(json["rule_kind"], "threshold");
        assert_eq!(json["code"], "SINGLE_TX");
    }
}
