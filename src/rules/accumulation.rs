use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::domain::{FuelRecord, GroupKey, RuleDef, RuleId, RuleKind, RuleSpec};

use super::evaluate::Finding;

/// Running total for one group key value.
#[derive(Debug, Default)]
struct GroupTotal {
    total: Decimal,
    fired: bool,
}

/// Streaming state for one accumulation rule over one batch.
///
/// The grouping window is the batch. Each record is observed once, in
/// scan order; when a group's summed volume first exceeds the
/// threshold the rule fires exactly once for that group, attributed to
/// the record that tipped it over. Crossing detection needs no
/// lookback, so a single ordered scan produces the same violations as
/// a separate grouped pass.
#[derive(Debug)]
pub struct AccumulationState {
    rule_id: RuleId,
    code: &'static str,
    group_by: GroupKey,
    min_total_volume: Decimal,
    groups: HashMap<String, GroupTotal>,
}

impl AccumulationState {
    /// Build state for a rule; `None` unless the rule is an
    /// accumulation rule.
    pub fn for_rule(rule: &RuleDef) -> Option<Self> {
        match &rule.spec {
            RuleSpec::Accumulation {
                group_by,
                min_total_volume,
            } => Some(AccumulationState {
                rule_id: rule.id.clone(),
                code: rule.spec.code(),
                group_by: *group_by,
                min_total_volume: *min_total_volume,
                groups: HashMap::new(),
            }),
            _ => None,
        }
    }

    pub fn rule_id(&self) -> &RuleId {
        &self.rule_id
    }

    /// Feed one record; returns a finding iff this record tips its
    /// group strictly over the threshold.
    pub fn observe(&mut self, record: &FuelRecord) -> Option<Finding> {
        let key = self.group_by.extract(record)?.trim();
        if key.is_empty() {
            return None;
        }
        let volume = record.volume_liters?;

        let group = self.groups.entry(key.to_string()).or_default();
        group.total += volume;

        if !group.fired && group.total > self.min_total_volume {
            group.fired = true;
            return Some(Finding {
                rule_id: self.rule_id.clone(),
                kind: RuleKind::Accumulation,
                code: self.code,
                value: Some(group.total.to_string()),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, RecordId};

    fn rule(min_total: i64) -> RuleDef {
        RuleDef {
            id: RuleId::new("acc_1"),
            active: true,
            description: None,
            spec: RuleSpec::Accumulation {
                group_by: GroupKey::PlateNumber,
                min_total_volume: Decimal::new(min_total, 0),
            },
        }
    }

    fn record(id: &str, plate: Option<&str>, volume: &str) -> FuelRecord {
        FuelRecord {
            record_id: RecordId::new(id),
            batch_id: BatchId(1),
            event_date: "2024-03-05".to_string(),
            event_time: "08:00:00".to_string(),
            station_code: None,
            product: None,
            volume_liters: Some(volume.parse().unwrap()),
            consumer_type: None,
            plate_number: plate.map(str::to_string),
            national_id: None,
            plate_color: None,
        }
    }

    #[test]
    fn test_fires_once_on_crossing() {
        let mut state = AccumulationState::for_rule(&rule(100)).unwrap();

        assert!(state.observe(&record("TX-1", Some("B1"), "60")).is_none());
        // TX-2 tips the plate over 100
        let finding = state.observe(&record("TX-2", Some("B1"), "50")).unwrap();
        assert_eq!(finding.code, "VOLUME_ACCUM");
        assert_eq!(finding.value.as_deref(), Some("110"));
        // further records for the same group never re-fire
        assert!(state.observe(&record("TX-3", Some("B1"), "500")).is_none());
    }

    #[test]
    fn test_equality_does_not_fire() {
        let mut state = AccumulationState::for_rule(&rule(100)).unwrap();
        assert!(state.observe(&record("TX-1", Some("B1"), "100")).is_none());
        assert!(state.observe(&record("TX-2", Some("B1"), "0.001")).is_some());
    }

    #[test]
    fn test_groups_are_independent() {
        let mut state = AccumulationState::for_rule(&rule(100)).unwrap();
        assert!(state.observe(&record("TX-1", Some("B1"), "90")).is_none());
        assert!(state.observe(&record("TX-2", Some("B2"), "90")).is_none());
        assert!(state.observe(&record("TX-3", Some("B2"), "20")).is_some());
        assert!(state.observe(&record("TX-4", Some("B1"), "5")).is_none());
    }

    #[test]
    fn test_missing_group_key_is_skipped() {
        let mut state = AccumulationState::for_rule(&rule(10)).unwrap();
        assert!(state.observe(&record("TX-1", None, "500")).is_none());
        assert!(state.observe(&record("TX-2", Some(" "), "500")).is_none());
    }

    #[test]
    fn test_non_accumulation_rule_has_no_state() {
        let def = RuleDef {
            id: RuleId::new("vol_1"),
            active: true,
            description: None,
            spec: RuleSpec::Threshold {
                min_volume: Decimal::new(100, 0),
                consumer_type: "PRIVATE".to_string(),
            },
        };
        assert!(AccumulationState::for_rule(&def).is_none());
    }
}
