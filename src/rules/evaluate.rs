use crate::domain::{FuelRecord, MembershipSpec, RuleDef, RuleId, RuleKind, RuleSpec};

/// A single-record rule match, before it is tied to an execution.
///
/// The scanner combines a finding with the record's parsed timestamp
/// and the execution context to build the durable violation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: RuleId,
    pub kind: RuleKind,
    pub code: &'static str,
    pub value: Option<String>,
}

/// Evaluate one single-record rule against one record.
///
/// Pure and deterministic; no I/O, never panics on well-formed input.
/// Accumulation rules carry cross-record state and are evaluated by
/// the scanner's aggregation pass, so they always return `None` here.
pub fn evaluate(record: &FuelRecord, rule: &RuleDef) -> Option<Finding> {
    match &rule.spec {
        RuleSpec::Threshold {
            min_volume,
            consumer_type,
        } => {
            // Strictly greater-than; a volume exactly at the limit is clean.
            let volume = record.volume_liters?;
            if volume > *min_volume && record.consumer_type.as_deref() == Some(consumer_type) {
                return Some(Finding {
                    rule_id: rule.id.clone(),
                    kind: RuleKind::Threshold,
                    code: rule.spec.code(),
                    value: Some(volume.to_string()),
                });
            }
            None
        }
        RuleSpec::Membership(MembershipSpec::MissingIdentity { fields }) => {
            // Any one missing field is sufficient.
            let missing = fields.iter().any(|field| {
                let value = match field {
                    crate::domain::IdentityField::PlateNumber => record.plate_number.as_deref(),
                    crate::domain::IdentityField::NationalId => record.national_id.as_deref(),
                };
                value.map_or(true, |v| v.trim().is_empty())
            });
            missing.then(|| Finding {
                rule_id: rule.id.clone(),
                kind: RuleKind::Membership,
                code: rule.spec.code(),
                value: None,
            })
        }
        RuleSpec::Membership(MembershipSpec::FlaggedValue { field, flagged }) => {
            let value = field.extract(record)?;
            flagged
                .iter()
                .any(|f| f.eq_ignore_ascii_case(value))
                .then(|| Finding {
                    rule_id: rule.id.clone(),
                    kind: RuleKind::Membership,
                    code: rule.spec.code(),
                    value: Some(value.to_string()),
                })
        }
        RuleSpec::Accumulation { .. } => None,
    }
}
