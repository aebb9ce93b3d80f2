use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::record::FuelRecord;

/// Stable rule identifier.
///
/// Tags every violation the rule produces and keys the per-rule
/// violation counts on the execution row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        RuleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse rule category.
///
/// Threshold and Membership violations reference the criteria rule
/// column; Accumulation violations reference the accumulation rule
/// column. The two storage columns are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Threshold,
    Membership,
    Accumulation,
}

/// Identity columns a membership rule may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    PlateNumber,
    NationalId,
}

/// Categorical columns a flagged-value rule may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagField {
    PlateColor,
    ConsumerType,
}

impl FlagField {
    pub fn extract<'a>(&self, record: &'a FuelRecord) -> Option<&'a str> {
        match self {
            FlagField::PlateColor => record.plate_color.as_deref(),
            FlagField::ConsumerType => record.consumer_type.as_deref(),
        }
    }
}

/// Grouping key for accumulation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    PlateNumber,
    NationalId,
}

impl GroupKey {
    pub fn extract<'a>(&self, record: &'a FuelRecord) -> Option<&'a str> {
        match self {
            GroupKey::PlateNumber => record.plate_number.as_deref(),
            GroupKey::NationalId => record.national_id.as_deref(),
        }
    }
}

/// Membership rule flavor: a record violates either by missing a
/// required identity field or by carrying a flagged categorical value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum MembershipSpec {
    MissingIdentity {
        fields: SmallVec<[IdentityField; 2]>,
    },
    FlaggedValue {
        field: FlagField,
        flagged: SmallVec<[String; 4]>,
    },
}

/// Declarative rule condition, exhaustive over the three categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Single-record numeric threshold gated on a consumer category.
    /// Fires on strictly-greater-than; equality never fires.
    Threshold {
        min_volume: Decimal,
        consumer_type: String,
    },
    /// Single-record membership check.
    Membership(MembershipSpec),
    /// Cross-record aggregate: summed volume per group key within one
    /// batch, fires when the total exceeds the threshold.
    Accumulation {
        group_by: GroupKey,
        min_total_volume: Decimal,
    },
}

impl RuleSpec {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleSpec::Threshold { .. } => RuleKind::Threshold,
            RuleSpec::Membership(_) => RuleKind::Membership,
            RuleSpec::Accumulation { .. } => RuleKind::Accumulation,
        }
    }

    /// Violation type tag recorded on every violation this rule produces.
    pub fn code(&self) -> &'static str {
        match self {
            RuleSpec::Threshold { .. } => "SINGLE_TX",
            RuleSpec::Membership(MembershipSpec::MissingIdentity { .. }) => "NO_ID",
            RuleSpec::Membership(MembershipSpec::FlaggedValue { .. }) => "FLAGGED_VALUE",
            RuleSpec::Accumulation { .. } => "VOLUME_ACCUM",
        }
    }
}

/// One configured rule as stored in a template's rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: RuleId,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub spec: RuleSpec,
}

fn default_active() -> bool {
    true
}

/// A named set of rules, resolved once at the start of an execution
/// and immutable while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: i32,
    pub name: String,
    pub rules: Vec<RuleDef>,
}
