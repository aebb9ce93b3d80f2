pub mod execution;
pub mod record;
pub mod rule;
pub mod violation;

pub use execution::{
    BatchExecution, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, ExecutionSummary,
};
pub use record::{BatchId, FieldError, FuelRecord, RecordId};
pub use rule::{
    FlagField, GroupKey, IdentityField, MembershipSpec, RuleDef, RuleId, RuleKind, RuleSpec,
    Template,
};
pub use violation::Violation;
