pub mod accumulation;
pub mod evaluate;

pub use accumulation::AccumulationState;
pub use evaluate::{evaluate, Finding};

use crate::domain::{RuleDef, RuleId, RuleKind, Template};

/// The active rules of a template, split by evaluation strategy.
///
/// Single-record rules run through the pure evaluator for every
/// record; accumulation rules get per-batch streaming state.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub single: Vec<RuleDef>,
    pub accumulation: Vec<RuleDef>,
}

impl RuleSet {
    /// Build the active rule set from a resolved template.
    pub fn from_template(template: &Template) -> Self {
        let mut single = Vec::new();
        let mut accumulation = Vec::new();

        for rule in template.rules.iter().filter(|r| r.active) {
            match rule.spec.kind() {
                RuleKind::Threshold | RuleKind::Membership => single.push(rule.clone()),
                RuleKind::Accumulation => accumulation.push(rule.clone()),
            }
        }

        RuleSet {
            single,
            accumulation,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.accumulation.is_empty()
    }

    /// All active rule ids, used to pre-size the per-rule counters.
    pub fn rule_ids(&self) -> impl Iterator<Item = &RuleId> {
        self.single
            .iter()
            .chain(self.accumulation.iter())
            .map(|r| &r.id)
    }
}
