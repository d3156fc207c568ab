//! Scheduling-constraint evaluation over host labels.

use std::collections::HashMap;

use armada_api::{Constraint, LabelCondition, LabelKind};
use thiserror::Error;

/// Errors from constraint evaluation.
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// The constraint references data the evaluator does not have.
    #[error("unsupported constraint: {0}")]
    Unsupported(String),
}

/// Outcome of evaluating a constraint against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateResult {
    Match,
    Mismatch,
    /// The constraint does not apply to this host at all (treated as a
    /// match by the caller).
    NotApplicable,
}

/// Label occurrence counts for one host.
///
/// Host attribute labels occur once each; task labels occur once per placed
/// task carrying them.
#[derive(Debug, Clone, Default)]
pub struct HostLabelValues {
    /// `(key, value)` → occurrence count for host attributes.
    pub host_labels: HashMap<(String, String), u32>,

    /// `(key, value)` → occurrence count over tasks placed on the host.
    pub task_labels: HashMap<(String, String), u32>,
}

impl HostLabelValues {
    /// Builds host-attribute counts from an attribute map.
    pub fn from_attributes<'a>(
        attributes: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut host_labels = HashMap::new();
        for (key, value) in attributes {
            *host_labels
                .entry((key.clone(), value.clone()))
                .or_insert(0) += 1;
        }
        Self {
            host_labels,
            task_labels: HashMap::new(),
        }
    }

    fn count(&self, kind: LabelKind, key: &str, value: &str) -> u32 {
        let map = match kind {
            LabelKind::Host => &self.host_labels,
            LabelKind::Task => &self.task_labels,
        };
        map.get(&(key.to_string(), value.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Evaluates scheduling constraints against a host's label values.
///
/// A trait so the matcher can be exercised with a scripted evaluator in
/// tests.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        constraint: &Constraint,
        labels: &HostLabelValues,
    ) -> Result<EvaluateResult, EvaluateError>;
}

/// The standard tree-walking evaluator.
#[derive(Debug, Default)]
pub struct LabelEvaluator;

impl Evaluator for LabelEvaluator {
    fn evaluate(
        &self,
        constraint: &Constraint,
        labels: &HostLabelValues,
    ) -> Result<EvaluateResult, EvaluateError> {
        match constraint {
            Constraint::Label(lc) => {
                let occurrences = labels.count(lc.kind, &lc.label.key, &lc.label.value);
                let holds = match lc.condition {
                    LabelCondition::LessThan => occurrences < lc.requirement,
                    LabelCondition::Equal => occurrences == lc.requirement,
                    LabelCondition::GreaterThan => occurrences > lc.requirement,
                };
                Ok(if holds {
                    EvaluateResult::Match
                } else {
                    EvaluateResult::Mismatch
                })
            }
            Constraint::And(children) => {
                if children.is_empty() {
                    return Ok(EvaluateResult::NotApplicable);
                }
                let mut applicable = false;
                for child in children {
                    match self.evaluate(child, labels)? {
                        EvaluateResult::Mismatch => return Ok(EvaluateResult::Mismatch),
                        EvaluateResult::Match => applicable = true,
                        EvaluateResult::NotApplicable => {}
                    }
                }
                Ok(if applicable {
                    EvaluateResult::Match
                } else {
                    EvaluateResult::NotApplicable
                })
            }
            Constraint::Or(children) => {
                if children.is_empty() {
                    return Ok(EvaluateResult::NotApplicable);
                }
                let mut applicable = false;
                for child in children {
                    match self.evaluate(child, labels)? {
                        EvaluateResult::Match => return Ok(EvaluateResult::Match),
                        EvaluateResult::Mismatch => applicable = true,
                        EvaluateResult::NotApplicable => {}
                    }
                }
                Ok(if applicable {
                    EvaluateResult::Mismatch
                } else {
                    EvaluateResult::NotApplicable
                })
            }
        }
    }
}
