//! # armada-fsm
//!
//! A small table-driven state machine primitive.
//!
//! State machines in the orchestrator (host status, workflow lifecycle) are
//! declared as explicit transition tables rather than ad-hoc branching: each
//! legal transition is a `(from, to)` row, optionally guarded. A machine
//! validates every `transition_to` call against its table, so an illegal
//! transition is a typed error at the call site instead of silent state
//! corruption.
//!
//! # Invariants
//!
//! - The current state only changes through `transition_to`
//! - A rejected transition leaves the machine untouched
//! - Guards run before the state changes and can veto the transition

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;

/// Errors from transition attempts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// The table has no row for this transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A guard vetoed the transition.
    #[error("transition from {from} to {to} rejected: {reason}")]
    GuardRejected {
        from: String,
        to: String,
        reason: String,
    },
}

/// Guard deciding whether a declared transition may fire right now.
///
/// Returns `Err(reason)` to veto.
pub type Guard<S> = Arc<dyn Fn(&S, &S) -> Result<(), String> + Send + Sync>;

struct Rule<S> {
    guard: Option<Guard<S>>,
}

/// Declares the legal transitions for one state-machine type.
///
/// Build once, share via `Arc` across every machine instance of that type.
pub struct TransitionTable<S: Copy + Eq + Hash + Debug> {
    rules: HashMap<(S, S), Rule<S>>,
}

impl<S: Copy + Eq + Hash + Debug> TransitionTable<S> {
    /// Creates an empty table.
    #[must_use]
    pub fn builder() -> TransitionTableBuilder<S> {
        TransitionTableBuilder {
            rules: HashMap::new(),
        }
    }

    /// Whether the table declares the transition at all.
    #[must_use]
    pub fn allows(&self, from: S, to: S) -> bool {
        self.rules.contains_key(&(from, to))
    }
}

/// Builder for a [`TransitionTable`].
pub struct TransitionTableBuilder<S: Copy + Eq + Hash + Debug> {
    rules: HashMap<(S, S), Rule<S>>,
}

impl<S: Copy + Eq + Hash + Debug> TransitionTableBuilder<S> {
    /// Declares a legal transition.
    #[must_use]
    pub fn allow(mut self, from: S, to: S) -> Self {
        self.rules.insert((from, to), Rule { guard: None });
        self
    }

    /// Declares a legal transition from each of `froms`.
    #[must_use]
    pub fn allow_from(mut self, froms: &[S], to: S) -> Self {
        for from in froms {
            self.rules.insert((*from, to), Rule { guard: None });
        }
        self
    }

    /// Declares a guarded transition.
    #[must_use]
    pub fn allow_guarded(
        mut self,
        from: S,
        to: S,
        guard: impl Fn(&S, &S) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.rules.insert(
            (from, to),
            Rule {
                guard: Some(Arc::new(guard)),
            },
        );
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<TransitionTable<S>> {
        Arc::new(TransitionTable { rules: self.rules })
    }
}

/// One live state machine validated against a shared table.
pub struct StateMachine<S: Copy + Eq + Hash + Debug> {
    current: S,
    table: Arc<TransitionTable<S>>,
}

impl<S: Copy + Eq + Hash + Debug> StateMachine<S> {
    /// Creates a machine in `initial` state.
    #[must_use]
    pub fn new(table: Arc<TransitionTable<S>>, initial: S) -> Self {
        Self {
            current: initial,
            table,
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> S {
        self.current
    }

    /// Attempts to move to `to`, validating against the table and running
    /// the rule's guard. A self-transition must be declared like any other.
    pub fn transition_to(&mut self, to: S) -> Result<(), FsmError> {
        let from = self.current;
        let Some(rule) = self.table.rules.get(&(from, to)) else {
            return Err(FsmError::InvalidTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        };

        if let Some(guard) = &rule.guard {
            guard(&from, &to).map_err(|reason| FsmError::GuardRejected {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
                reason,
            })?;
        }

        self.current = to;
        Ok(())
    }
}
