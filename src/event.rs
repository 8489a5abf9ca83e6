//! Workflow execution events.
//!
//! This module provides [`WorkflowEvent`] for observing the engine.
//! Events are broadcast through a channel that can be subscribed to for
//! monitoring, logging, or building UIs. They are not persisted; the
//! per-state log remains the audit trail.

use crate::{StateKey, Status};

/// An event emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowEvent {
    /// A state's status changed.
    StatusChanged {
        /// The state.
        state: StateKey,
        /// Status before the change.
        from: Status,
        /// Status after the change.
        to: Status,
    },

    /// Initialisation was skipped because dependencies are incomplete.
    DependenciesUnmet {
        /// The gated state.
        state: StateKey,
        /// The dependencies that are not yet completed.
        unmet: Vec<StateKey>,
    },

    /// A completed state handed over to its successor.
    TransitionSelected {
        /// The completed state.
        from: StateKey,
        /// The successor about to be initialised.
        to: StateKey,
    },

    /// A failure rolled the workflow back to an earlier state.
    RolledBack {
        /// The failing state.
        from: StateKey,
        /// The rollback target.
        to: StateKey,
    },

    /// A state was reset to its constructed baseline.
    Reset {
        /// The state.
        state: StateKey,
    },

    /// An operation faulted.
    Faulted {
        /// The offending state, when known.
        state: Option<StateKey>,
        /// Error message describing the fault.
        error: String,
    },
}

impl WorkflowEvent {
    /// Returns the primary state this event concerns, if any.
    pub fn state(&self) -> Option<StateKey> {
        match self {
            Self::StatusChanged { state, .. }
            | Self::DependenciesUnmet { state, .. }
            | Self::Reset { state } => Some(*state),
            Self::TransitionSelected { from, .. } | Self::RolledBack { from, .. } => Some(*from),
            Self::Faulted { state, .. } => *state,
        }
    }

    /// Returns true if this is a fault event.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }
}
