//! Error types for the Heddle workflow engine.
//!
//! This module defines the error types used throughout the Heddle crate,
//! following the non-exhaustive enum pattern to allow future error variants
//! without breaking compatibility.
//!
//! Engine faults carry the [`StateKey`] of the offending state. The state's
//! log is left exactly as it was at the fault point, so a host can read it
//! from the workflow to see how far execution progressed.

use thiserror::Error;

use crate::hook::LifecyclePoint;
use crate::StateKey;

/// The main error type for Heddle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The key does not belong to this workflow.
    #[error("State not found: {0}")]
    StateNotFound(StateKey),

    /// The selected transition is not one of the state's candidates.
    #[error("Invalid transition: {target} is not a transition of {name}")]
    InvalidTransition {
        /// The state attempting the transition.
        state: StateKey,
        /// Display name of that state.
        name: String,
        /// The rejected target.
        target: StateKey,
    },

    /// The completion gate refused.
    #[error("Cannot complete: {message}")]
    CannotComplete {
        /// The state that was refused.
        state: StateKey,
        /// The last log message of the state.
        message: String,
    },

    /// A completed parent would be pulled back to in-progress.
    #[error("{message}")]
    IllegalParentPromotion {
        /// The already completed parent.
        state: StateKey,
        /// Human readable description.
        message: String,
    },

    /// The blocking engine met a hook or gate that can only be awaited.
    #[error("Hook has no blocking implementation: {point} hook on {state}")]
    NoBlockingImplementation {
        /// The state owning the hook.
        state: StateKey,
        /// Where the hook is registered.
        point: LifecyclePoint,
    },

    /// The child is already a sub-state of another parent.
    #[error("State {child} is already a sub-state of {parent}")]
    AlreadyOwned {
        /// The child being added.
        child: StateKey,
        /// Its current parent.
        parent: StateKey,
    },

    /// The sub-state edge would make a state its own ancestor.
    #[error("Adding {child} under {parent} would create a sub-state cycle")]
    SubStateCycle {
        /// The child being added.
        child: StateKey,
        /// The intended parent.
        parent: StateKey,
    },

    /// A cascade nested deeper than allowed.
    #[error("Cascade depth of {limit} exceeded")]
    DepthLimitExceeded {
        /// The configured limit.
        limit: usize,
    },

    /// A user hook reported a failure.
    #[error("Hook error: {0}")]
    Hook(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Returns the state this error is about, if any.
    pub fn state(&self) -> Option<StateKey> {
        match self {
            Self::StateNotFound(state)
            | Self::InvalidTransition { state, .. }
            | Self::CannotComplete { state, .. }
            | Self::IllegalParentPromotion { state, .. }
            | Self::NoBlockingImplementation { state, .. } => Some(*state),
            Self::AlreadyOwned { child, .. } | Self::SubStateCycle { child, .. } => Some(*child),
            Self::DepthLimitExceeded { .. } | Self::Hook(_) | Self::Serialization(_) => None,
        }
    }
}

/// A specialized `Result` type for Heddle operations.
///
/// This is a type alias for `std::result::Result<T, WorkflowError>` to reduce
/// boilerplate in function signatures throughout the crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;
