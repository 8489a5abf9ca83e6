//! # Heddle
//!
//! An embeddable, hierarchical workflow state machine.
//!
//! A host models a business process as a tree of named states with
//! sub-states, candidate transitions, prerequisite dependencies and
//! lifecycle hooks, then drives it through its lifecycle:
//! initialise → in progress → complete or fail → reset.
//!
//! The engine keeps the structural invariants while it does so:
//!
//! - a completed state hands over to at most one successor, which records
//!   it as its antecedent
//! - a parent's status follows its children, and a completed parent is
//!   never pulled back to in progress
//! - a state only initialises once every dependency has completed
//! - a failure rolls the antecedent chain back to a chosen earlier state
//!
//! Every operation exists in a blocking form ([`Workflow::execute`]) and a
//! suspend-capable form ([`Workflow::execute_async`]) with identical
//! outcomes.
//!
//! ## Quick Example
//!
//! ```
//! use heddle::{LifecyclePoint, State, Status, Workflow};
//!
//! let mut workflow = Workflow::new();
//! let collect = workflow.add_state(State::new(1, "Collect"));
//! let review = workflow.add_state(State::new(2, "Review"));
//! let publish = workflow.add_state(State::new(3, "Publish"));
//!
//! workflow.node(collect).add_transition(review);
//! workflow
//!     .node(review)
//!     .add_transition(publish)
//!     .add_transition(collect)
//!     .add_action(LifecyclePoint::Exit, |state| {
//!         state.log("review signed off");
//!         Ok(())
//!     });
//!
//! workflow.execute(collect, Status::Initialised)?;
//! let current = workflow.execute(collect, Status::Completed)?;
//! assert_eq!(current, review);
//!
//! // The reviewer sends the work back; the chain rolls back to Collect.
//! let current = workflow.execute_with(review, Status::Failed, Some(collect))?;
//! assert_eq!(current, collect);
//! assert_eq!(workflow.state(review).unwrap().status(), Status::Uninitialised);
//! # Ok::<(), heddle::WorkflowError>(())
//! ```
//!
//! ## Design Philosophy
//!
//! The name comes from the **heddle**, the loom part that lifts a group
//! of warp threads together so the weft can pass. Lifting a parent state
//! carries its sub-states along; the pattern only advances when the whole
//! group is in place.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod engine;
pub mod error;
pub mod event;
pub mod hook;
pub mod report;
pub mod state;
pub mod workflow;

pub use error::{Result, WorkflowError};
pub use event::WorkflowEvent;
pub use hook::{Action, Gate, Hook, LifecyclePoint};
pub use report::{StateReportEntry, StatusReport};
pub use state::{Kind, LogEntry, State, StateKey, Status};
pub use workflow::{EngineConfig, StateBuilder, Workflow};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
