//! State types for the Heddle workflow engine.
//!
//! This module defines the vertex of the workflow graph: its identity,
//! status, runtime links, hooks and audit log.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::hook::{Action, Gate, LifecyclePoint};
use crate::{Result, WorkflowError};

/// A stable handle to a state inside a [`Workflow`](crate::Workflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(NodeIndex);

impl StateKey {
    #[cfg(test)]
    pub(crate) fn new(index: usize) -> Self {
        Self(NodeIndex::new(index))
    }

    pub(crate) fn from_node(index: NodeIndex) -> Self {
        Self(index)
    }

    pub(crate) fn node(self) -> NodeIndex {
        self.0
    }

    /// Returns the position of the state in its workflow.
    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

/// The lifecycle status of a state.
///
/// Each status carries a numeric code for hosts that serialise it
/// themselves; see [`Status::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    /// Not started, or reset.
    #[default]
    Uninitialised,

    /// Entered and waiting for work.
    Initialised,

    /// Work has started, or some children have progressed.
    InProgress,

    /// Done.
    Completed,

    /// Failed; always resolved within the same call.
    Failed,
}

impl Status {
    /// Returns the external numeric code.
    pub fn code(self) -> u8 {
        match self {
            Self::Uninitialised => 0,
            Self::Initialised => 1,
            Self::InProgress => 2,
            Self::Completed => 3,
            Self::Failed => 4,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        match code {
            0 => Ok(Self::Uninitialised),
            1 => Ok(Self::Initialised),
            2 => Ok(Self::InProgress),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Failed),
            other => Err(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The behavioural kind of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Kind {
    /// Waits for an external request to complete.
    #[default]
    Standard,

    /// Attempts completion as soon as it is initialised.
    Auto,

    /// Marks the top of a workflow; behaves like `Standard`.
    Root,
}

impl Kind {
    /// Returns the external numeric code.
    pub fn code(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Auto => 1,
            Self::Root => 2,
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        match code {
            0 => Ok(Self::Standard),
            1 => Ok(Self::Auto),
            2 => Ok(Self::Root),
            other => Err(other),
        }
    }
}

/// A timestamped entry in a state's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub message: String,
}

/// A vertex in the workflow graph.
///
/// Structure (sub-states, transitions, dependencies) lives in the owning
/// [`Workflow`](crate::Workflow); a `State` holds what the engine mutates
/// at runtime plus its hooks. The status can only be changed by the engine,
/// and every change is logged and marks the state dirty.
pub struct State {
    id: i64,
    name: String,
    kind: Kind,
    status: Status,
    is_dirty: bool,
    initialise_with_parent: bool,
    can_complete_parent: bool,
    transition: Option<StateKey>,
    antecedent: Option<StateKey>,
    actions: Vec<Action>,
    can_complete: Option<Gate>,
    log: Vec<LogEntry>,

    /// Opaque payload for hooks; the engine never reads it.
    pub context: HashMap<String, serde_json::Value>,
}

impl State {
    /// Creates a `Standard`, `Uninitialised` state.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: Kind::Standard,
            status: Status::Uninitialised,
            is_dirty: false,
            initialise_with_parent: false,
            can_complete_parent: false,
            transition: None,
            antecedent: None,
            actions: Vec::new(),
            can_complete: None,
            log: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// Sets the kind.
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Initialise this state whenever its parent initialises.
    pub fn with_initialise_with_parent(mut self, value: bool) -> Self {
        self.initialise_with_parent = value;
        self
    }

    /// Marks this state as one of the children whose completion can
    /// complete the parent.
    pub fn with_can_complete_parent(mut self, value: bool) -> Self {
        self.can_complete_parent = value;
        self
    }

    /// Sets the constructed status. Does not mark the state dirty.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Sets a blocking completion gate.
    pub fn with_can_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut State) -> bool + Send + Sync + 'static,
    {
        self.can_complete = Some(Gate::blocking(f));
        self
    }

    /// Sets a suspendable completion gate.
    pub fn with_can_complete_async<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        self.can_complete = Some(Gate::suspendable(f));
        self
    }

    /// Seeds the context payload.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Registers a blocking hook.
    pub fn with_action<F>(mut self, point: LifecyclePoint, f: F) -> Self
    where
        F: Fn(&mut State) -> Result<()> + Send + Sync + 'static,
    {
        self.actions.push(Action::blocking(point, f));
        self
    }

    /// Registers a suspendable hook.
    pub fn with_async_action<F>(mut self, point: LifecyclePoint, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.actions.push(Action::suspendable(point, f));
        self
    }

    /// The integer identity.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The behavioural kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// True once the status changed since construction or the last reset.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// See [`with_initialise_with_parent`](Self::with_initialise_with_parent).
    pub fn initialise_with_parent(&self) -> bool {
        self.initialise_with_parent
    }

    /// See [`with_can_complete_parent`](Self::with_can_complete_parent).
    pub fn can_complete_parent(&self) -> bool {
        self.can_complete_parent
    }

    /// The successor chosen for the current completion or failure.
    pub fn transition(&self) -> Option<StateKey> {
        self.transition
    }

    /// Chooses the successor. Must be one of the state's transitions by
    /// the time the engine acts on it.
    pub fn set_transition(&mut self, target: Option<StateKey>) {
        self.transition = target;
    }

    /// The state whose completion led here.
    pub fn antecedent(&self) -> Option<StateKey> {
        self.antecedent
    }

    /// The audit log, oldest first.
    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log
    }

    /// The most recent log message.
    pub fn last_message(&self) -> Option<&str> {
        self.log.last().map(|entry| entry.message.as_str())
    }

    /// Appends a message to the audit log.
    pub fn log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Reads a context value.
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Writes a context value.
    pub fn insert_context(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), value);
    }

    /// Stores a serialisable value in the context payload.
    pub fn insert_context_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(WorkflowError::from)?;
        self.context.insert(key.into(), value);
        Ok(())
    }

    /// The registered hooks in registration order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// True when a completion gate is set.
    pub fn has_gate(&self) -> bool {
        self.can_complete.is_some()
    }

    pub(crate) fn push_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub(crate) fn set_gate(&mut self, gate: Gate) {
        self.can_complete = Some(gate);
    }

    pub(crate) fn gate(&self) -> Option<Gate> {
        self.can_complete.clone()
    }

    pub(crate) fn hooks_for(&self, point: LifecyclePoint) -> Vec<Action> {
        self.actions
            .iter()
            .filter(|action| action.point == point)
            .cloned()
            .collect()
    }

    /// The single choke point for status changes.
    ///
    /// Returns the previous status when the value changed.
    pub(crate) fn set_status(&mut self, status: Status) -> Option<Status> {
        if self.status == status {
            return None;
        }
        let previous = self.status;
        self.status = status;
        self.is_dirty = true;
        self.log(format!("{} status changed from {} to {}", self.name, previous, status));
        Some(previous)
    }

    pub(crate) fn set_antecedent(&mut self, antecedent: Option<StateKey>) {
        self.antecedent = antecedent;
    }

    pub(crate) fn clear_links(&mut self) {
        self.transition = None;
        self.antecedent = None;
    }

    pub(crate) fn finish_reset(&mut self, clear_log: bool) {
        self.is_dirty = false;
        if clear_log {
            self.log.clear();
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("is_dirty", &self.is_dirty)
            .field("transition", &self.transition)
            .field("antecedent", &self.antecedent)
            .field("actions", &self.actions.len())
            .field("log", &self.log.len())
            .finish()
    }
}
