//! Workflow arena and builder.
//!
//! This module provides [`Workflow`], which owns every [`State`] in a
//! petgraph graph, and [`StateBuilder`] for wiring states together.
//! Structural relations are graph edges; the runtime `transition` and
//! `antecedent` links are keys stored on the states themselves.

use futures::future::BoxFuture;
use petgraph::graph::{DiGraph, EdgeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::{Engine, Mode};
use crate::hook::{Action, Gate, LifecyclePoint};
use crate::report::StatusReport;
use crate::{Result, State, StateKey, Status, WorkflowError, WorkflowEvent};

/// Default channel capacity for workflow events.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default bound on nested initialise/transition calls.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Tunables for a [`Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Upper bound on nested `initialise`/`transition` calls within one
    /// cascade. Cycles of `Auto` states would otherwise never terminate.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A structural edge between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    /// Parent to owned child.
    SubState,
    /// State to candidate successor.
    Transition,
    /// Prerequisite to dependant.
    Dependency { initialise_on_complete: bool },
}

/// A hierarchical workflow: the arena owning every state.
///
/// # Example
///
/// ```
/// use heddle::{State, Status, Workflow};
///
/// let mut workflow = Workflow::new();
/// let collect = workflow.add_state(State::new(1, "Collect"));
/// let review = workflow.add_state(State::new(2, "Review"));
/// workflow.node(collect).add_transition(review);
/// workflow.node(review).add_transition(collect);
///
/// workflow.execute(collect, Status::Initialised)?;
/// let current = workflow.execute(collect, Status::Completed)?;
///
/// assert_eq!(current, review);
/// assert_eq!(workflow.state(review).unwrap().status(), Status::Initialised);
/// assert_eq!(workflow.state(review).unwrap().antecedent(), Some(collect));
/// # Ok::<(), heddle::WorkflowError>(())
/// ```
///
/// # Concurrency
///
/// Execution takes `&mut self`, so one call owns the whole graph for its
/// duration. `Workflow` is `Send` and can be moved into async tasks.
pub struct Workflow {
    graph: DiGraph<State, Link>,
    config: EngineConfig,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl Workflow {
    /// Creates an empty workflow with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an empty workflow with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            graph: DiGraph::new(),
            config,
            event_tx,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribes to execution events.
    ///
    /// Events are not persisted; if the receiver is too slow, events may
    /// be dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// Ignores send errors (no subscribers or channel full).
    pub(crate) fn emit(&self, event: WorkflowEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Adds a state and returns its key.
    pub fn add_state(&mut self, state: State) -> StateKey {
        debug!(id = state.id(), name = %state.name(), "adding state");
        StateKey::from_node(self.graph.add_node(state))
    }

    /// Returns a chaining builder for the state.
    ///
    /// # Panics
    ///
    /// Panics if the key does not belong to this workflow.
    pub fn node(&mut self, key: StateKey) -> StateBuilder<'_> {
        assert!(self.contains(key), "unknown state {}", key);
        StateBuilder {
            workflow: self,
            key,
        }
    }

    /// Returns the number of states.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the workflow has no states.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns true if the key belongs to this workflow.
    pub fn contains(&self, key: StateKey) -> bool {
        self.graph.node_weight(key.node()).is_some()
    }

    /// Returns every key in insertion order.
    pub fn keys(&self) -> Vec<StateKey> {
        self.graph.node_indices().map(StateKey::from_node).collect()
    }

    /// Returns the state for a key.
    pub fn state(&self, key: StateKey) -> Option<&State> {
        self.graph.node_weight(key.node())
    }

    /// Returns the state for a key, mutably.
    pub fn state_mut(&mut self, key: StateKey) -> Option<&mut State> {
        self.graph.node_weight_mut(key.node())
    }

    /// Finds the first state with the given id.
    pub fn find(&self, id: i64) -> Option<StateKey> {
        self.graph
            .node_indices()
            .find(|index| self.graph[*index].id() == id)
            .map(StateKey::from_node)
    }

    /// Finds the first state with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<StateKey> {
        self.graph
            .node_indices()
            .find(|index| self.graph[*index].name() == name)
            .map(StateKey::from_node)
    }

    /// Returns the parent of a state.
    pub fn parent(&self, key: StateKey) -> Option<StateKey> {
        self.linked(key, Direction::Incoming, |link| matches!(link, Link::SubState))
            .into_iter()
            .next()
            .map(|(_, parent)| parent)
    }

    /// Returns the owned children in insertion order.
    pub fn sub_states(&self, key: StateKey) -> Vec<StateKey> {
        self.linked(key, Direction::Outgoing, |link| matches!(link, Link::SubState))
            .into_iter()
            .map(|(_, child)| child)
            .collect()
    }

    /// Returns the candidate successors in insertion order.
    pub fn transitions(&self, key: StateKey) -> Vec<StateKey> {
        self.linked(key, Direction::Outgoing, |link| matches!(link, Link::Transition))
            .into_iter()
            .map(|(_, target)| target)
            .collect()
    }

    /// Returns the states that must complete before this one initialises.
    pub fn dependencies(&self, key: StateKey) -> Vec<StateKey> {
        self.linked(key, Direction::Incoming, |link| {
            matches!(link, Link::Dependency { .. })
        })
        .into_iter()
        .map(|(_, dependency)| dependency)
        .collect()
    }

    /// Returns the dependants, each with its auto-initialise flag.
    pub fn dependants(&self, key: StateKey) -> Vec<(StateKey, bool)> {
        self.linked(key, Direction::Outgoing, |link| {
            matches!(link, Link::Dependency { .. })
        })
        .into_iter()
        .map(|(edge, dependant)| {
            let flag = matches!(
                self.graph[edge],
                Link::Dependency {
                    initialise_on_complete: true
                }
            );
            (dependant, flag)
        })
        .collect()
    }

    /// Returns the dependencies that are not yet completed.
    pub fn unmet_dependencies(&self, key: StateKey) -> Vec<StateKey> {
        self.dependencies(key)
            .into_iter()
            .filter(|dependency| self.node_ref(*dependency).status() != Status::Completed)
            .collect()
    }

    /// Returns true if any dependency is not yet completed.
    pub fn has_unmet_dependencies(&self, key: StateKey) -> bool {
        !self.unmet_dependencies(key).is_empty()
    }

    /// Makes `child` a sub-state of `parent`.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::StateNotFound`] for foreign keys
    /// - [`WorkflowError::AlreadyOwned`] if the child already has a parent
    /// - [`WorkflowError::SubStateCycle`] if `child` is `parent` or one of
    ///   its ancestors
    pub fn try_add_sub_state(&mut self, parent: StateKey, child: StateKey) -> Result<()> {
        self.require(parent)?;
        self.require(child)?;
        if let Some(owner) = self.parent(child) {
            return Err(WorkflowError::AlreadyOwned {
                child,
                parent: owner,
            });
        }
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(WorkflowError::SubStateCycle { child, parent });
            }
            ancestor = self.parent(current);
        }
        self.graph.add_edge(parent.node(), child.node(), Link::SubState);
        Ok(())
    }

    /// Returns a summary of the subtree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::StateNotFound`] for a foreign key.
    pub fn report(&self, root: StateKey) -> Result<StatusReport> {
        self.require(root)?;
        Ok(StatusReport::collect(self, root))
    }

    /// Requests a status change using the blocking engine.
    ///
    /// Returns the state that is now the point of interest, which may
    /// differ from `key` (a successor, a rollback target, or a parent).
    ///
    /// # Errors
    ///
    /// Faults are returned as-is; changes made before the fault are kept.
    pub fn execute(&mut self, key: StateKey, status: Status) -> Result<StateKey> {
        self.execute_with(key, status, None)
    }

    /// Completes `key`, handing over to `target`.
    pub fn execute_to(&mut self, key: StateKey, target: StateKey) -> Result<StateKey> {
        self.execute_with(key, Status::Completed, Some(target))
    }

    /// Requests a status change with an optional transition target.
    pub fn execute_with(
        &mut self,
        key: StateKey,
        status: Status,
        target: Option<StateKey>,
    ) -> Result<StateKey> {
        futures::executor::block_on(Engine::new(self, Mode::Blocking).execute(key, status, target))
    }

    /// Resets a state and its sub-states using the blocking engine.
    pub fn reset(&mut self, key: StateKey, clear_log: bool) -> Result<()> {
        futures::executor::block_on(Engine::new(self, Mode::Blocking).reset_from(key, clear_log))
    }

    /// Evaluates the completion gate using the blocking engine.
    pub fn can_complete(&mut self, key: StateKey) -> Result<bool> {
        futures::executor::block_on(Engine::new(self, Mode::Blocking).can_complete(key))
    }

    /// Suspend-capable form of [`execute`](Self::execute).
    pub async fn execute_async(&mut self, key: StateKey, status: Status) -> Result<StateKey> {
        self.execute_with_async(key, status, None).await
    }

    /// Suspend-capable form of [`execute_to`](Self::execute_to).
    pub async fn execute_to_async(&mut self, key: StateKey, target: StateKey) -> Result<StateKey> {
        self.execute_with_async(key, Status::Completed, Some(target))
            .await
    }

    /// Suspend-capable form of [`execute_with`](Self::execute_with).
    pub async fn execute_with_async(
        &mut self,
        key: StateKey,
        status: Status,
        target: Option<StateKey>,
    ) -> Result<StateKey> {
        Engine::new(self, Mode::Suspendable)
            .execute(key, status, target)
            .await
    }

    /// Suspend-capable form of [`reset`](Self::reset).
    pub async fn reset_async(&mut self, key: StateKey, clear_log: bool) -> Result<()> {
        Engine::new(self, Mode::Suspendable)
            .reset_from(key, clear_log)
            .await
    }

    /// Suspend-capable form of [`can_complete`](Self::can_complete).
    pub async fn can_complete_async(&mut self, key: StateKey) -> Result<bool> {
        Engine::new(self, Mode::Suspendable).can_complete(key).await
    }

    pub(crate) fn require(&self, key: StateKey) -> Result<()> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(WorkflowError::StateNotFound(key))
        }
    }

    pub(crate) fn node_ref(&self, key: StateKey) -> &State {
        &self.graph[key.node()]
    }

    pub(crate) fn node_mut(&mut self, key: StateKey) -> &mut State {
        &mut self.graph[key.node()]
    }

    fn linked(
        &self,
        key: StateKey,
        direction: Direction,
        filter: impl Fn(&Link) -> bool,
    ) -> Vec<(EdgeIndex, StateKey)> {
        let mut edges: Vec<(EdgeIndex, StateKey)> = self
            .graph
            .edges_directed(key.node(), direction)
            .filter(|edge| filter(edge.weight()))
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (edge.id(), StateKey::from_node(other))
            })
            .collect();
        // petgraph walks adjacency lists newest first
        edges.sort_by_key(|(edge, _)| *edge);
        edges
    }

    fn find_link(
        &self,
        from: StateKey,
        to: StateKey,
        filter: impl Fn(&Link) -> bool,
    ) -> Option<EdgeIndex> {
        self.graph
            .edges_connecting(from.node(), to.node())
            .find(|edge| filter(edge.weight()))
            .map(|edge| edge.id())
    }

    fn link_transition(&mut self, from: StateKey, to: StateKey) {
        if self
            .find_link(from, to, |link| matches!(link, Link::Transition))
            .is_none()
        {
            self.graph.add_edge(from.node(), to.node(), Link::Transition);
        }
    }

    fn link_dependency(&mut self, dependency: StateKey, dependant: StateKey, initialise_on_complete: bool) {
        match self.find_link(dependency, dependant, |link| {
            matches!(link, Link::Dependency { .. })
        }) {
            Some(edge) => {
                if initialise_on_complete {
                    self.graph[edge] = Link::Dependency {
                        initialise_on_complete,
                    };
                }
            }
            None => {
                self.graph.add_edge(
                    dependency.node(),
                    dependant.node(),
                    Link::Dependency {
                        initialise_on_complete,
                    },
                );
            }
        }
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("states", &self.graph.node_count())
            .field("links", &self.graph.edge_count())
            .field("config", &self.config)
            .finish()
    }
}

/// Chaining builder over one state of a [`Workflow`].
///
/// Every method returns the builder so declarations can be chained. No
/// validation happens beyond keeping reciprocal links consistent: a
/// dependency and a dependant are the same edge seen from either end.
///
/// # Example
///
/// ```
/// use heddle::{LifecyclePoint, State, Workflow};
///
/// let mut workflow = Workflow::new();
/// let order = workflow.add_state(State::new(1, "Order"));
/// let pick = workflow.add_state(State::new(2, "Pick").with_initialise_with_parent(true));
/// let pack = workflow.add_state(State::new(3, "Pack"));
///
/// workflow
///     .node(order)
///     .add_sub_state(pick)
///     .add_sub_state(pack)
///     .add_action(LifecyclePoint::Entry, |state| {
///         state.log("order received");
///         Ok(())
///     });
/// workflow.node(pack).add_dependency(pick);
///
/// assert_eq!(workflow.sub_states(order), vec![pick, pack]);
/// assert_eq!(workflow.dependants(pick), vec![(pack, false)]);
/// ```
pub struct StateBuilder<'a> {
    workflow: &'a mut Workflow,
    key: StateKey,
}

impl<'a> StateBuilder<'a> {
    /// The key of the state being built.
    pub fn key(&self) -> StateKey {
        self.key
    }

    /// Adds an owned child.
    ///
    /// # Panics
    ///
    /// Panics if the child already has a parent or would become its own
    /// ancestor. Use [`Workflow::try_add_sub_state`] for a fallible version.
    pub fn add_sub_state(self, child: StateKey) -> Self {
        if let Err(error) = self.workflow.try_add_sub_state(self.key, child) {
            panic!("invalid sub-state: {}", error);
        }
        self
    }

    /// Adds a candidate successor. Re-adding is a no-op.
    pub fn add_transition(self, candidate: StateKey) -> Self {
        self.workflow.link_transition(self.key, candidate);
        self
    }

    /// Declares that this state waits for `dependency` to complete.
    pub fn add_dependency(self, dependency: StateKey) -> Self {
        self.workflow.link_dependency(dependency, self.key, false);
        self
    }

    /// Declares that `dependant` waits for this state, optionally
    /// initialising it when this state completes.
    pub fn add_dependant(self, dependant: StateKey, initialise_on_complete: bool) -> Self {
        self.workflow
            .link_dependency(self.key, dependant, initialise_on_complete);
        self
    }

    /// Registers a blocking hook.
    pub fn add_action<F>(self, point: LifecyclePoint, f: F) -> Self
    where
        F: Fn(&mut State) -> Result<()> + Send + Sync + 'static,
    {
        self.workflow
            .node_mut(self.key)
            .push_action(Action::blocking(point, f));
        self
    }

    /// Registers a suspendable hook.
    pub fn add_async_action<F>(self, point: LifecyclePoint, f: F) -> Self
    where
        F: for<'b> Fn(&'b mut State) -> BoxFuture<'b, Result<()>> + Send + Sync + 'static,
    {
        self.workflow
            .node_mut(self.key)
            .push_action(Action::suspendable(point, f));
        self
    }

    /// Sets a blocking completion gate, replacing any previous one.
    pub fn add_can_complete_predicate<F>(self, f: F) -> Self
    where
        F: Fn(&mut State) -> bool + Send + Sync + 'static,
    {
        self.workflow.node_mut(self.key).set_gate(Gate::blocking(f));
        self
    }

    /// Sets a suspendable completion gate, replacing any previous one.
    pub fn add_async_can_complete_predicate<F>(self, f: F) -> Self
    where
        F: for<'b> Fn(&'b mut State) -> BoxFuture<'b, bool> + Send + Sync + 'static,
    {
        self.workflow
            .node_mut(self.key)
            .set_gate(Gate::suspendable(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow_with(names: &[&str]) -> (Workflow, Vec<StateKey>) {
        let mut workflow = Workflow::new();
        let keys = names
            .iter()
            .enumerate()
            .map(|(i, name)| workflow.add_state(State::new(i as i64 + 1, *name)))
            .collect();
        (workflow, keys)
    }

    #[test]
    fn test_empty_workflow() {
        let workflow = Workflow::new();
        assert!(workflow.is_empty());
        assert_eq!(workflow.len(), 0);
        assert_eq!(workflow.config(), &EngineConfig::default());
    }

    #[test]
    fn test_add_state_and_lookup() {
        let (workflow, keys) = workflow_with(&["a", "b"]);
        assert_eq!(workflow.len(), 2);
        assert_eq!(workflow.keys(), keys);
        assert_eq!(workflow.find(2), Some(keys[1]));
        assert_eq!(workflow.find_by_name("a"), Some(keys[0]));
        assert!(workflow.find(9).is_none());
        assert_eq!(workflow.state(keys[0]).unwrap().name(), "a");
    }

    #[test]
    fn test_sub_states_keep_insertion_order() {
        let (mut workflow, keys) = workflow_with(&["p", "x", "y", "z"]);
        workflow
            .node(keys[0])
            .add_sub_state(keys[1])
            .add_sub_state(keys[2])
            .add_sub_state(keys[3]);

        assert_eq!(workflow.sub_states(keys[0]), vec![keys[1], keys[2], keys[3]]);
        assert_eq!(workflow.parent(keys[2]), Some(keys[0]));
        assert!(workflow.parent(keys[0]).is_none());
    }

    #[test]
    fn test_transitions_keep_insertion_order_and_dedupe() {
        let (mut workflow, keys) = workflow_with(&["a", "b", "c"]);
        workflow
            .node(keys[0])
            .add_transition(keys[2])
            .add_transition(keys[1])
            .add_transition(keys[2]);

        assert_eq!(workflow.transitions(keys[0]), vec![keys[2], keys[1]]);
    }

    #[test]
    fn test_dependency_is_reciprocal() {
        let (mut workflow, keys) = workflow_with(&["a", "b"]);
        workflow.node(keys[1]).add_dependency(keys[0]);

        assert_eq!(workflow.dependencies(keys[1]), vec![keys[0]]);
        assert_eq!(workflow.dependants(keys[0]), vec![(keys[1], false)]);
    }

    #[test]
    fn test_dependant_is_reciprocal_and_not_duplicated() {
        let (mut workflow, keys) = workflow_with(&["a", "b"]);
        workflow.node(keys[0]).add_dependant(keys[1], false);
        workflow.node(keys[1]).add_dependency(keys[0]);
        workflow.node(keys[0]).add_dependant(keys[1], true);

        assert_eq!(workflow.dependencies(keys[1]), vec![keys[0]]);
        assert_eq!(workflow.dependants(keys[0]), vec![(keys[1], true)]);
    }

    #[test]
    fn test_unmet_dependencies() {
        let (mut workflow, keys) = workflow_with(&["a", "b", "c"]);
        workflow
            .node(keys[2])
            .add_dependency(keys[0])
            .add_dependency(keys[1]);

        assert!(workflow.has_unmet_dependencies(keys[2]));
        assert_eq!(workflow.unmet_dependencies(keys[2]), vec![keys[0], keys[1]]);
        assert!(!workflow.has_unmet_dependencies(keys[0]));
    }

    #[test]
    fn test_try_add_sub_state_rejects_second_parent() {
        let (mut workflow, keys) = workflow_with(&["p", "q", "x"]);
        workflow.try_add_sub_state(keys[0], keys[2]).unwrap();

        let result = workflow.try_add_sub_state(keys[1], keys[2]);
        assert!(matches!(
            result,
            Err(WorkflowError::AlreadyOwned { parent, .. }) if parent == keys[0]
        ));
    }

    #[test]
    fn test_try_add_sub_state_rejects_cycle() {
        let (mut workflow, keys) = workflow_with(&["a", "b"]);
        workflow.try_add_sub_state(keys[0], keys[1]).unwrap();

        assert!(matches!(
            workflow.try_add_sub_state(keys[1], keys[0]),
            Err(WorkflowError::SubStateCycle { .. })
        ));
        assert!(matches!(
            workflow.try_add_sub_state(keys[1], keys[1]),
            Err(WorkflowError::SubStateCycle { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "invalid sub-state")]
    fn test_add_sub_state_panics_on_second_parent() {
        let (mut workflow, keys) = workflow_with(&["p", "q", "x"]);
        workflow.node(keys[0]).add_sub_state(keys[2]);
        workflow.node(keys[1]).add_sub_state(keys[2]);
    }

    #[test]
    fn test_foreign_key_is_not_found() {
        let (mut workflow, keys) = workflow_with(&["a"]);
        let foreign = StateKey::new(5);
        assert!(!workflow.contains(foreign));
        assert!(matches!(
            workflow.try_add_sub_state(keys[0], foreign),
            Err(WorkflowError::StateNotFound(key)) if key == foreign
        ));
        assert!(matches!(
            workflow.execute(foreign, Status::Initialised),
            Err(WorkflowError::StateNotFound(_))
        ));
    }

    #[test]
    fn test_builder_registers_actions_and_gate() {
        let (mut workflow, keys) = workflow_with(&["a"]);
        let key = workflow
            .node(keys[0])
            .add_action(LifecyclePoint::Entry, |_| Ok(()))
            .add_async_action(LifecyclePoint::Exit, |_| Box::pin(async { Ok(()) }))
            .add_can_complete_predicate(|_| true)
            .key();

        let state = workflow.state(key).unwrap();
        assert_eq!(state.actions().len(), 2);
        assert!(state.has_gate());
    }

    #[test]
    fn test_with_config() {
        let config = EngineConfig {
            event_capacity: 8,
            max_depth: 5,
        };
        let workflow = Workflow::with_config(config);
        assert_eq!(workflow.config().max_depth, 5);
    }

    #[test]
    fn test_debug_format() {
        let (workflow, _) = workflow_with(&["a", "b"]);
        let debug = format!("{:?}", workflow);
        assert!(debug.contains("states: 2"));
    }
}
