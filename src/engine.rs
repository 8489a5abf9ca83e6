//! The execution engine.
//!
//! The state machine is written once, as async code over the arena. The
//! two execution modes only differ in how hooks are invoked:
//!
//! - [`Mode::Blocking`] runs blocking hooks inline and rejects suspendable
//!   ones. Nothing it awaits can be pending, so the caller drives it to
//!   completion with a plain `block_on`.
//! - [`Mode::Suspendable`] additionally awaits suspendable hooks in place,
//!   preserving registration order across mixed hook types.
//!
//! Recursive steps (`initialise`, `transition`, `change_status`, `reset`,
//! aggregation and rollback) return boxed futures. Each nested
//! `initialise` or `transition` counts one level of cascade depth, bounded
//! by [`EngineConfig::max_depth`](crate::EngineConfig::max_depth).

use futures::future::BoxFuture;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::hook::{Gate, Hook, LifecyclePoint};
use crate::{Kind, Result, State, StateKey, Status, Workflow, WorkflowError, WorkflowEvent};

/// How hooks are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Blocking,
    Suspendable,
}

/// One top-level call against a workflow.
pub(crate) struct Engine<'w> {
    workflow: &'w mut Workflow,
    mode: Mode,
    depth: usize,
}

impl<'w> Engine<'w> {
    pub(crate) fn new(workflow: &'w mut Workflow, mode: Mode) -> Self {
        Self {
            workflow,
            mode,
            depth: 0,
        }
    }

    /// Entry point: validates keys, dispatches and reports faults.
    pub(crate) async fn execute(
        mut self,
        key: StateKey,
        status: Status,
        target: Option<StateKey>,
    ) -> Result<StateKey> {
        self.workflow.require(key)?;
        if let Some(target) = target {
            self.workflow.require(target)?;
        }

        let span = info_span!(
            "execute",
            state = %self.workflow.node_ref(key).name(),
            status = %status,
            mode = ?self.mode,
        );
        let result = self.dispatch(key, status, target).instrument(span).await;
        self.report_fault(&result);
        result
    }

    pub(crate) async fn reset_from(mut self, key: StateKey, clear_log: bool) -> Result<()> {
        self.workflow.require(key)?;
        let result = self.reset(key, clear_log).await;
        self.report_fault(&result);
        result
    }

    pub(crate) async fn can_complete(mut self, key: StateKey) -> Result<bool> {
        self.workflow.require(key)?;
        self.evaluate_gate(key).await
    }

    async fn dispatch(
        &mut self,
        key: StateKey,
        status: Status,
        target: Option<StateKey>,
    ) -> Result<StateKey> {
        if self.workflow.node_ref(key).status() == status {
            debug!("status unchanged");
            return Ok(key);
        }

        if target.is_some() && matches!(status, Status::Completed | Status::Failed) {
            self.workflow.node_mut(key).set_transition(target);
            self.validate_transition(key)?;
        }
        if status == Status::Failed {
            self.set_status(key, Status::Failed);
        }

        match status {
            Status::Completed | Status::Failed => self.transition(key).await,
            Status::Initialised => self.initialise(key).await,
            Status::Uninitialised => {
                self.reset(key, false).await?;
                Ok(key)
            }
            Status::InProgress => self.change_status(key, status).await,
        }
    }

    fn initialise(&mut self, key: StateKey) -> BoxFuture<'_, Result<StateKey>> {
        Box::pin(async move {
            self.descend()?;
            let result = self.initialise_at(key).await;
            self.depth -= 1;
            result
        })
    }

    async fn initialise_at(&mut self, key: StateKey) -> Result<StateKey> {
        let unmet = self.workflow.unmet_dependencies(key);
        if !unmet.is_empty() {
            let listing = unmet
                .iter()
                .map(|dependency| {
                    let dependency = self.workflow.node_ref(*dependency);
                    format!("{} - {}", dependency.name(), dependency.status())
                })
                .collect::<Vec<_>>()
                .join(", ");
            let state = self.workflow.node_mut(key);
            warn!(state = %state.name(), unmet = unmet.len(), "dependencies not completed");
            let message = format!("{} is dependent on {}", state.name(), listing);
            state.log(message);
            self.workflow
                .emit(WorkflowEvent::DependenciesUnmet { state: key, unmet });
            return Ok(key);
        }

        self.run_hooks(key, LifecyclePoint::Entry).await?;
        self.set_status(key, Status::Initialised);
        self.run_hooks(key, LifecyclePoint::Status).await?;

        if self.workflow.node_ref(key).kind() == Kind::Auto {
            return self.transition(key).await;
        }

        for child in self.workflow.sub_states(key) {
            if self.workflow.node_ref(child).initialise_with_parent() {
                self.initialise(child).await?;
            }
        }
        Ok(key)
    }

    fn transition(&mut self, key: StateKey) -> BoxFuture<'_, Result<StateKey>> {
        Box::pin(async move {
            self.descend()?;
            let result = self.transition_at(key).await;
            self.depth -= 1;
            result
        })
    }

    async fn transition_at(&mut self, key: StateKey) -> Result<StateKey> {
        self.validate_transition(key)?;

        if self.workflow.node_ref(key).status() == Status::Failed {
            return self.fail(key).await;
        }

        let logged = self.workflow.node_ref(key).log_entries().len();
        if !self.evaluate_gate(key).await? {
            let state = self.workflow.node_mut(key);
            if state.log_entries().len() == logged {
                let message = format!("{} is unable to complete", state.name());
                state.log(message);
            }
            let message = state.last_message().unwrap_or_default().to_string();
            return Err(WorkflowError::CannotComplete {
                state: key,
                message,
            });
        }

        self.run_hooks(key, LifecyclePoint::Exit).await?;
        self.set_status(key, Status::Completed);
        self.run_hooks(key, LifecyclePoint::Status).await?;
        info!(state = %self.workflow.node_ref(key).name(), "state completed");

        if self.workflow.node_ref(key).transition().is_none() {
            if let [only] = self.workflow.transitions(key).as_slice() {
                let only = *only;
                self.workflow.node_mut(key).set_transition(Some(only));
            }
        }

        self.aggregate_parent(key).await?;

        for (dependant, initialise_on_complete) in self.workflow.dependants(key) {
            if initialise_on_complete {
                self.initialise(dependant).await?;
            }
        }

        if let Some(next) = self.workflow.node_ref(key).transition() {
            // hooks may have picked the successor after validation
            self.validate_transition(key)?;
            self.workflow.node_mut(next).set_antecedent(Some(key));
            self.workflow
                .emit(WorkflowEvent::TransitionSelected { from: key, to: next });
            return self.initialise(next).await;
        }

        if let Some(parent) = self.workflow.parent(key) {
            if self.parent_can_complete(key, parent) {
                let first = self.workflow.transitions(parent).first().copied();
                self.workflow.node_mut(parent).set_transition(first);
                return self.transition(parent).await;
            }
        }

        Ok(key)
    }

    /// Resolves a failed state: roll back to its transition, or revert.
    async fn fail(&mut self, key: StateKey) -> Result<StateKey> {
        let target = self.workflow.node_ref(key).transition();
        match self.rollback(Some(key), target).await? {
            Some(found) => {
                info!(
                    from = %self.workflow.node_ref(key).name(),
                    to = %self.workflow.node_ref(found).name(),
                    "rolled back"
                );
                self.workflow
                    .emit(WorkflowEvent::RolledBack { from: key, to: found });
                self.initialise(found).await
            }
            None => {
                let state = self.workflow.node_mut(key);
                let message = format!("{} has failed but is unable to transition", state.name());
                state.log(message);
                Ok(key)
            }
        }
    }

    fn change_status(&mut self, key: StateKey, status: Status) -> BoxFuture<'_, Result<StateKey>> {
        Box::pin(async move {
            if status == Status::Completed {
                return self.transition(key).await;
            }
            self.set_status(key, status);
            self.run_hooks(key, LifecyclePoint::Status).await?;
            self.aggregate_parent(key).await?;
            Ok(key)
        })
    }

    /// Pushes the parent to `InProgress` when its children call for it.
    fn aggregate_parent(&mut self, key: StateKey) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(parent) = self.workflow.parent(key) else {
                return Ok(());
            };

            let state = self.workflow.node_ref(parent);
            match state.status() {
                Status::InProgress => return Ok(()),
                Status::Completed => {
                    let message = format!(
                        "{} {} cannot be set to InProgress because it has already been set to Completed.",
                        state.id(),
                        state.name()
                    );
                    warn!(parent = %state.name(), "completed parent cannot return to in progress");
                    self.workflow.node_mut(parent).log(message.clone());
                    return Err(WorkflowError::IllegalParentPromotion {
                        state: parent,
                        message,
                    });
                }
                _ => {}
            }

            let statuses: Vec<Status> = self
                .workflow
                .sub_states(parent)
                .into_iter()
                .map(|child| self.workflow.node_ref(child).status())
                .collect();
            let completed = statuses.iter().filter(|s| **s == Status::Completed).count();
            let in_progress = statuses.contains(&Status::InProgress);

            if in_progress || (completed > 0 && completed < statuses.len()) {
                debug!(parent = %self.workflow.node_ref(parent).name(), "children in progress");
                self.change_status(parent, Status::InProgress).await?;
            }
            Ok(())
        })
    }

    /// Walks the antecedent chain back to `target`, resetting what it passes.
    fn rollback(
        &mut self,
        node: Option<StateKey>,
        target: Option<StateKey>,
    ) -> BoxFuture<'_, Result<Option<StateKey>>> {
        Box::pin(async move {
            let Some(key) = node else {
                return Ok(None);
            };
            let antecedent = self.workflow.node_ref(key).antecedent();

            if let Some(parent) = self.workflow.parent(key) {
                let idle = self.workflow.sub_states(parent).into_iter().all(|sibling| {
                    matches!(
                        self.workflow.node_ref(sibling).status(),
                        Status::Uninitialised | Status::Failed
                    )
                });
                if idle {
                    self.reset(parent, false).await?;
                }
            }

            let Some(target) = target else {
                self.reset(key, false).await?;
                return Ok(None);
            };
            if self.workflow.node_ref(key).id() == self.workflow.node_ref(target).id() {
                return Ok(Some(key));
            }

            let found = self.rollback(antecedent, Some(target)).await?;
            self.reset(key, false).await?;
            if let Some(found) = found {
                self.reset(found, false).await?;
            }
            Ok(found)
        })
    }

    fn reset(&mut self, key: StateKey, clear_log: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for child in self.workflow.sub_states(key) {
                self.reset(child, clear_log).await?;
            }
            self.workflow.node_mut(key).clear_links();
            self.set_status(key, Status::Uninitialised);
            self.run_hooks(key, LifecyclePoint::Reset).await?;
            self.workflow.node_mut(key).finish_reset(clear_log);
            self.workflow.emit(WorkflowEvent::Reset { state: key });
            Ok(())
        })
    }

    fn parent_can_complete(&self, key: StateKey, parent: StateKey) -> bool {
        let siblings = self.workflow.sub_states(parent);
        let completed = |sibling: &StateKey| self.workflow.node_ref(*sibling).status() == Status::Completed;

        if siblings.iter().all(completed) {
            return true;
        }
        self.workflow.node_ref(key).can_complete_parent()
            && siblings
                .iter()
                .filter(|sibling| self.workflow.node_ref(**sibling).can_complete_parent())
                .all(completed)
    }

    fn validate_transition(&mut self, key: StateKey) -> Result<()> {
        let Some(target) = self.workflow.node_ref(key).transition() else {
            return Ok(());
        };
        let valid = self.workflow.state(target).map(State::id).is_some_and(|id| {
            self.workflow
                .transitions(key)
                .into_iter()
                .any(|candidate| self.workflow.node_ref(candidate).id() == id)
        });
        if valid {
            return Ok(());
        }

        let target_name = self
            .workflow
            .state(target)
            .map_or_else(|| target.to_string(), |state| state.name().to_string());
        let state = self.workflow.node_mut(key);
        let name = state.name().to_string();
        warn!(state = %name, target = %target_name, "transition target is not a candidate");
        state.log(format!(
            "{} cannot transition to {} as it is not one of its transitions",
            name, target_name
        ));
        Err(WorkflowError::InvalidTransition {
            state: key,
            name,
            target,
        })
    }

    async fn evaluate_gate(&mut self, key: StateKey) -> Result<bool> {
        let Some(gate) = self.workflow.node_ref(key).gate() else {
            return Ok(true);
        };
        match gate {
            Gate::Blocking(f) => Ok(f(self.workflow.node_mut(key))),
            Gate::Suspendable(f) => match self.mode {
                Mode::Suspendable => Ok(f(self.workflow.node_mut(key)).await),
                Mode::Blocking => Err(WorkflowError::NoBlockingImplementation {
                    state: key,
                    point: LifecyclePoint::Exit,
                }),
            },
        }
    }

    async fn run_hooks(&mut self, key: StateKey, point: LifecyclePoint) -> Result<()> {
        let actions = self.workflow.node_ref(key).hooks_for(point);
        if actions.is_empty() {
            return Ok(());
        }
        debug!(state = %self.workflow.node_ref(key).name(), %point, count = actions.len(), "running hooks");

        for action in actions {
            match action.hook {
                Hook::Blocking(f) => f(self.workflow.node_mut(key))?,
                Hook::Suspendable(f) => match self.mode {
                    Mode::Suspendable => f(self.workflow.node_mut(key)).await?,
                    Mode::Blocking => {
                        return Err(WorkflowError::NoBlockingImplementation { state: key, point })
                    }
                },
            }
        }
        Ok(())
    }

    fn set_status(&mut self, key: StateKey, status: Status) {
        if let Some(from) = self.workflow.node_mut(key).set_status(status) {
            debug!(state = %self.workflow.node_ref(key).name(), %from, to = %status, "status changed");
            self.workflow.emit(WorkflowEvent::StatusChanged {
                state: key,
                from,
                to: status,
            });
        }
    }

    fn descend(&mut self) -> Result<()> {
        let limit = self.workflow.config().max_depth;
        if self.depth >= limit {
            warn!(limit, "cascade depth exceeded");
            return Err(WorkflowError::DepthLimitExceeded { limit });
        }
        self.depth += 1;
        Ok(())
    }

    fn report_fault<T>(&self, result: &Result<T>) {
        if let Err(error) = result {
            warn!(error = %error, "execution faulted");
            self.workflow.emit(WorkflowEvent::Faulted {
                state: error.state(),
                error: error.to_string(),
            });
        }
    }
}
