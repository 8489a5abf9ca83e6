//! Lifecycle hooks and completion gates.
//!
//! A hook is a unit of business logic bound to a [`LifecyclePoint`]. It is
//! either blocking or suspendable, never both: [`Hook`] is a tagged variant
//! and both execution modes branch on the tag inside one pipeline.
//!
//! Hooks receive the owning [`State`] mutably. They may log, pick the
//! state's `transition`, or edit its context payload, and they report
//! failure by returning an error, which aborts the running operation.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{Result, State};

/// Where in a state's lifecycle a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePoint {
    /// Before the state becomes `Initialised`.
    Entry,
    /// After every engine-driven status change.
    Status,
    /// Before the state becomes `Completed`.
    Exit,
    /// After the state has been reset.
    Reset,
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entry => "Entry",
            Self::Status => "Status",
            Self::Exit => "Exit",
            Self::Reset => "Reset",
        };
        f.write_str(name)
    }
}

/// A hook callable that runs to completion without suspending.
pub type BlockingFn = Arc<dyn Fn(&mut State) -> Result<()> + Send + Sync>;

/// A hook callable that may suspend.
pub type SuspendableFn = Arc<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// A blocking completion predicate.
pub type BlockingGateFn = Arc<dyn Fn(&mut State) -> bool + Send + Sync>;

/// A suspendable completion predicate.
pub type SuspendableGateFn = Arc<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, bool> + Send + Sync>;

/// The callable behind an [`Action`].
#[derive(Clone)]
pub enum Hook {
    /// Invoked inline by both engines.
    Blocking(BlockingFn),
    /// Awaited by the suspend-capable engine; rejected by the blocking one.
    Suspendable(SuspendableFn),
}

impl Hook {
    /// Returns true for hooks the blocking engine can run.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Hook::Blocking"),
            Self::Suspendable(_) => f.write_str("Hook::Suspendable"),
        }
    }
}

/// A hook registered against a lifecycle point.
#[derive(Debug, Clone)]
pub struct Action {
    /// When the hook runs.
    pub point: LifecyclePoint,
    /// What runs.
    pub hook: Hook,
}

impl Action {
    /// Creates a blocking action.
    pub fn blocking<F>(point: LifecyclePoint, f: F) -> Self
    where
        F: Fn(&mut State) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            point,
            hook: Hook::Blocking(Arc::new(f)),
        }
    }

    /// Creates a suspendable action.
    ///
    /// ```
    /// use heddle::{Action, LifecyclePoint};
    ///
    /// let action = Action::suspendable(LifecyclePoint::Entry, |state| {
    ///     Box::pin(async move {
    ///         state.log("entered");
    ///         Ok(())
    ///     })
    /// });
    /// assert!(!action.hook.is_blocking());
    /// ```
    pub fn suspendable<F>(point: LifecyclePoint, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        Self {
            point,
            hook: Hook::Suspendable(Arc::new(f)),
        }
    }
}

/// The predicate consulted before a state may complete.
#[derive(Clone)]
pub enum Gate {
    /// Evaluated inline.
    Blocking(BlockingGateFn),
    /// Awaited; the blocking engine rejects it.
    Suspendable(SuspendableGateFn),
}

impl Gate {
    /// Wraps a blocking predicate.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&mut State) -> bool + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    /// Wraps a suspendable predicate.
    pub fn suspendable<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, bool> + Send + Sync + 'static,
    {
        Self::Suspendable(Arc::new(f))
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Gate::Blocking"),
            Self::Suspendable(_) => f.write_str("Gate::Suspendable"),
        }
    }
}
