//! Status reporting and visualization.
//!
//! This module provides [`StatusReport`] for inspecting a subtree of a
//! workflow without going through the engine.

use std::fmt;

use crate::{Kind, StateKey, Status, Workflow};

/// Status entry for a single state within a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReportEntry {
    /// The state's key.
    pub key: StateKey,
    /// The state's integer id.
    pub id: i64,
    /// The display name.
    pub name: String,
    /// The behavioural kind.
    pub kind: Kind,
    /// The current status.
    pub status: Status,
    /// Whether the status changed since the last reset.
    pub is_dirty: bool,
    /// Nesting level below the report root.
    pub depth: usize,
    /// The most recent log message.
    pub last_message: Option<String>,
}

impl StateReportEntry {
    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        match self.status {
            Status::Uninitialised => '⏳',
            Status::Initialised => '▶',
            Status::InProgress => '🔄',
            Status::Completed => '✅',
            Status::Failed => '❌',
        }
    }
}

/// A snapshot of a workflow subtree, root first, children in order.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// The state the report starts from.
    pub root: StateKey,
    /// The states of the subtree in depth-first order.
    pub states: Vec<StateReportEntry>,
}

impl StatusReport {
    pub(crate) fn collect(workflow: &Workflow, root: StateKey) -> Self {
        let mut states = Vec::new();
        let mut stack = vec![(root, 0)];

        while let Some((key, depth)) = stack.pop() {
            let state = workflow.node_ref(key);
            states.push(StateReportEntry {
                key,
                id: state.id(),
                name: state.name().to_string(),
                kind: state.kind(),
                status: state.status(),
                is_dirty: state.is_dirty(),
                depth,
                last_message: state.last_message().map(str::to_string),
            });
            for child in workflow.sub_states(key).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        Self { root, states }
    }

    /// Returns true if every state in the subtree is completed.
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| s.status == Status::Completed)
    }

    /// Returns the names of states that are in progress.
    pub fn in_progress(&self) -> Vec<&str> {
        self.with_status(Status::InProgress)
    }

    /// Returns the names of states that are waiting to be worked on.
    pub fn initialised(&self) -> Vec<&str> {
        self.with_status(Status::Initialised)
    }

    /// Returns the names of states caught in a failure.
    pub fn failed(&self) -> Vec<&str> {
        self.with_status(Status::Failed)
    }

    /// Returns the share of completed states as a percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.states.is_empty() {
            return 100.0;
        }

        let completed = self
            .states
            .iter()
            .filter(|s| s.status == Status::Completed)
            .count();

        (completed as f32 / self.states.len() as f32) * 100.0
    }

    fn with_status(&self, status: Status) -> Vec<&str> {
        self.states
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.name.as_str())
            .collect()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in &self.states {
            let indent = "  ".repeat(state.depth);
            write!(
                f,
                "{}{} {:<15} {:<14}",
                indent,
                state.status_char(),
                state.name,
                state.status.to_string()
            )?;

            if state.kind != Kind::Standard {
                write!(f, " [{:?}]", state.kind)?;
            }

            if let Some(ref message) = state.last_message {
                write!(f, "  {}", message)?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {:.0}%", self.progress_percent())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;

    fn tree() -> (Workflow, StateKey, StateKey, StateKey) {
        let mut workflow = Workflow::new();
        let order = workflow.add_state(State::new(1, "Order").with_kind(Kind::Root));
        let pick = workflow.add_state(State::new(2, "Pick").with_initialise_with_parent(true));
        let pack = workflow.add_state(State::new(3, "Pack"));
        workflow.node(order).add_sub_state(pick).add_sub_state(pack);
        (workflow, order, pick, pack)
    }

    #[test]
    fn test_report_order_and_depth() {
        let (workflow, order, pick, pack) = tree();
        let report = workflow.report(order).unwrap();

        let keys: Vec<_> = report.states.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![order, pick, pack]);
        assert_eq!(report.states[0].depth, 0);
        assert_eq!(report.states[2].depth, 1);
    }

    #[test]
    fn test_report_progress() {
        let (mut workflow, order, pick, _) = tree();
        workflow.execute(order, Status::Initialised).unwrap();
        workflow.execute(pick, Status::Completed).unwrap();

        let report = workflow.report(order).unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.in_progress(), vec!["Order"]);
        assert!((report.progress_percent() - 33.33).abs() < 1.0);
        assert!(report.failed().is_empty());
    }

    #[test]
    fn test_report_display() {
        let (mut workflow, order, _, _) = tree();
        workflow.execute(order, Status::Initialised).unwrap();

        let display = workflow.report(order).unwrap().to_string();
        assert!(display.contains("Order"));
        assert!(display.contains("[Root]"));
        assert!(display.contains("  ▶ Pick"));
        assert!(display.contains("Progress: 0%"));
    }

    #[test]
    fn test_report_empty_subtree_is_leaf() {
        let mut workflow = Workflow::new();
        let solo = workflow.add_state(State::new(1, "Solo"));
        let report = workflow.report(solo).unwrap();
        assert_eq!(report.states.len(), 1);
        assert_eq!(report.initialised(), Vec::<&str>::new());
        assert_eq!(report.progress_percent(), 0.0);
    }

    #[test]
    fn test_status_chars() {
        let (workflow, order, _, _) = tree();
        let report = workflow.report(order).unwrap();
        assert_eq!(report.states[0].status_char(), '⏳');
    }
}
