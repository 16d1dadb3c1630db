//! Undo/redo support for the timeline.
//!
//! Three layers cooperate here. [`UndoableActionLog`] is the transaction
//! log proper: stacks of reversible actions with nested grouping and a
//! saved-state checkpoint. The trackers keep per-object snapshots so a
//! change notification carrying only a new value can be turned into an
//! (old, new) pair. [`TimelineLogObserver`] sits between the two,
//! translating drained timeline events into recorded actions, and is
//! switched into replay mode while the log re-applies history so replays
//! never log themselves.

mod action_log;
mod observer;
mod trackers;

pub use action_log::{ActionLogEvent, UndoableActionLog, UndoableActionStack};
pub use observer::{ObserverMode, TimelineLogObserver};
pub use trackers::{KeyframeChangeTracker, PropertyChangeTracker, TRACKED_PROPERTIES};

use crate::timeline::{EditError, Timeline};

#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("no transaction is open")]
    NoTransaction,
    #[error("a transaction is still open")]
    TransactionOpen,
    #[error("action `{action}` failed during {phase}: {source}")]
    ActionFailed {
        action: &'static str,
        phase: &'static str,
        #[source]
        source: EditError,
    },
}

impl UndoError {
    pub(crate) fn failed(action: &'static str, phase: &'static str, source: EditError) -> Self {
        Self::ActionFailed {
            action,
            phase,
            source,
        }
    }
}

/// A reversible operation recorded against the timeline.
///
/// `apply` followed by `revert` must restore the exact prior state, and
/// `revert` followed by `apply` the exact posterior state. Actions carry
/// value snapshots taken at record time; they never read the live model
/// to decide what "old" means.
pub trait UndoableAction: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError>;

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError>;
}
