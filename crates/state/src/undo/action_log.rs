use crate::timeline::Timeline;

use super::{UndoError, UndoableAction};

/// One committed transaction: the actions recorded between a `begin` and
/// its matching top-level `commit`.
#[derive(Debug)]
pub struct UndoableActionStack {
    name: String,
    actions: Vec<Box<dyn UndoableAction>>,
}

impl UndoableActionStack {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn push(&mut self, action: Box<dyn UndoableAction>) {
        self.actions.push(action);
    }

    fn revert_all(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        for action in self.actions.iter_mut().rev() {
            action.revert(timeline)?;
        }
        Ok(())
    }

    fn apply_all(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        for action in self.actions.iter_mut() {
            action.apply(timeline)?;
        }
        Ok(())
    }
}

/// Notifications for the host, drained after each call. The `nested`
/// flag on `Commit` lets the host skip affordance updates for inner
/// commits, which do not change what undo/redo would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLogEvent {
    Begin { nested: bool },
    Push,
    Commit { nested: bool },
    Rollback,
    Undo,
    Redo,
    Checkpoint,
}

/// The transaction log.
///
/// At most one stack is open at a time; nested `begin` calls raise a
/// depth counter so everything recorded until the matching outer
/// `commit` forms a single undo unit. Committing clears redo history.
/// The `running` flag suppresses recording entry points while a stack
/// is being replayed.
#[derive(Debug, Default)]
pub struct UndoableActionLog {
    undo_stacks: Vec<UndoableActionStack>,
    redo_stacks: Vec<UndoableActionStack>,
    open: Option<UndoableActionStack>,
    depth: u32,
    running: bool,
    checkpoint: usize,
    events: Vec<ActionLogEvent>,
}

impl UndoableActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_events(&mut self) -> Vec<ActionLogEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.open.is_some()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stacks.is_empty() && self.open.is_none()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stacks.is_empty() && self.open.is_none()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stacks.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stacks.len()
    }

    pub fn undo_name(&self) -> Option<&str> {
        self.undo_stacks.last().map(|s| s.name())
    }

    pub fn redo_name(&self) -> Option<&str> {
        self.redo_stacks.last().map(|s| s.name())
    }

    pub fn begin(&mut self, name: impl Into<String>) {
        if self.running {
            return;
        }
        self.depth += 1;
        let nested = self.depth > 1;
        if !nested {
            let name = name.into();
            tracing::debug!(transaction = %name, "begin");
            self.open = Some(UndoableActionStack::new(name));
        }
        self.events.push(ActionLogEvent::Begin { nested });
    }

    pub fn push(&mut self, action: Box<dyn UndoableAction>) -> Result<(), UndoError> {
        if self.running {
            return Ok(());
        }
        let stack = self.open.as_mut().ok_or(UndoError::NoTransaction)?;
        tracing::trace!(action = action.name(), transaction = stack.name(), "push");
        stack.push(action);
        self.events.push(ActionLogEvent::Push);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), UndoError> {
        if self.running {
            return Ok(());
        }
        if self.depth == 0 {
            return Err(UndoError::NoTransaction);
        }
        self.depth -= 1;
        let nested = self.depth > 0;
        if !nested {
            let stack = self.open.take().ok_or(UndoError::NoTransaction)?;
            tracing::debug!(transaction = stack.name(), actions = stack.len(), "commit");
            self.undo_stacks.push(stack);
            self.redo_stacks.clear();
        }
        self.events.push(ActionLogEvent::Commit { nested });
        Ok(())
    }

    /// Aborts the whole open transaction, reverting anything already
    /// recorded. Nested depth collapses with it: a rollback at any level
    /// abandons the gesture, so both undo and redo history stay exactly
    /// as they were before `begin`.
    pub fn rollback(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        if self.running {
            return Ok(());
        }
        let mut stack = self.open.take().ok_or(UndoError::NoTransaction)?;
        self.depth = 0;
        tracing::debug!(transaction = stack.name(), actions = stack.len(), "rollback");
        let result = self.run(|log_timeline| stack.revert_all(log_timeline), timeline);
        self.events.push(ActionLogEvent::Rollback);
        result
    }

    /// Reverts the most recent transaction. Returns `false` when there is
    /// nothing to undo. Calling this with a transaction open is a
    /// programming error. If any contained action fails the whole stack
    /// is dropped as suspect and the error surfaces to the caller.
    pub fn undo(&mut self, timeline: &mut Timeline) -> Result<bool, UndoError> {
        if self.open.is_some() {
            return Err(UndoError::TransactionOpen);
        }
        let Some(mut stack) = self.undo_stacks.pop() else {
            return Ok(false);
        };
        tracing::debug!(transaction = stack.name(), "undo");
        self.run(|t| stack.revert_all(t), timeline)?;
        self.redo_stacks.push(stack);
        self.events.push(ActionLogEvent::Undo);
        Ok(true)
    }

    /// Mirror of [`UndoableActionLog::undo`], re-applying in forward
    /// insertion order.
    pub fn redo(&mut self, timeline: &mut Timeline) -> Result<bool, UndoError> {
        if self.open.is_some() {
            return Err(UndoError::TransactionOpen);
        }
        let Some(mut stack) = self.redo_stacks.pop() else {
            return Ok(false);
        };
        tracing::debug!(transaction = stack.name(), "redo");
        self.run(|t| stack.apply_all(t), timeline)?;
        self.undo_stacks.push(stack);
        self.events.push(ActionLogEvent::Redo);
        Ok(true)
    }

    /// Marks the current undo depth as the saved state.
    pub fn checkpoint(&mut self) -> Result<(), UndoError> {
        if self.open.is_some() {
            return Err(UndoError::TransactionOpen);
        }
        self.checkpoint = self.undo_stacks.len();
        self.events.push(ActionLogEvent::Checkpoint);
        Ok(())
    }

    /// Depth comparison against the checkpoint, not content comparison.
    /// Undoing back to the checkpointed depth reads as clean again.
    pub fn is_dirty(&self) -> bool {
        self.undo_stacks.len() != self.checkpoint
    }

    fn run<F>(&mut self, f: F, timeline: &mut Timeline) -> Result<(), UndoError>
    where
        F: FnOnce(&mut Timeline) -> Result<(), UndoError>,
    {
        self.running = true;
        let result = f(timeline);
        self.running = false;
        result
    }
}
