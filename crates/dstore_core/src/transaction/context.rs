//! The transactional context set.
//!
//! Components are kept in a fixed order. Locking the set acquires every
//! component lock in that order; dropping the [`LockedSet`] releases them in
//! reverse order.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::backend::CommitHook;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

use super::state::{TransactionOptions, TransactionState};

/// A sub-store that takes part in transactions.
pub trait TxnComponent: Send + Sync {
    /// Short name used in traces.
    fn name(&self) -> &'static str;

    /// Captures the current state for a new attempt.
    fn begin(&self, opts: &TransactionOptions) -> Box<dyn ComponentSnapshot>;

    /// Takes the component's exclusive lock.
    fn lock(&self) -> Box<dyn LockedComponent + '_>;
}

/// Per-attempt view of one component: its base state plus buffered writes.
pub trait ComponentSnapshot: Any + Send {
    /// Drops everything the attempt was holding on to.
    fn end_transaction(&mut self);

    /// Upcast for downcasting to the concrete snapshot.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete snapshot.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A component while its lock is held.
pub trait LockedComponent {
    /// True if `snapshot` does not conflict with the current state.
    fn can_apply(&self, snapshot: &dyn ComponentSnapshot) -> bool;

    /// Makes the buffered writes of `snapshot` the current state.
    fn apply(&mut self, snapshot: &mut dyn ComponentSnapshot);
}

/// Ordered list of transactional components.
#[derive(Clone)]
pub struct ContextSet {
    components: Vec<Arc<dyn TxnComponent>>,
}

impl ContextSet {
    /// Creates a set; lock order is the order given.
    #[must_use]
    pub fn new(components: Vec<Arc<dyn TxnComponent>>) -> Self {
        Self { components }
    }

    /// Snapshots every component for a new attempt.
    #[must_use]
    pub fn begin(&self, id: TransactionId, opts: &TransactionOptions) -> ContextSnapshot {
        ContextSnapshot {
            id,
            state: TransactionState::Running,
            parts: self.components.iter().map(|c| c.begin(opts)).collect(),
            hooks: Vec::new(),
        }
    }

    /// Locks every component, in order.
    #[must_use]
    pub fn lock(&self) -> LockedSet<'_> {
        LockedSet {
            guards: self.components.iter().map(|c| c.lock()).collect(),
        }
    }
}

impl fmt::Debug for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.components.iter().map(|c| c.name()).collect();
        f.debug_struct("ContextSet").field("components", &names).finish()
    }
}

/// Every component lock of a [`ContextSet`].
pub struct LockedSet<'a> {
    guards: Vec<Box<dyn LockedComponent + 'a>>,
}

impl LockedSet<'_> {
    /// True if every component accepts the snapshot.
    #[must_use]
    pub fn can_apply(&self, snapshot: &ContextSnapshot) -> bool {
        self.guards
            .iter()
            .zip(&snapshot.parts)
            .all(|(guard, part)| guard.can_apply(part.as_ref()))
    }

    /// Applies the snapshot to every component, in lock order.
    pub fn apply(&mut self, snapshot: &mut ContextSnapshot) {
        for (guard, part) in self.guards.iter_mut().zip(snapshot.parts.iter_mut()) {
            guard.apply(part.as_mut());
        }
    }
}

impl Drop for LockedSet<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Snapshots of every component for one attempt.
pub struct ContextSnapshot {
    id: TransactionId,
    state: TransactionState,
    parts: Vec<Box<dyn ComponentSnapshot>>,
    hooks: Vec<CommitHook>,
}

impl ContextSnapshot {
    /// Transaction this attempt belongs to.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Fails unless the attempt is still running.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] once the attempt finished.
    pub fn ensure_running(&self) -> CoreResult<()> {
        if self.state == TransactionState::Running {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} is {:?}",
                self.id, self.state
            )))
        }
    }

    /// The snapshot of the component whose snapshot type is `T`.
    #[must_use]
    pub fn part<T: ComponentSnapshot>(&self) -> Option<&T> {
        self.parts.iter().find_map(|p| p.as_any().downcast_ref::<T>())
    }

    /// Mutable access to the snapshot of type `T`.
    pub fn part_mut<T: ComponentSnapshot>(&mut self) -> Option<&mut T> {
        self.parts
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<T>())
    }

    /// Queues `hook` to run if this attempt commits.
    ///
    /// # Errors
    ///
    /// Fails once the attempt finished.
    pub fn on_commit(&mut self, hook: CommitHook) -> CoreResult<()> {
        self.ensure_running()?;
        self.hooks.push(hook);
        Ok(())
    }

    pub(crate) fn take_hooks(&mut self) -> Vec<CommitHook> {
        std::mem::take(&mut self.hooks)
    }

    /// Ends every component snapshot, in reverse order, and records `state`.
    pub(crate) fn finish(&mut self, state: TransactionState) {
        for part in self.parts.iter_mut().rev() {
            part.end_transaction();
        }
        self.hooks.clear();
        self.state = state;
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("parts", &self.parts.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
