//! Optimistic transaction runner with bounded retries.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

use super::context::{ContextSet, ContextSnapshot};
use super::state::{TransactionOptions, TransactionState};

/// Runs transaction bodies against a [`ContextSet`].
///
/// Each attempt gets a fresh snapshot. A body error ends the run without a
/// retry. A conflict, real or forced, discards the attempt and starts the
/// next one until the attempt budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct Coordinator<'a> {
    set: &'a ContextSet,
    attempts: usize,
    forced_conflicts: usize,
}

impl<'a> Coordinator<'a> {
    /// Coordinator over `set`. `attempts` is clamped to at least one.
    #[must_use]
    pub fn new(set: &'a ContextSet, attempts: usize) -> Self {
        Self {
            set,
            attempts: attempts.max(1),
            forced_conflicts: 0,
        }
    }

    /// Makes the first `count` attempts report a conflict.
    #[must_use]
    pub const fn forced_conflicts(mut self, count: usize) -> Self {
        self.forced_conflicts = count;
        self
    }

    /// Runs `body` until an attempt commits.
    ///
    /// Commit hooks registered during the committing attempt run while the
    /// set is locked, after the conflict check and before the writes become
    /// visible.
    ///
    /// # Errors
    ///
    /// The body's error, or [`CoreError::ConcurrentTransaction`] when every
    /// attempt conflicted.
    pub fn run<F>(&self, id: TransactionId, opts: &TransactionOptions, mut body: F) -> CoreResult<()>
    where
        F: FnMut(&Mutex<ContextSnapshot>) -> CoreResult<()>,
    {
        let mut attempt = 0;
        while attempt < self.attempts {
            let snap = Mutex::new(self.set.begin(id, opts));
            trace!(%id, attempt, "transaction attempt started");

            if let Err(err) = body(&snap) {
                snap.lock().finish(TransactionState::Failed);
                debug!(%id, attempt, error = %err, "transaction body failed");
                return Err(err);
            }

            let mut snap = snap.into_inner();
            let mut locked = self.set.lock();
            if attempt >= self.forced_conflicts && locked.can_apply(&snap) {
                for hook in snap.take_hooks() {
                    hook();
                }
                locked.apply(&mut snap);
                drop(locked);
                snap.finish(TransactionState::Committed);
                debug!(%id, attempt, "transaction committed");
                return Ok(());
            }
            drop(locked);
            snap.finish(TransactionState::Conflicted);
            debug!(%id, attempt, "transaction conflicted, retrying");
            attempt += 1;
        }
        Err(CoreError::ConcurrentTransaction)
    }
}
