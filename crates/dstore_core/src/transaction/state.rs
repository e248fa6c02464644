//! Transaction state and options.

/// Lifecycle of one transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, body not started.
    Idle,
    /// Body is running; reads and buffered writes are allowed.
    Running,
    /// Snapshot was applied.
    Committed,
    /// Conflict check failed (or was forced to); the attempt was discarded.
    Conflicted,
    /// Body returned an error; the attempt was discarded.
    Failed,
}

impl TransactionState {
    /// True once the attempt can no longer change.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Conflicted | TransactionState::Failed
        )
    }
}

/// Per-call transaction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Attempts before giving up; 0 means the datastore default.
    pub attempts: usize,
    /// Allow touching several entity groups.
    pub xg: bool,
    /// Reject writes.
    pub read_only: bool,
}

impl TransactionOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Keeps retrying until the transaction commits or fails.
    #[must_use]
    pub const fn retry_forever(mut self) -> Self {
        self.attempts = usize::MAX;
        self
    }

    /// Allows cross-group transactions.
    #[must_use]
    pub const fn xg(mut self, xg: bool) -> Self {
        self.xg = xg;
        self
    }

    /// Makes the transaction read-only.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_states() {
        assert!(!TransactionState::Idle.is_finished());
        assert!(!TransactionState::Running.is_finished());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::Conflicted.is_finished());
        assert!(TransactionState::Failed.is_finished());
    }

    #[test]
    fn options_builder() {
        let opts = TransactionOptions::new().xg(true).retry_forever();
        assert!(opts.xg);
        assert_eq!(opts.attempts, usize::MAX);
        assert!(!opts.read_only);
    }
}
