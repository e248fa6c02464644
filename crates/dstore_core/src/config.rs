//! Datastore configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`MemoryDatastore`](crate::MemoryDatastore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application id every key must carry.
    pub app_id: String,

    /// Namespace used for new keys and queries that do not name one.
    pub namespace: String,

    /// Attempts per transaction when the options do not say otherwise.
    pub transaction_attempts: usize,

    /// Whether transactions may run at all.
    pub transactions_enabled: bool,

    /// The first N attempts of every transaction report a conflict.
    pub forced_conflicts: usize,

    /// Entity groups a cross-group transaction may touch.
    pub max_xg_entity_groups: usize,

    /// Tasks a single transaction may enqueue.
    pub max_transactional_tasks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: "dev~app".to_string(),
            namespace: String::new(),
            transaction_attempts: 3,
            transactions_enabled: true,
            forced_conflicts: 0,
            max_xg_entity_groups: 25,
            max_transactional_tasks: 5,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application id.
    #[must_use]
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the default number of transaction attempts.
    #[must_use]
    pub const fn transaction_attempts(mut self, attempts: usize) -> Self {
        self.transaction_attempts = attempts;
        self
    }

    /// Enables or disables transactions.
    #[must_use]
    pub const fn transactions_enabled(mut self, enabled: bool) -> Self {
        self.transactions_enabled = enabled;
        self
    }

    /// Forces the first `count` attempts of every transaction to conflict.
    #[must_use]
    pub const fn forced_conflicts(mut self, count: usize) -> Self {
        self.forced_conflicts = count;
        self
    }

    /// Sets the entity group limit for cross-group transactions.
    #[must_use]
    pub const fn max_xg_entity_groups(mut self, limit: usize) -> Self {
        self.max_xg_entity_groups = limit;
        self
    }

    /// Sets the per-transaction task limit.
    #[must_use]
    pub const fn max_transactional_tasks(mut self, limit: usize) -> Self {
        self.max_transactional_tasks = limit;
        self
    }
}
