//! Cache layer configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest shard count a kind may use.
pub const MAX_SHARDS: usize = 256;

/// Configuration for [`CachedDatastore`](crate::CachedDatastore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached entities.
    pub default_ttl: Duration,

    /// Per-kind lifetime overrides.
    pub kind_ttl: BTreeMap<String, Duration>,

    /// Largest encoded entity that is cached. Bigger entities get a
    /// permanent lock instead.
    pub max_value_size: usize,

    /// Lifetime of write locks; `None` keeps them until the write clears them.
    pub lock_ttl: Option<Duration>,

    /// Lifetime of the lock a reader places before fetching.
    pub read_lock_ttl: Duration,

    /// Cache slots per key unless the kind overrides it.
    pub default_shards: usize,

    /// Per-kind shard counts. Zero disables caching for the kind.
    pub kind_shards: BTreeMap<String, usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            kind_ttl: BTreeMap::new(),
            max_value_size: 1_000_000 - 1_000,
            lock_ttl: None,
            read_lock_ttl: Duration::from_secs(31),
            default_shards: 1,
            kind_shards: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default entity lifetime.
    #[must_use]
    pub const fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Overrides the lifetime for one kind.
    #[must_use]
    pub fn kind_ttl(mut self, kind: impl Into<String>, ttl: Duration) -> Self {
        self.kind_ttl.insert(kind.into(), ttl);
        self
    }

    /// Sets the size ceiling for cached payloads.
    #[must_use]
    pub const fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Sets the write lock lifetime.
    #[must_use]
    pub const fn lock_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the default shard count.
    #[must_use]
    pub const fn default_shards(mut self, shards: usize) -> Self {
        self.default_shards = shards;
        self
    }

    /// Overrides the shard count for one kind.
    #[must_use]
    pub fn kind_shards(mut self, kind: impl Into<String>, shards: usize) -> Self {
        self.kind_shards.insert(kind.into(), shards);
        self
    }

    /// Lifetime of cached entities of `kind`.
    #[must_use]
    pub fn ttl_for(&self, kind: &str) -> Duration {
        self.kind_ttl.get(kind).copied().unwrap_or(self.default_ttl)
    }

    /// Cache slots for entities of `kind`, clamped to [`MAX_SHARDS`].
    #[must_use]
    pub fn shards_for(&self, kind: &str) -> usize {
        self.kind_shards
            .get(kind)
            .copied()
            .unwrap_or(self.default_shards)
            .min(MAX_SHARDS)
    }
}
