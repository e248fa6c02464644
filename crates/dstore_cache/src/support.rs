//! Shared state of the cache layer: the cache, its configuration, and the
//! key to slot mapping.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dstore_codec::to_canonical_cbor;
use dstore_core::serialize::key_to_value;
use dstore_core::Key;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::item::CacheItem;

/// Prefix of every slot key written by this layer.
pub const KEY_PREFIX: &str = "dscache1";

/// Slot key of `shard` for `key`.
///
/// # Errors
///
/// Fails only if the key cannot be encoded.
pub fn fingerprint(key: &Key, shard: usize) -> CacheResult<String> {
    let encoded = to_canonical_cbor(&key_to_value(key))?;
    let digest = Sha256::digest(&encoded);
    Ok(format!("{KEY_PREFIX}:{shard}:{digest:x}"))
}

/// Logs and drops a cache fault.
pub(crate) fn swallow<T>(op: &'static str, result: CacheResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            debug!(op, %error, "dscache: ignoring cache failure");
            None
        }
    }
}

/// The cache plus the configuration deciding how keys map onto it.
pub struct CacheContext {
    cache: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl CacheContext {
    /// Creates a context.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    /// The cache.
    #[must_use]
    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache slots for `key`; incomplete keys have none.
    #[must_use]
    pub fn shards(&self, key: &Key) -> usize {
        if key.is_incomplete() {
            return 0;
        }
        self.config.shards_for(key.kind())
    }

    /// One randomly chosen slot of `key`, or `None` if it is not cached.
    pub fn random_fingerprint(&self, key: &Key) -> Option<String> {
        let shards = self.shards(key);
        if shards == 0 {
            return None;
        }
        let shard = rand::thread_rng().gen_range(0..shards);
        swallow("fingerprint", fingerprint(key, shard))
    }

    /// Every slot of every key, in key order.
    pub fn all_fingerprints<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> Vec<String> {
        let mut out = Vec::new();
        for key in keys {
            for shard in 0..self.shards(key) {
                if let Some(fp) = swallow("fingerprint", fingerprint(key, shard)) {
                    out.push(fp);
                }
            }
        }
        out
    }

    /// Sets write locks on `fingerprints`. Failures are logged.
    pub fn lock(&self, fingerprints: &[String]) {
        if fingerprints.is_empty() {
            return;
        }
        let items: Vec<CacheItem> = fingerprints
            .iter()
            .map(|fp| CacheItem::lock(fp.as_str(), Bytes::new(), self.config.lock_ttl))
            .collect();
        swallow("set", self.cache.set_multi(&items));
    }

    /// Clears `fingerprints`. Failures are logged.
    pub fn clear(&self, fingerprints: &[String]) {
        if fingerprints.is_empty() {
            return;
        }
        swallow("delete", self.cache.delete_multi(fingerprints));
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
