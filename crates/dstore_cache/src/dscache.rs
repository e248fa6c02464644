//! The caching datastore layer.
//!
//! Reads are served from the cache where possible. A reader that misses
//! first places a lock carrying its own nonce on the slot, fetches from the
//! wrapped datastore and writes back with compare-and-swap, so only the
//! reader holding the current lock may fill the slot. Writers lock every
//! slot of the touched keys before writing and clear them afterwards, which
//! makes any racing write-back fail its swap.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dstore_core::{
    CommitHook, CoreError, CoreResult, DeleteMultiCb, GetMultiCb, Key, KeyContext, PropertyMap,
    PutMultiCb, Query, RawDatastore, RawTaskQueue, RunCb, TransactionOptions, TxnFn,
};
use parking_lot::Mutex;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::item::{CacheItem, ItemFlags};
use crate::ledger::{TxnCachedDatastore, TxnLedger};
use crate::payload::encode_entity;
use crate::plan::FetchPlan;
use crate::support::{swallow, CacheContext};

/// A [`RawDatastore`] that keeps entities in a [`CacheBackend`] in front of
/// another datastore.
///
/// Cache failures never fail a datastore call; they are logged and the
/// request falls through to the wrapped datastore.
pub struct CachedDatastore<D> {
    inner: D,
    support: Arc<CacheContext>,
}

impl<D: RawDatastore> CachedDatastore<D> {
    /// Wraps `inner`, caching into `cache`.
    #[must_use]
    pub fn new(inner: D, cache: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self::with_context(inner, Arc::new(CacheContext::new(cache, config)))
    }

    /// Wraps `inner` with an existing cache context.
    #[must_use]
    pub fn with_context(inner: D, support: Arc<CacheContext>) -> Self {
        Self { inner, support }
    }

    /// The wrapped datastore.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// The cache context.
    pub fn context(&self) -> &CacheContext {
        &self.support
    }

    /// The item to write back for a fetched entity, if any.
    fn write_back(&self, key: &Key, save: &CacheItem, result: &CoreResult<PropertyMap>) -> Option<CacheItem> {
        let config = self.support.config();
        let ttl = Some(config.ttl_for(key.kind()));
        match result {
            Ok(pm) => {
                let payload = swallow("encode", encode_entity(pm))?;
                if payload.len() > config.max_value_size {
                    warn!(
                        size = payload.len(),
                        limit = config.max_value_size,
                        %key,
                        "dscache: entity too big to cache, locking its slot"
                    );
                    return Some(
                        save.clone()
                            .with_flags(ItemFlags::HasLock)
                            .with_value(Bytes::new())
                            .with_expiration(None),
                    );
                }
                Some(
                    save.clone()
                        .with_flags(ItemFlags::HasData)
                        .with_value(payload)
                        .with_expiration(ttl),
                )
            }
            Err(CoreError::NoSuchEntity) => Some(
                save.clone()
                    .with_flags(ItemFlags::HasData)
                    .with_value(Bytes::new())
                    .with_expiration(ttl),
            ),
            Err(_) => None,
        }
    }
}

impl<D> fmt::Debug for CachedDatastore<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDatastore")
            .field("support", &self.support)
            .finish_non_exhaustive()
    }
}

impl<D: RawDatastore> RawDatastore for CachedDatastore<D> {
    fn key_context(&self) -> KeyContext {
        self.inner.key_context()
    }

    fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCb<'_>) -> CoreResult<()> {
        let slots: Vec<Option<String>> = keys
            .iter()
            .map(|key| self.support.random_fingerprint(key))
            .collect();
        let wanted: Vec<String> = slots.iter().flatten().cloned().collect();
        if wanted.is_empty() {
            return self.inner.get_multi(keys, cb);
        }

        let nonce = Bytes::copy_from_slice(Uuid::new_v4().as_bytes());
        let cache = self.support.cache();
        let read_lock_ttl = Some(self.support.config().read_lock_ttl);
        let locks: Vec<CacheItem> = wanted
            .iter()
            .map(|fp| CacheItem::lock(fp.as_str(), nonce.clone(), read_lock_ttl))
            .collect();
        swallow("add", cache.add_multi(&locks));

        let mut found = swallow("get", cache.get_multi(&wanted))
            .unwrap_or_default()
            .into_iter();
        let items: Vec<Option<CacheItem>> = slots
            .iter()
            .map(|slot| slot.as_ref().and_then(|_| found.next().flatten()))
            .collect();

        let FetchPlan {
            to_get,
            idx_map,
            to_save,
            mut decoded,
        } = FetchPlan::new(keys, &slots, items, &nonce);
        trace!(
            requested = keys.len(),
            fetching = to_get.len(),
            "dscache: planned get"
        );

        if !to_get.is_empty() {
            let mut saves = Vec::new();
            let mut pos = 0;
            self.inner.get_multi(&to_get, &mut |result| {
                let (Some(&i), Some(key)) = (idx_map.get(pos), to_get.get(pos)) else {
                    return;
                };
                if let Some(Some(save)) = to_save.get(pos) {
                    saves.extend(self.write_back(key, save, &result));
                }
                pos += 1;
                if let Some(slot) = decoded.get_mut(i) {
                    *slot = Some(result);
                }
            })?;
            if !saves.is_empty() {
                swallow("cas", cache.compare_and_swap_multi(&saves));
            }
        }

        for result in decoded {
            cb(result.unwrap_or_else(|| Err(CoreError::backend("no result for key"))));
        }
        Ok(())
    }

    fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        cb: &mut PutMultiCb<'_>,
    ) -> CoreResult<()> {
        let mut fingerprints = self.support.all_fingerprints(keys);
        self.support.lock(&fingerprints);

        let mut assigned = Vec::new();
        let mut pos = 0;
        self.inner.put_multi(keys, values, &mut |result| {
            if let (Ok(key), Some(requested)) = (&result, keys.get(pos)) {
                if requested.is_incomplete() {
                    assigned.push(key.clone());
                }
            }
            pos += 1;
            cb(result);
        })?;

        fingerprints.extend(self.support.all_fingerprints(&assigned));
        self.support.clear(&fingerprints);
        Ok(())
    }

    fn delete_multi(&self, keys: &[Key], cb: &mut DeleteMultiCb<'_>) -> CoreResult<()> {
        let fingerprints = self.support.all_fingerprints(keys);
        self.support.lock(&fingerprints);
        self.inner.delete_multi(keys, cb)?;
        self.support.clear(&fingerprints);
        Ok(())
    }

    fn run(&self, query: &Query, cb: &mut RunCb<'_>) -> CoreResult<()> {
        self.inner.run(query, cb)
    }

    fn run_in_transaction(&self, f: &mut TxnFn<'_>, opts: &TransactionOptions) -> CoreResult<()> {
        let ledger = Arc::new(Mutex::new(TxnLedger::new()));
        let result = self.inner.run_in_transaction(
            &mut |txn: &dyn RawDatastore| {
                ledger.lock().reset();
                let handle = TxnCachedDatastore::new(txn, Arc::clone(&ledger));
                f(&handle)?;

                let ledger = Arc::clone(&ledger);
                let support = Arc::clone(&self.support);
                txn.on_commit(Box::new(move || ledger.lock().apply(&support)))
            },
            opts,
        );
        ledger.lock().release(&self.support);
        result
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn on_commit(&self, hook: CommitHook) -> CoreResult<()> {
        self.inner.on_commit(hook)
    }

    fn task_queue(&self) -> Option<&dyn RawTaskQueue> {
        self.inner.task_queue()
    }
}
