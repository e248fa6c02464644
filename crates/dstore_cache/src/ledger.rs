//! Cache bookkeeping for one transaction.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dstore_core::{
    CommitHook, CoreError, CoreResult, DeleteMultiCb, GetMultiCb, Key, KeyContext, PropertyMap,
    PutMultiCb, Query, RawDatastore, RawTaskQueue, RunCb, TransactionOptions, TxnFn,
};
use parking_lot::Mutex;

use crate::support::CacheContext;

/// Keys written by the running transaction attempt, and the slots locked
/// for them once it committed.
#[derive(Debug, Default)]
pub struct TxnLedger {
    keys: BTreeSet<Key>,
    applied: Vec<String>,
}

impl TxnLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything; called at the start of every attempt.
    pub fn reset(&mut self) {
        self.keys.clear();
        self.applied.clear();
    }

    /// Records written keys. Incomplete keys are skipped; the key assigned on
    /// put is recorded instead.
    pub fn add<'a>(&mut self, keys: impl IntoIterator<Item = &'a Key>) {
        self.keys
            .extend(keys.into_iter().filter(|k| !k.is_incomplete()).cloned());
    }

    /// Recorded keys, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Slots locked by [`TxnLedger::apply`] and not yet released.
    #[must_use]
    pub fn locked(&self) -> &[String] {
        &self.applied
    }

    /// Locks every slot of every recorded key. Runs once the attempt is
    /// known to commit.
    pub fn apply(&mut self, support: &CacheContext) {
        let fingerprints = support.all_fingerprints(&self.keys);
        support.lock(&fingerprints);
        self.applied = fingerprints;
    }

    /// Clears the slots locked by [`TxnLedger::apply`]. A no-op when nothing
    /// was applied.
    pub fn release(&mut self, support: &CacheContext) {
        let applied = std::mem::take(&mut self.applied);
        support.clear(&applied);
    }
}

/// Transaction handle that records writes in a [`TxnLedger`].
///
/// Reads go straight to the transaction; the cache is never consulted inside
/// a transaction.
pub struct TxnCachedDatastore<'a> {
    txn: &'a dyn RawDatastore,
    ledger: Arc<Mutex<TxnLedger>>,
}

impl<'a> TxnCachedDatastore<'a> {
    /// Wraps the transaction handle `txn`.
    #[must_use]
    pub fn new(txn: &'a dyn RawDatastore, ledger: Arc<Mutex<TxnLedger>>) -> Self {
        Self { txn, ledger }
    }
}

impl fmt::Debug for TxnCachedDatastore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnCachedDatastore")
            .field("ledger", &*self.ledger.lock())
            .finish_non_exhaustive()
    }
}

impl RawDatastore for TxnCachedDatastore<'_> {
    fn key_context(&self) -> KeyContext {
        self.txn.key_context()
    }

    fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCb<'_>) -> CoreResult<()> {
        self.txn.get_multi(keys, cb)
    }

    fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        cb: &mut PutMultiCb<'_>,
    ) -> CoreResult<()> {
        self.ledger.lock().add(keys);
        self.txn.put_multi(keys, values, &mut |result| {
            if let Ok(key) = &result {
                self.ledger.lock().add([key]);
            }
            cb(result);
        })
    }

    fn delete_multi(&self, keys: &[Key], cb: &mut DeleteMultiCb<'_>) -> CoreResult<()> {
        self.ledger.lock().add(keys);
        self.txn.delete_multi(keys, cb)
    }

    fn run(&self, query: &Query, cb: &mut RunCb<'_>) -> CoreResult<()> {
        self.txn.run(query, cb)
    }

    fn run_in_transaction(&self, _f: &mut TxnFn<'_>, _opts: &TransactionOptions) -> CoreResult<()> {
        Err(CoreError::NestedTransaction)
    }

    fn in_transaction(&self) -> bool {
        true
    }

    fn on_commit(&self, hook: CommitHook) -> CoreResult<()> {
        self.txn.on_commit(hook)
    }

    fn task_queue(&self) -> Option<&dyn RawTaskQueue> {
        self.txn.task_queue()
    }
}
