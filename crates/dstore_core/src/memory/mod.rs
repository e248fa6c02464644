//! The in-memory datastore.
//!
//! State lives behind an `Arc`, so clones of a [`MemoryDatastore`] share the
//! same entities, indexes and task queues. Transactions run through the
//! [`Coordinator`] over a context set of two components, task queues first
//! and entities second.

mod datastore;
mod taskqueue;
mod txn;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{DeleteMultiCb, GetMultiCb, PutMultiCb, RawDatastore, RunCb, TxnFn};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::key::{Key, KeyContext};
use crate::property::PropertyMap;
use crate::query::Query;
use crate::taskqueue::{RawTaskQueue, Task};
use crate::transaction::{ContextSet, Coordinator, TransactionOptions, TxnComponent};
use crate::types::TransactionId;

use datastore::DatastoreData;
use taskqueue::TaskQueueData;
use txn::TxnDatastore;

struct Inner {
    config: Config,
    ctx: KeyContext,
    data: Arc<DatastoreData>,
    tasks: Arc<TaskQueueData>,
    set: ContextSet,
    attempts: AtomicUsize,
    forced_conflicts: AtomicUsize,
    enabled: AtomicBool,
    next_txn: AtomicU64,
}

/// A transactional datastore held entirely in memory.
#[derive(Clone)]
pub struct MemoryDatastore {
    inner: Arc<Inner>,
}

impl MemoryDatastore {
    /// An empty datastore with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty datastore.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let data = Arc::new(DatastoreData::new(config.max_xg_entity_groups));
        let tasks = Arc::new(TaskQueueData::new(config.max_transactional_tasks));
        let queue_component: Arc<dyn TxnComponent> = tasks.clone();
        let data_component: Arc<dyn TxnComponent> = data.clone();
        let set = ContextSet::new(vec![queue_component, data_component]);
        Self {
            inner: Arc::new(Inner {
                ctx: KeyContext::new(config.app_id.clone(), config.namespace.clone()),
                data,
                tasks,
                set,
                attempts: AtomicUsize::new(config.transaction_attempts),
                forced_conflicts: AtomicUsize::new(config.forced_conflicts),
                enabled: AtomicBool::new(config.transactions_enabled),
                next_txn: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Configuration the datastore was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registers composite indexes and backfills them.
    ///
    /// # Errors
    ///
    /// Stops at the first invalid definition; earlier ones stay registered.
    pub fn add_indexes(&self, defs: impl IntoIterator<Item = IndexDefinition>) -> CoreResult<()> {
        for def in defs {
            let name = def.to_string();
            if self.inner.data.add_index(def)? {
                debug!(index = %name, "composite index registered");
            }
        }
        Ok(())
    }

    /// Makes the first `count` attempts of every later transaction conflict.
    pub fn set_transaction_retry_count(&self, count: usize) {
        self.inner.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Default attempt budget for transactions that do not set one.
    pub fn set_transaction_attempts(&self, attempts: usize) {
        self.inner.attempts.store(attempts, Ordering::SeqCst);
    }

    /// Enables or disables transactions.
    pub fn set_transactions_enabled(&self, enabled: bool) {
        debug!(enabled, "transactions toggled");
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Number of stored entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.inner.data.head().len()
    }

    /// Creates `name` if it does not exist yet.
    pub fn create_queue(&self, name: &str) {
        self.inner.tasks.create_queue(name);
    }

    /// Tasks waiting in `queue`, ordered by name.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownQueue`] if the queue does not exist.
    pub fn tasks(&self, queue: &str) -> CoreResult<Vec<Task>> {
        self.inner.tasks.tasks(queue)
    }

    /// Drops every task in `queue`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownQueue`] if the queue does not exist.
    pub fn purge_queue(&self, queue: &str) -> CoreResult<()> {
        self.inner.tasks.purge(queue)
    }

    fn check_key(&self, key: &Key, allow_incomplete: bool) -> CoreResult<()> {
        let ctx = self.inner.ctx.with_namespace(key.namespace());
        if allow_incomplete {
            key.partial_valid(&ctx)
        } else {
            key.valid(false, &ctx)
        }
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatastore")
            .field("ctx", &self.inner.ctx)
            .field("data", &self.inner.data)
            .field("set", &self.inner.set)
            .finish_non_exhaustive()
    }
}

impl RawDatastore for MemoryDatastore {
    fn key_context(&self) -> KeyContext {
        self.inner.ctx.clone()
    }

    fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCb<'_>) -> CoreResult<()> {
        let head = self.inner.data.head();
        for key in keys {
            let result = self.check_key(key, false).and_then(|()| {
                head.get(key).cloned().ok_or(CoreError::NoSuchEntity)
            });
            cb(result);
        }
        Ok(())
    }

    fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        cb: &mut PutMultiCb<'_>,
    ) -> CoreResult<()> {
        if keys.len() != values.len() {
            return Err(CoreError::invalid_operation(format!(
                "put_multi got {} keys and {} values",
                keys.len(),
                values.len()
            )));
        }
        for (key, pm) in keys.iter().zip(values) {
            let result = self
                .check_key(key, true)
                .map(|()| self.inner.data.put(key, pm.clone()));
            cb(result);
        }
        Ok(())
    }

    fn delete_multi(&self, keys: &[Key], cb: &mut DeleteMultiCb<'_>) -> CoreResult<()> {
        for key in keys {
            let result = self
                .check_key(key, false)
                .map(|()| self.inner.data.delete(key));
            cb(result);
        }
        Ok(())
    }

    fn run(&self, query: &Query, cb: &mut RunCb<'_>) -> CoreResult<()> {
        let namespace = query
            .namespace_override()
            .unwrap_or(self.inner.ctx.namespace.as_str());
        let head = self.inner.data.head();
        for (key, pm) in head.run_query(query, namespace)? {
            let pm = if query.is_keys_only() {
                PropertyMap::new()
            } else {
                pm.clone()
            };
            if !cb(key.clone(), pm) {
                break;
            }
        }
        Ok(())
    }

    fn run_in_transaction(&self, f: &mut TxnFn<'_>, opts: &TransactionOptions) -> CoreResult<()> {
        let inner = &*self.inner;
        if !inner.enabled.load(Ordering::SeqCst) {
            return Err(CoreError::TransactionsDisabled);
        }
        let attempts = match opts.attempts {
            0 => inner.attempts.load(Ordering::SeqCst),
            n => n,
        };
        let id = TransactionId::new(inner.next_txn.fetch_add(1, Ordering::Relaxed));
        Coordinator::new(&inner.set, attempts)
            .forced_conflicts(inner.forced_conflicts.load(Ordering::SeqCst))
            .run(id, opts, |snap| {
                let handle = TxnDatastore::new(snap, &inner.data, &inner.tasks, inner.ctx.clone());
                f(&handle)
            })
    }

    fn in_transaction(&self) -> bool {
        false
    }

    fn task_queue(&self) -> Option<&dyn RawTaskQueue> {
        Some(&*self.inner.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyValue;

    fn value(v: i64) -> PropertyMap {
        let mut pm = PropertyMap::new();
        pm.set("Value", v);
        pm
    }

    #[test]
    fn put_get_delete() {
        let ds = MemoryDatastore::new();
        let key = ds.key_context().new_key("Obj", 1, None);
        let put = ds.put_multi_collect(&[key.clone()], &[value(3)]).unwrap();
        assert_eq!(put, vec![Ok(key.clone())]);

        let got = ds.get_multi_collect(&[key.clone()]).unwrap();
        assert_eq!(got[0].as_ref().unwrap().first("Value"), Some(&PropertyValue::Int(3)));

        ds.delete_multi_collect(&[key.clone()]).unwrap();
        assert_eq!(ds.get_multi_collect(&[key]).unwrap(), vec![Err(CoreError::NoSuchEntity)]);
    }

    #[test]
    fn length_mismatch_fails_whole_call() {
        let ds = MemoryDatastore::new();
        let key = ds.key_context().new_key("Obj", 1, None);
        let err = ds.put_multi_collect(&[key], &[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn foreign_app_is_invalid_per_item() {
        let ds = MemoryDatastore::new();
        let good = ds.key_context().new_key("Obj", 1, None);
        let bad = KeyContext::new("other~app", "").new_key("Obj", 1, None);
        let got = ds.get_multi_collect(&[good, bad]).unwrap();
        assert_eq!(got[0], Err(CoreError::NoSuchEntity));
        assert!(matches!(got[1], Err(CoreError::InvalidKey { .. })));
    }

    #[test]
    fn clones_share_state() {
        let ds = MemoryDatastore::new();
        let other = ds.clone();
        let key = ds.key_context().new_key("Obj", 1, None);
        ds.put_multi_collect(&[key], &[value(1)]).unwrap();
        assert_eq!(other.entity_count(), 1);
    }

    #[test]
    fn transaction_commits() {
        let ds = MemoryDatastore::new();
        let key = ds.key_context().new_key("Obj", 1, None);
        ds.run_in_transaction(
            &mut |txn| {
                assert!(txn.in_transaction());
                txn.put_multi_collect(&[key.clone()], &[value(9)])?;
                Ok(())
            },
            &TransactionOptions::new(),
        )
        .unwrap();
        assert_eq!(ds.entity_count(), 1);
    }

    #[test]
    fn disabled_transactions() {
        let ds = MemoryDatastore::new();
        ds.set_transactions_enabled(false);
        let err = ds
            .run_in_transaction(&mut |_| Ok(()), &TransactionOptions::new())
            .unwrap_err();
        assert_eq!(err, CoreError::TransactionsDisabled);
    }
}
