//! The raw datastore contract every layer implements.
//!
//! Batch calls report one result per requested item, in request order,
//! through a callback. The outer `Err` is reserved for failures of the call
//! as a whole, so a per-item `NoSuchEntity` and a broken request can never
//! be confused.

use crate::error::CoreResult;
use crate::key::{Key, KeyContext};
use crate::property::PropertyMap;
use crate::query::Query;
use crate::taskqueue::RawTaskQueue;
use crate::transaction::TransactionOptions;

/// Receives one get result per requested key.
pub type GetMultiCb<'a> = dyn FnMut(CoreResult<PropertyMap>) + 'a;

/// Receives the final key (or error) for each put.
pub type PutMultiCb<'a> = dyn FnMut(CoreResult<Key>) + 'a;

/// Receives one result per deleted key.
pub type DeleteMultiCb<'a> = dyn FnMut(CoreResult<()>) + 'a;

/// Receives query results; return `false` to stop early.
pub type RunCb<'a> = dyn FnMut(Key, PropertyMap) -> bool + 'a;

/// Body of a transaction. It receives a handle bound to the attempt.
pub type TxnFn<'a> = dyn FnMut(&dyn RawDatastore) -> CoreResult<()> + 'a;

/// Work run once the commit decision has been made, before the commit
/// becomes visible to readers.
pub type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// Datastore operations shared by the in-memory backend, transaction
/// handles and decorating layers such as the cache.
pub trait RawDatastore: Send + Sync {
    /// Application id and default namespace of this datastore.
    fn key_context(&self) -> KeyContext;

    /// Loads `keys`, calling `cb` once per key in order.
    ///
    /// # Errors
    ///
    /// Only whole-call failures; missing entities are reported per item as
    /// [`CoreError::NoSuchEntity`](crate::CoreError::NoSuchEntity).
    fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCb<'_>) -> CoreResult<()>;

    /// Stores `values` under `keys`, calling `cb` with each final key.
    /// Incomplete keys get an allocated integer id.
    ///
    /// # Errors
    ///
    /// Whole-call failures such as mismatched lengths.
    fn put_multi(&self, keys: &[Key], values: &[PropertyMap], cb: &mut PutMultiCb<'_>)
        -> CoreResult<()>;

    /// Deletes `keys`. Deleting a missing entity succeeds.
    ///
    /// # Errors
    ///
    /// Whole-call failures.
    fn delete_multi(&self, keys: &[Key], cb: &mut DeleteMultiCb<'_>) -> CoreResult<()>;

    /// Runs `query`, feeding results to `cb` until it returns `false`.
    ///
    /// # Errors
    ///
    /// Invalid queries and missing composite indexes.
    fn run(&self, query: &Query, cb: &mut RunCb<'_>) -> CoreResult<()>;

    /// Runs `f` in a transaction, retrying on conflicts.
    ///
    /// # Errors
    ///
    /// The first error `f` returns, or
    /// [`CoreError::ConcurrentTransaction`](crate::CoreError::ConcurrentTransaction)
    /// once every attempt conflicted.
    fn run_in_transaction(&self, f: &mut TxnFn<'_>, opts: &TransactionOptions) -> CoreResult<()>;

    /// True for handles bound to a running transaction.
    fn in_transaction(&self) -> bool;

    /// Registers `hook` to run when the current transaction commits.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction.
    fn on_commit(&self, hook: CommitHook) -> CoreResult<()> {
        drop(hook);
        Err(crate::CoreError::invalid_operation(
            "commit hooks need a transaction",
        ))
    }

    /// Task queues sharing this datastore's transactions, if any.
    fn task_queue(&self) -> Option<&dyn RawTaskQueue> {
        None
    }

    /// [`RawDatastore::get_multi`] collected into a vector.
    ///
    /// # Errors
    ///
    /// Whole-call failures.
    fn get_multi_collect(&self, keys: &[Key]) -> CoreResult<Vec<CoreResult<PropertyMap>>> {
        let mut out = Vec::with_capacity(keys.len());
        self.get_multi(keys, &mut |r| out.push(r))?;
        Ok(out)
    }

    /// [`RawDatastore::put_multi`] collected into a vector.
    ///
    /// # Errors
    ///
    /// Whole-call failures.
    fn put_multi_collect(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
    ) -> CoreResult<Vec<CoreResult<Key>>> {
        let mut out = Vec::with_capacity(keys.len());
        self.put_multi(keys, values, &mut |r| out.push(r))?;
        Ok(out)
    }

    /// [`RawDatastore::delete_multi`] collected into a vector.
    ///
    /// # Errors
    ///
    /// Whole-call failures.
    fn delete_multi_collect(&self, keys: &[Key]) -> CoreResult<Vec<CoreResult<()>>> {
        let mut out = Vec::with_capacity(keys.len());
        self.delete_multi(keys, &mut |r| out.push(r))?;
        Ok(out)
    }

    /// Every result of `query`.
    ///
    /// # Errors
    ///
    /// See [`RawDatastore::run`].
    fn run_collect(&self, query: &Query) -> CoreResult<Vec<(Key, PropertyMap)>> {
        let mut out = Vec::new();
        self.run(query, &mut |k, pm| {
            out.push((k, pm));
            true
        })?;
        Ok(out)
    }
}
