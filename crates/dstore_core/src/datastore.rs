//! Convenience layer over a [`RawDatastore`].
//!
//! Works with property maps that carry their own identity in meta entries
//! and folds per-item failures of batch calls into [`CoreError::Multi`].

use std::fmt;

use crate::backend::RawDatastore;
use crate::error::{CoreError, CoreResult, MultiError};
use crate::key::{Key, KeyContext};
use crate::property::PropertyMap;
use crate::query::Query;
use crate::taskqueue::RawTaskQueue;
use crate::transaction::TransactionOptions;

/// Meta entries that describe identity rather than data.
const IDENTITY_META: [&str; 4] = ["$key", "$kind", "$id", "$parent"];

/// Typed access to a raw datastore or to a transaction handle.
#[derive(Clone, Copy)]
pub struct Datastore<'a> {
    raw: &'a dyn RawDatastore,
}

impl<'a> Datastore<'a> {
    /// Wraps `raw`.
    #[must_use]
    pub fn new(raw: &'a dyn RawDatastore) -> Self {
        Self { raw }
    }

    /// The wrapped datastore.
    #[must_use]
    pub fn raw(&self) -> &'a dyn RawDatastore {
        self.raw
    }

    /// See [`RawDatastore::key_context`].
    #[must_use]
    pub fn key_context(&self) -> KeyContext {
        self.raw.key_context()
    }

    /// True inside a transaction body.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.raw.in_transaction()
    }

    /// Loads one entity. The result carries `$key`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoSuchEntity`] and any other per-item error, unwrapped.
    pub fn get(&self, key: &Key) -> CoreResult<PropertyMap> {
        let mut out = None;
        self.raw
            .get_multi(std::slice::from_ref(key), &mut |r| out = Some(r))?;
        let mut pm = out.unwrap_or_else(|| Err(CoreError::backend("get produced no result")))?;
        pm.set_meta("key", key.clone());
        Ok(pm)
    }

    /// Loads several entities.
    ///
    /// # Errors
    ///
    /// [`CoreError::Multi`] when any item failed.
    pub fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<PropertyMap>> {
        let results = self.raw.get_multi_collect(keys)?;
        let mut maps = collect_multi(results)?;
        for (pm, key) in maps.iter_mut().zip(keys) {
            pm.set_meta("key", key.clone());
        }
        Ok(maps)
    }

    /// Stores `pm` under the key its meta entries describe and records the
    /// final key back into `$key`.
    ///
    /// # Errors
    ///
    /// Key resolution errors and the put's own error.
    pub fn put(&self, pm: &mut PropertyMap) -> CoreResult<Key> {
        let keys = self.put_multi(std::slice::from_mut(pm));
        match keys {
            Ok(mut keys) => keys
                .pop()
                .ok_or_else(|| CoreError::backend("put produced no result")),
            Err(CoreError::Multi(multi)) => Err(multi
                .0
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_else(|| CoreError::backend("put failed without an error"))),
            Err(err) => Err(err),
        }
    }

    /// Stores every map, see [`Datastore::put`].
    ///
    /// # Errors
    ///
    /// [`CoreError::Multi`] when any item failed, including key resolution.
    pub fn put_multi(&self, pms: &mut [PropertyMap]) -> CoreResult<Vec<Key>> {
        let ctx = self.raw.key_context();
        let mut resolved = Vec::with_capacity(pms.len());
        let mut errors = Vec::with_capacity(pms.len());
        for pm in pms.iter() {
            match pm.key(&ctx) {
                Ok(key) => {
                    resolved.push(key);
                    errors.push(None);
                }
                Err(err) => errors.push(Some(err)),
            }
        }
        if let Some(multi) = MultiError::from_errors(errors) {
            return Err(CoreError::Multi(multi));
        }

        let stripped: Vec<PropertyMap> = pms.iter().map(strip_identity).collect();
        let results = self.raw.put_multi_collect(&resolved, &stripped)?;
        let keys = collect_multi(results)?;
        for (pm, key) in pms.iter_mut().zip(&keys) {
            pm.set_meta("key", key.clone());
        }
        Ok(keys)
    }

    /// Deletes one entity.
    ///
    /// # Errors
    ///
    /// The delete's own error.
    pub fn delete(&self, key: &Key) -> CoreResult<()> {
        let mut out = Ok(());
        self.raw
            .delete_multi(std::slice::from_ref(key), &mut |r| out = r)?;
        out
    }

    /// Deletes several entities.
    ///
    /// # Errors
    ///
    /// [`CoreError::Multi`] when any item failed.
    pub fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        let results = self.raw.delete_multi_collect(keys)?;
        collect_multi(results).map(drop)
    }

    /// Every result of `query`, each carrying `$key`.
    ///
    /// # Errors
    ///
    /// Query errors.
    pub fn get_all(&self, query: &Query) -> CoreResult<Vec<PropertyMap>> {
        let mut out = Vec::new();
        self.raw.run(query, &mut |key, mut pm| {
            pm.set_meta("key", key);
            out.push(pm);
            true
        })?;
        Ok(out)
    }

    /// Number of results of `query`.
    ///
    /// # Errors
    ///
    /// Query errors.
    pub fn count(&self, query: &Query) -> CoreResult<usize> {
        let mut n = 0;
        self.raw.run(query, &mut |_, _| {
            n += 1;
            true
        })?;
        Ok(n)
    }

    /// Runs `f` in a transaction.
    ///
    /// # Errors
    ///
    /// See [`RawDatastore::run_in_transaction`].
    pub fn run_in_transaction<F>(&self, mut f: F, opts: &TransactionOptions) -> CoreResult<()>
    where
        F: FnMut(&Datastore<'_>) -> CoreResult<()>,
    {
        self.raw
            .run_in_transaction(&mut |raw| f(&Datastore::new(raw)), opts)
    }

    /// Runs `hook` if the current transaction commits.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction.
    pub fn on_commit(&self, hook: impl FnOnce() + Send + 'static) -> CoreResult<()> {
        self.raw.on_commit(Box::new(hook))
    }

    /// Task queues bound to this datastore or transaction.
    #[must_use]
    pub fn task_queue(&self) -> Option<&'a dyn RawTaskQueue> {
        self.raw.task_queue()
    }
}

impl fmt::Debug for Datastore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("in_transaction", &self.raw.in_transaction())
            .finish_non_exhaustive()
    }
}

fn strip_identity(pm: &PropertyMap) -> PropertyMap {
    let mut pm = pm.clone();
    for name in IDENTITY_META {
        pm.remove(name);
    }
    pm
}

fn collect_multi<T>(results: Vec<CoreResult<T>>) -> CoreResult<Vec<T>> {
    if results.iter().all(Result::is_ok) {
        return results.into_iter().collect();
    }
    let errors = results.into_iter().map(Result::err).collect();
    Err(CoreError::Multi(MultiError(errors)))
}
