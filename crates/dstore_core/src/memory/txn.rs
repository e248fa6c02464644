//! Handles bound to one transaction attempt.

use parking_lot::Mutex;

use crate::backend::{CommitHook, DeleteMultiCb, GetMultiCb, PutMultiCb, RawDatastore, RunCb, TxnFn};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyContext};
use crate::property::PropertyMap;
use crate::query::Query;
use crate::taskqueue::{RawTaskQueue, Task};
use crate::transaction::{ContextSnapshot, TransactionOptions};

use super::datastore::{DatastoreData, DatastoreSnapshot};
use super::taskqueue::{TaskQueueData, TaskQueueSnapshot};

fn missing_part(name: &str) -> CoreError {
    CoreError::backend(format!("transaction has no {name} snapshot"))
}

/// Datastore handle passed to transaction bodies.
///
/// Reads come from the snapshot taken when the attempt began; writes are
/// buffered and only become visible if the attempt commits.
pub(crate) struct TxnDatastore<'a> {
    snap: &'a Mutex<ContextSnapshot>,
    data: &'a DatastoreData,
    ctx: KeyContext,
    tasks: TxnTaskQueue<'a>,
}

impl<'a> TxnDatastore<'a> {
    pub(crate) fn new(
        snap: &'a Mutex<ContextSnapshot>,
        data: &'a DatastoreData,
        queues: &'a TaskQueueData,
        ctx: KeyContext,
    ) -> Self {
        Self {
            snap,
            data,
            ctx,
            tasks: TxnTaskQueue { snap, queues },
        }
    }

    fn check_key(&self, key: &Key, allow_incomplete: bool) -> CoreResult<()> {
        let ctx = self.ctx.with_namespace(key.namespace());
        if allow_incomplete {
            key.partial_valid(&ctx)
        } else {
            key.valid(false, &ctx)
        }
    }

    /// Runs `f` on the datastore part of the running attempt.
    fn with_snapshot<T>(
        &self,
        f: impl FnOnce(&mut DatastoreSnapshot) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut guard = self.snap.lock();
        guard.ensure_running()?;
        let snap = guard
            .part_mut::<DatastoreSnapshot>()
            .ok_or_else(|| missing_part("datastore"))?;
        f(snap)
    }

    fn check_writable(snap: &DatastoreSnapshot) -> CoreResult<()> {
        if snap.is_read_only() {
            return Err(CoreError::invalid_operation(
                "cannot write in a read-only transaction",
            ));
        }
        Ok(())
    }
}

impl RawDatastore for TxnDatastore<'_> {
    fn key_context(&self) -> KeyContext {
        self.ctx.clone()
    }

    fn get_multi(&self, keys: &[Key], cb: &mut GetMultiCb<'_>) -> CoreResult<()> {
        let results: Vec<CoreResult<PropertyMap>> = self.with_snapshot(|snap| {
            Ok(keys
                .iter()
                .map(|key| {
                    self.check_key(key, false)?;
                    snap.touch(key)?;
                    snap.base().get(key).cloned().ok_or(CoreError::NoSuchEntity)
                })
                .collect())
        })?;
        results.into_iter().for_each(|r| cb(r));
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
        let results: Vec<CoreResult<Key>> = self.with_snapshot(|snap| {
            Self::check_writable(snap)?;
            Ok(keys
                .iter()
                .zip(values)
                .map(|(key, pm)| {
                    self.check_key(key, true)?;
                    let key = self.data.complete(key);
                    snap.touch(&key)?;
                    snap.write(key.clone(), Some(pm.clone()));
                    Ok(key)
                })
                .collect())
        })?;
        results.into_iter().for_each(|r| cb(r));
        Ok(())
    }

    fn delete_multi(&self, keys: &[Key], cb: &mut DeleteMultiCb<'_>) -> CoreResult<()> {
        let results: Vec<CoreResult<()>> = self.with_snapshot(|snap| {
            Self::check_writable(snap)?;
            Ok(keys
                .iter()
                .map(|key| {
                    self.check_key(key, false)?;
                    snap.touch(key)?;
                    snap.write(key.clone(), None);
                    Ok(())
                })
                .collect())
        })?;
        results.into_iter().for_each(|r| cb(r));
        Ok(())
    }

    fn run(&self, query: &Query, cb: &mut RunCb<'_>) -> CoreResult<()> {
        let Some(ancestor) = query.ancestor_key() else {
            return Err(CoreError::invalid_query(
                "queries inside transactions must have an ancestor",
            ));
        };
        let namespace = query
            .namespace_override()
            .unwrap_or(self.ctx.namespace.as_str());
        let rows: Vec<(Key, PropertyMap)> = self.with_snapshot(|snap| {
            snap.touch(ancestor)?;
            let rows = snap.base().run_query(query, namespace)?;
            Ok(rows
                .map(|(key, pm)| {
                    let pm = if query.is_keys_only() {
                        PropertyMap::new()
                    } else {
                        pm.clone()
                    };
                    (key.clone(), pm)
                })
                .collect())
        })?;
        for (key, pm) in rows {
            if !cb(key, pm) {
                break;
            }
        }
        Ok(())
    }

    fn run_in_transaction(&self, _f: &mut TxnFn<'_>, _opts: &TransactionOptions) -> CoreResult<()> {
        Err(CoreError::NestedTransaction)
    }

    fn in_transaction(&self) -> bool {
        true
    }

    fn on_commit(&self, hook: CommitHook) -> CoreResult<()> {
        self.snap.lock().on_commit(hook)
    }

    fn task_queue(&self) -> Option<&dyn RawTaskQueue> {
        Some(&self.tasks)
    }
}

/// Task queue view of a transaction attempt: adds are buffered.
pub(crate) struct TxnTaskQueue<'a> {
    snap: &'a Mutex<ContextSnapshot>,
    queues: &'a TaskQueueData,
}

impl RawTaskQueue for TxnTaskQueue<'_> {
    fn add_multi(
        &self,
        queue: &str,
        tasks: &[Task],
        cb: &mut dyn FnMut(CoreResult<Task>),
    ) -> CoreResult<()> {
        if !self.queues.has_queue(queue) {
            return Err(CoreError::UnknownQueue {
                name: queue.to_string(),
            });
        }
        let mut guard = self.snap.lock();
        guard.ensure_running()?;
        let snap = guard
            .part_mut::<TaskQueueSnapshot>()
            .ok_or_else(|| missing_part("task queue"))?;
        let results: Vec<CoreResult<Task>> = tasks
            .iter()
            .map(|task| snap.add(self.queues, queue, task))
            .collect();
        drop(guard);
        results.into_iter().for_each(|r| cb(r));
        Ok(())
    }

    fn delete_multi(
        &self,
        _queue: &str,
        _names: &[String],
        _cb: &mut dyn FnMut(CoreResult<()>),
    ) -> CoreResult<()> {
        Err(CoreError::invalid_operation(
            "tasks cannot be deleted in a transaction",
        ))
    }
}
