//! In-memory task queues as a transactional component.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{CoreError, CoreResult};
use crate::taskqueue::{RawTaskQueue, Task, DEFAULT_QUEUE};
use crate::transaction::{ComponentSnapshot, LockedComponent, TransactionOptions, TxnComponent};

#[derive(Debug, Default)]
struct Queues {
    queues: BTreeMap<String, BTreeMap<String, Task>>,
    /// Names that were deleted and may not be reused.
    tombstones: BTreeSet<(String, String)>,
}

impl Queues {
    fn queue_mut(&mut self, name: &str) -> CoreResult<&mut BTreeMap<String, Task>> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownQueue {
                name: name.to_string(),
            })
    }

    fn name_taken(&self, queue: &str, name: &str) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|tasks| tasks.contains_key(name))
            || self
                .tombstones
                .contains(&(queue.to_string(), name.to_string()))
    }
}

/// Named push queues. The `default` queue always exists.
#[derive(Debug)]
pub(crate) struct TaskQueueData {
    queues: Mutex<Queues>,
    next_name: AtomicU64,
    max_txn_tasks: usize,
}

impl TaskQueueData {
    pub(crate) fn new(max_txn_tasks: usize) -> Self {
        let mut queues = Queues::default();
        queues
            .queues
            .insert(DEFAULT_QUEUE.to_string(), BTreeMap::new());
        Self {
            queues: Mutex::new(queues),
            next_name: AtomicU64::new(1),
            max_txn_tasks,
        }
    }

    pub(crate) fn create_queue(&self, name: &str) {
        self.queues
            .lock()
            .queues
            .entry(name.to_string())
            .or_default();
    }

    pub(crate) fn has_queue(&self, name: &str) -> bool {
        self.queues.lock().queues.contains_key(name)
    }

    /// Tasks currently in `queue`, by name.
    pub(crate) fn tasks(&self, queue: &str) -> CoreResult<Vec<Task>> {
        let mut queues = self.queues.lock();
        Ok(queues.queue_mut(queue)?.values().cloned().collect())
    }

    pub(crate) fn purge(&self, queue: &str) -> CoreResult<()> {
        self.queues.lock().queue_mut(queue)?.clear();
        Ok(())
    }

    fn generated_name(&self) -> String {
        format!("task-{:08}", self.next_name.fetch_add(1, Ordering::Relaxed))
    }

    /// Gives an unnamed task a fresh name.
    fn named(&self, task: &Task) -> Task {
        let mut task = task.clone();
        if task.is_unnamed() {
            task.name = self.generated_name();
        }
        task
    }
}

impl RawTaskQueue for TaskQueueData {
    fn add_multi(
        &self,
        queue: &str,
        tasks: &[Task],
        cb: &mut dyn FnMut(CoreResult<Task>),
    ) -> CoreResult<()> {
        let mut results = Vec::with_capacity(tasks.len());
        {
            let mut queues = self.queues.lock();
            queues.queue_mut(queue)?;
            for task in tasks {
                let task = self.named(task);
                if queues.name_taken(queue, &task.name) {
                    results.push(Err(CoreError::TaskAlreadyExists { name: task.name }));
                    continue;
                }
                queues
                    .queue_mut(queue)?
                    .insert(task.name.clone(), task.clone());
                results.push(Ok(task));
            }
        }
        results.into_iter().for_each(|r| cb(r));
        Ok(())
    }

    fn delete_multi(
        &self,
        queue: &str,
        names: &[String],
        cb: &mut dyn FnMut(CoreResult<()>),
    ) -> CoreResult<()> {
        let mut results = Vec::with_capacity(names.len());
        {
            let mut queues = self.queues.lock();
            queues.queue_mut(queue)?;
            for name in names {
                let removed = queues.queue_mut(queue)?.remove(name).is_some();
                if removed {
                    queues.tombstones.insert((queue.to_string(), name.clone()));
                    results.push(Ok(()));
                } else {
                    results.push(Err(CoreError::invalid_operation(format!(
                        "no task {name:?} in queue {queue:?}"
                    ))));
                }
            }
        }
        results.into_iter().for_each(|r| cb(r));
        Ok(())
    }
}

impl TxnComponent for TaskQueueData {
    fn name(&self) -> &'static str {
        "taskqueue"
    }

    fn begin(&self, _opts: &TransactionOptions) -> Box<dyn ComponentSnapshot> {
        Box::new(TaskQueueSnapshot {
            adds: Vec::new(),
            limit: self.max_txn_tasks,
        })
    }

    fn lock(&self) -> Box<dyn LockedComponent + '_> {
        Box::new(LockedTaskQueue {
            queues: self.queues.lock(),
        })
    }
}

/// Tasks a transaction attempt has enqueued.
pub(crate) struct TaskQueueSnapshot {
    adds: Vec<(String, Task)>,
    limit: usize,
}

impl TaskQueueSnapshot {
    /// Buffers `task` for commit.
    ///
    /// Named tasks are rejected: a retried attempt would collide with itself.
    pub(crate) fn add(&mut self, data: &TaskQueueData, queue: &str, task: &Task) -> CoreResult<Task> {
        if !task.is_unnamed() {
            return Err(CoreError::invalid_operation(
                "named tasks cannot be added in a transaction",
            ));
        }
        if self.adds.len() >= self.limit {
            return Err(CoreError::TooManyTasks { limit: self.limit });
        }
        let task = data.named(task);
        self.adds.push((queue.to_string(), task.clone()));
        Ok(task)
    }
}

impl ComponentSnapshot for TaskQueueSnapshot {
    fn end_transaction(&mut self) {
        self.adds.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct LockedTaskQueue<'a> {
    queues: MutexGuard<'a, Queues>,
}

impl LockedComponent for LockedTaskQueue<'_> {
    fn can_apply(&self, _snapshot: &dyn ComponentSnapshot) -> bool {
        true
    }

    fn apply(&mut self, snapshot: &mut dyn ComponentSnapshot) {
        let Some(snap) = snapshot.as_any_mut().downcast_mut::<TaskQueueSnapshot>() else {
            return;
        };
        for (queue, task) in std::mem::take(&mut snap.adds) {
            self.queues
                .queues
                .entry(queue)
                .or_default()
                .insert(task.name.clone(), task);
        }
    }
}
