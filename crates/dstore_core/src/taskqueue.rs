//! Push task queues that share transactions with the datastore.

use crate::error::CoreResult;

/// Queue that always exists.
pub const DEFAULT_QUEUE: &str = "default";

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique name within its queue; empty asks for a generated one.
    pub name: String,
    /// Handler path.
    pub path: String,
    /// HTTP-style method, `POST` unless set.
    pub method: String,
    /// Opaque body.
    pub payload: Vec<u8>,
}

impl Task {
    /// An unnamed `POST` task for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            path: path.into(),
            method: "POST".to_string(),
            payload: Vec::new(),
        }
    }

    /// Sets the task name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// True when a name will be generated on add.
    #[must_use]
    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }
}

/// Task queue operations.
///
/// Like [`RawDatastore`](crate::RawDatastore), per-task results go to the
/// callback and the outer `Err` is for the call as a whole.
pub trait RawTaskQueue: Send + Sync {
    /// Enqueues `tasks` on `queue`; `cb` receives each task as stored,
    /// with its final name.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownQueue`](crate::CoreError::UnknownQueue) and other
    /// whole-call failures.
    fn add_multi(
        &self,
        queue: &str,
        tasks: &[Task],
        cb: &mut dyn FnMut(CoreResult<Task>),
    ) -> CoreResult<()>;

    /// Removes the named tasks from `queue`.
    ///
    /// # Errors
    ///
    /// Whole-call failures.
    fn delete_multi(
        &self,
        queue: &str,
        names: &[String],
        cb: &mut dyn FnMut(CoreResult<()>),
    ) -> CoreResult<()>;

    /// Enqueues a single task.
    ///
    /// # Errors
    ///
    /// Whole-call failures and the task's own error.
    fn add(&self, queue: &str, task: Task) -> CoreResult<Task> {
        let mut out = None;
        self.add_multi(queue, std::slice::from_ref(&task), &mut |r| out = Some(r))?;
        out.unwrap_or_else(|| Err(crate::CoreError::backend("add produced no result")))
    }
}
