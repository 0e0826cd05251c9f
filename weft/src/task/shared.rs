use crate::task::handle::{assert_not_on_worker, wait_for_task};
use crate::task::{CancellationReason, Id, Output, Task, TaskError, TaskState};
use crate::time::Deadline;
use std::fmt;
use std::sync::Arc;

/// Clonable handle to a spawned task, obtained with
/// [`TaskHandle::share`](crate::task::TaskHandle::share).
///
/// Any number of copies may wait for the task and read its result, each gets
/// its own clone of the output. The task is cancelled with
/// [`CancellationReason::Abandoned`] when the last copy is dropped before it
/// finished.
///
/// ```no_run
/// # async fn doc() -> Result<(), weft::task::TaskError> {
/// let config = weft::spawn(async { String::from("loaded") }).share();
///
/// let reader = weft::spawn({
///     let config = config.clone();
///     async move { config.get().await }
/// });
///
/// assert_eq!(config.get().await?, "loaded");
/// assert_eq!(reader.get().await??, "loaded");
/// # Ok(())
/// # }
/// ```
pub struct SharedTaskHandle<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    task: Arc<Task>,
    output: Output<T>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            self.task.request_cancel(CancellationReason::Abandoned);
        }
    }
}

impl<T> SharedTaskHandle<T> {
    pub(crate) fn new(task: Arc<Task>, output: Output<T>) -> Self {
        Self {
            inner: Arc::new(Inner { task, output }),
        }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.inner.task
    }

    pub fn id(&self) -> Id {
        self.inner.task.id()
    }

    pub fn state(&self) -> TaskState {
        self.inner.task.state()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.task.is_finished()
    }

    /// Requests cancellation with [`CancellationReason::UserRequest`] on
    /// behalf of every copy.
    pub fn cancel(&self) {
        self.inner.task.request_cancel(CancellationReason::UserRequest);
    }

    pub async fn wait(&self) -> Result<(), TaskError> {
        wait_for_task(&self.inner.task, Deadline::unreachable()).await
    }

    pub async fn wait_until(&self, deadline: Deadline) -> Result<(), TaskError> {
        wait_for_task(&self.inner.task, deadline).await
    }

    /// # Panics
    ///
    /// Panics when called from a worker thread.
    #[track_caller]
    pub fn blocking_wait(&self) {
        assert_not_on_worker();
        self.inner.task.block_until_finished(Deadline::unreachable());
    }
}

impl<T: Clone> SharedTaskHandle<T> {
    /// Waits for the task and returns a clone of its result.
    pub async fn get(&self) -> Result<T, TaskError> {
        self.get_until(Deadline::unreachable()).await
    }

    /// Unlike [`TaskHandle::get_until`](crate::task::TaskHandle::get_until)
    /// a timeout leaves the task running, other copies may still wait for
    /// it.
    pub async fn get_until(&self, deadline: Deadline) -> Result<T, TaskError> {
        self.wait_until(deadline).await?;
        self.output()
    }

    #[track_caller]
    pub fn blocking_get(&self) -> Result<T, TaskError> {
        self.blocking_wait();
        self.output()
    }

    fn output(&self) -> Result<T, TaskError> {
        let task = &self.inner.task;
        let cancelled = || TaskError::from_cancellation(task.cancel.reason());
        if task.state() == TaskState::Cancelled {
            return Err(cancelled());
        }

        self.inner
            .output
            .lock()
            .clone()
            .unwrap_or_else(|| Err(cancelled()))
    }
}

impl<T> Clone for SharedTaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SharedTaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("copies", &Arc::strong_count(&self.inner))
            .finish()
    }
}
