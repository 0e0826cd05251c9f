use crate::context;
use crate::task::error::panic_payload_as_str;
use crate::task::{
    CancellationReason, Id, SharedTaskHandle, Task, TaskCancellationToken, TaskError, TaskState,
    WakeupSource, current,
};
use crate::time::Deadline;
use crate::wait::{self, EarlyWakeup, WaitStrategy, Waiter};
use parking_lot::Mutex;
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) type Output<T> = Arc<Mutex<Option<Result<T, TaskError>>>>;

/// Runs the user future and stores its outcome for the [`TaskHandle`].
/// Panics are caught and turned into [`TaskError::Panicked`].
#[pin_project]
pub(crate) struct TaskFuture<F: Future> {
    #[pin]
    future: F,
    output: Output<F::Output>,
}

impl<F: Future> TaskFuture<F> {
    pub(crate) fn new(future: F, output: Output<F::Output>) -> Self {
        Self { future, output }
    }
}

impl<F: Future> Future for TaskFuture<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let future = this.future;

        let res = match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(val)) => Ok(val),
            Err(payload) => {
                let msg = panic_payload_as_str(payload.as_ref()).to_owned();
                tracing::error!(task_id = ?current::try_id(), panic = %msg, "task panicked");
                Err(TaskError::Panicked(msg))
            }
        };

        *this.output.lock() = Some(res);
        Poll::Ready(())
    }
}

/// Owned handle to a spawned task, used to wait for it, retrieve its result
/// or cancel it.
///
/// Dropping a handle without calling [`detach`](TaskHandle::detach) requests
/// cancellation of the task with [`CancellationReason::Abandoned`].
///
/// ```no_run
/// # async fn doc() -> Result<(), weft::task::TaskError> {
/// let handle = weft::spawn(async { 5 + 3 });
/// assert_eq!(handle.get().await?, 8);
/// # Ok(())
/// # }
/// ```
#[must_use = "dropping a TaskHandle cancels the task, use `detach` to let it run"]
pub struct TaskHandle<T> {
    task: Arc<Task>,
    output: Output<T>,
    detached: bool,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(task: Arc<Task>, output: Output<T>) -> Self {
        Self {
            task,
            output,
            detached: false,
        }
    }

    pub fn id(&self) -> Id {
        self.task.id()
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests cancellation with [`CancellationReason::UserRequest`].
    /// Idempotent.
    pub fn cancel(&self) {
        self.task.request_cancel(CancellationReason::UserRequest);
    }

    pub fn cancellation_token(&self) -> TaskCancellationToken {
        TaskCancellationToken::new(Arc::clone(&self.task))
    }

    /// Lets the task run to completion on its own. Its result is discarded.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Turns this handle into one that can be cloned and awaited by several
    /// tasks at once. The task is cancelled once the last copy is dropped.
    pub fn share(mut self) -> SharedTaskHandle<T> {
        self.detached = true;
        SharedTaskHandle::new(Arc::clone(&self.task), Arc::clone(&self.output))
    }

    /// Waits for the task to finish.
    ///
    /// Returns [`TaskError::WaitInterrupted`] if the *current* task is
    /// cancelled while waiting.
    pub async fn wait(&self) -> Result<(), TaskError> {
        self.wait_until(Deadline::unreachable()).await
    }

    /// Like [`wait`](TaskHandle::wait) but gives up with
    /// [`TaskError::TimedOut`] once `deadline` is reached.
    pub async fn wait_until(&self, deadline: Deadline) -> Result<(), TaskError> {
        wait_for_task(&self.task, deadline).await
    }

    /// Waits for the task and returns its result.
    pub async fn get(self) -> Result<T, TaskError> {
        self.get_until(Deadline::unreachable()).await
    }

    /// Like [`get`](TaskHandle::get) but gives up with
    /// [`TaskError::TimedOut`] once `deadline` is reached. The handle is
    /// consumed either way, so a task that did not finish in time is
    /// cancelled as abandoned.
    pub async fn get_until(mut self, deadline: Deadline) -> Result<T, TaskError> {
        self.wait_until(deadline).await?;
        self.detached = true;
        self.take_output()
    }

    /// Blocks the calling OS thread until the task finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from a worker thread.
    #[track_caller]
    pub fn blocking_wait(&self) {
        assert_not_on_worker();
        self.task.block_until_finished(Deadline::unreachable());
    }

    /// Blocks the calling OS thread until the task finishes, or `deadline`.
    /// Returns `true` if the task finished.
    #[track_caller]
    pub fn blocking_wait_until(&self, deadline: Deadline) -> bool {
        assert_not_on_worker();
        self.task.block_until_finished(deadline)
    }

    /// Blocks the calling OS thread until the task finishes and returns its
    /// result.
    ///
    /// # Panics
    ///
    /// Panics when called from a worker thread.
    #[track_caller]
    pub fn blocking_get(mut self) -> Result<T, TaskError> {
        self.blocking_wait();
        self.detached = true;
        self.take_output()
    }

    fn take_output(&self) -> Result<T, TaskError> {
        debug_assert!(self.task.is_finished());

        let cancelled = || TaskError::from_cancellation(self.task.cancel.reason());
        if self.task.state() == TaskState::Cancelled {
            return Err(cancelled());
        }

        self.output.lock().take().unwrap_or_else(|| Err(cancelled()))
    }
}

/// Suspends the current task until `target` reaches a terminal state.
pub(super) async fn wait_for_task(target: &Arc<Task>, deadline: Deadline) -> Result<(), TaskError> {
    let me = current::expect_current_task();
    assert!(
        !Arc::ptr_eq(&me, target),
        "task {} is waiting for itself",
        me.id()
    );

    loop {
        if target.is_finished() {
            return Ok(());
        }

        let mut strategy = FinishStrategy::new(target);
        match wait::sleep(&mut strategy, deadline).await {
            WakeupSource::CancelRequest => {
                return Err(TaskError::WaitInterrupted(me.cancel.reason()));
            }
            WakeupSource::Deadline => {
                return if target.is_finished() {
                    Ok(())
                } else {
                    Err(TaskError::TimedOut)
                };
            }
            WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
        }
    }
}

#[track_caller]
pub(super) fn assert_not_on_worker() {
    assert!(
        !context::is_worker_thread(),
        "blocking wait called from a worker thread"
    );
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if !self.detached && !self.task.is_finished() {
            self.task.request_cancel(CancellationReason::Abandoned);
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.task.id())
            .field("state", &self.task.state())
            .field("detached", &self.detached)
            .finish()
    }
}

/// Parks the current task on the finish list of another task.
struct FinishStrategy<'a> {
    target: &'a Task,
    waiter: Option<Waiter>,
}

impl<'a> FinishStrategy<'a> {
    fn new(target: &'a Task) -> Self {
        Self {
            target,
            waiter: None,
        }
    }
}

impl WaitStrategy for FinishStrategy<'_> {
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
        let mut waiters = self.target.finish_waiters.lock();

        // Checked under the list lock, the finishing task sets its state
        // before taking it.
        if self.target.is_finished() {
            return EarlyWakeup(true);
        }

        waiters.push(waiter.clone());
        self.waiter = Some(waiter.clone());
        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.target.finish_waiters.lock().remove(&waiter);
        }
    }
}
