//! Accessors for the task the calling code runs in.
//!
//! Every function except [`try_id`] panics when called outside of a task.

use crate::context;
use crate::task::{CancellationReason, Id, Task, TaskError};
use crate::time::Deadline;
use std::sync::Arc;

#[track_caller]
pub(crate) fn expect_current_task() -> Arc<Task> {
    match context::current_task() {
        Some(task) => task,
        None => panic!("must be called from inside a weft task"),
    }
}

/// Returns the [`Id`] of the current task.
#[track_caller]
pub fn id() -> Id {
    expect_current_task().id()
}

/// Returns the [`Id`] of the current task, or `None` outside of a task.
pub fn try_id() -> Option<Id> {
    context::current_task().map(|task| task.id())
}

/// Returns `true` if cancellation of the current task was requested and is
/// not blocked by a [`CancellationBlocker`](crate::task::CancellationBlocker).
///
/// A `true` answer marks the cancellation as observed: the task will end in
/// [`TaskState::Cancelled`](crate::task::TaskState::Cancelled) and its result
/// is discarded.
#[track_caller]
pub fn should_cancel() -> bool {
    let task = expect_current_task();
    if task.cancel.is_requested() && !task.cancel.is_blocked() {
        task.cancel.observe();
        true
    } else {
        false
    }
}

/// Returns `Err(TaskError::Cancelled)` if [`should_cancel`] is `true`.
///
/// ```no_run
/// # async fn work() {}
/// # async fn run() -> Result<(), weft::task::TaskError> {
/// loop {
///     weft::task::current::cancellation_point()?;
///     work().await;
/// }
/// # }
/// ```
#[track_caller]
pub fn cancellation_point() -> Result<(), TaskError> {
    if should_cancel() {
        Err(TaskError::Cancelled(cancellation_reason()))
    } else {
        Ok(())
    }
}

/// Reason of the pending cancellation request, [`CancellationReason::None`]
/// if there is none.
#[track_caller]
pub fn cancellation_reason() -> CancellationReason {
    expect_current_task().cancel.reason()
}

/// Sets the task-level deadline. Once reached while the task is suspended,
/// the task is cancelled with [`CancellationReason::Deadline`].
#[track_caller]
pub fn set_deadline(deadline: Deadline) {
    expect_current_task().set_deadline(deadline);
}

/// Returns the task-level deadline.
#[track_caller]
pub fn deadline() -> Deadline {
    expect_current_task().deadline()
}

#[track_caller]
pub fn is_critical() -> bool {
    expect_current_task().is_critical()
}
