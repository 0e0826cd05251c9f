use crate::context;
use crate::runtime::Handle;
use crate::task::TaskHandle;

/// Spawns a task on the task processor of the current task.
///
/// The task starts running in the background right away. The returned
/// [`TaskHandle`] cancels it when dropped, see [`TaskHandle::detach`].
///
/// # Panics
///
/// Panics when called outside of a weft worker thread.
#[track_caller]
pub fn spawn<F>(future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    current_handle().spawn(future, false)
}

/// Like [`spawn`], but the task is exempt from admission control and is
/// polled even if cancelled before its first run.
#[track_caller]
pub fn spawn_critical<F>(future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    current_handle().spawn(future, true)
}

#[track_caller]
fn current_handle() -> Handle {
    match context::current_handle() {
        Some(handle) => handle,
        None => panic!("`spawn` called outside of a weft task processor"),
    }
}
