use crate::task::{Id, Task, current};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Why cancellation of a task was requested. The first request wins, later
/// requests keep the first reason.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CancellationReason {
    #[default]
    None = 0,

    /// [`TaskHandle::cancel`](crate::task::TaskHandle::cancel) or a
    /// [`TaskCancellationToken`].
    UserRequest = 1,

    /// Rejected by the task processor admission control.
    Overload = 2,

    /// The task-level deadline expired.
    Deadline = 3,

    /// The task processor is shutting down.
    Shutdown = 4,

    /// The last handle to the task was dropped without detaching it.
    Abandoned = 5,
}

impl CancellationReason {
    fn from_u8(val: u8) -> CancellationReason {
        match val {
            1 => CancellationReason::UserRequest,
            2 => CancellationReason::Overload,
            3 => CancellationReason::Deadline,
            4 => CancellationReason::Shutdown,
            5 => CancellationReason::Abandoned,
            _ => CancellationReason::None,
        }
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancellationReason::None => "not cancelled",
            CancellationReason::UserRequest => "user request",
            CancellationReason::Overload => "task processor overload",
            CancellationReason::Deadline => "deadline",
            CancellationReason::Shutdown => "task processor shutdown",
            CancellationReason::Abandoned => "task handle dropped",
        };
        f.write_str(s)
    }
}

/// Cancellation bookkeeping of a single task.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    reason: AtomicU8,

    /// Set once the task body saw the request through `should_cancel`, a
    /// cancellation point or an interrupted wait.
    observed: AtomicBool,

    /// Number of live `CancellationBlocker`s. Only touched by the task itself.
    blockers: AtomicU32,
}

impl CancelState {
    pub(crate) fn reason(&self) -> CancellationReason {
        CancellationReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.reason() != CancellationReason::None
    }

    /// Returns `true` if this call stored the reason.
    pub(crate) fn request(&self, reason: CancellationReason) -> bool {
        debug_assert_ne!(reason, CancellationReason::None);
        self.reason
            .compare_exchange(
                CancellationReason::None as u8,
                reason as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blockers.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn observe(&self) {
        self.observed.store(true, Ordering::Release);
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.observed.load(Ordering::Acquire)
    }

    fn block(&self) {
        self.blockers.fetch_add(1, Ordering::Relaxed);
    }

    fn unblock(&self) {
        let prev = self.blockers.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "unbalanced cancellation blocker");
    }
}

/// Disables cancellation of the current task while alive.
///
/// Inside the scope [`current::should_cancel`] returns `false` and
/// cancellation requests do not interrupt suspensions. The request itself is
/// kept and becomes visible again once the blocker is dropped. Meant for
/// cleanup code that must run to completion.
///
/// # Panics
///
/// Panics if created outside of a task.
#[must_use = "cancellation is only blocked while the guard is alive"]
#[derive(Debug)]
pub struct CancellationBlocker {
    task: Arc<Task>,
}

impl CancellationBlocker {
    pub fn new() -> Self {
        let task = current::expect_current_task();
        task.cancel.block();
        Self { task }
    }
}

impl Default for CancellationBlocker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationBlocker {
    fn drop(&mut self) {
        self.task.cancel.unblock();
    }
}

/// Cancels a task without holding its [`TaskHandle`](crate::task::TaskHandle).
///
/// Cloning the token is cheap. Tokens do not keep the task running, nor do
/// they prevent its handle from being dropped.
#[derive(Debug, Clone)]
pub struct TaskCancellationToken {
    task: Arc<Task>,
}

impl TaskCancellationToken {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub fn id(&self) -> Id {
        self.task.id()
    }

    /// Requests cancellation with [`CancellationReason::UserRequest`].
    pub fn cancel(&self) {
        self.task.request_cancel(CancellationReason::UserRequest);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.task.cancel.is_requested()
    }

    pub fn reason(&self) -> CancellationReason {
        self.task.cancel.reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let state = CancelState::default();
        assert!(!state.is_requested());

        assert!(state.request(CancellationReason::Overload));
        assert!(!state.request(CancellationReason::UserRequest));
        assert!(!state.request(CancellationReason::Overload));

        assert_eq!(state.reason(), CancellationReason::Overload);
    }

    #[test]
    fn test_blockers_nest() {
        let state = CancelState::default();
        state.block();
        state.block();
        state.unblock();
        assert!(state.is_blocked());
        state.unblock();
        assert!(!state.is_blocked());
    }
}
