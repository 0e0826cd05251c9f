use crate::task::CancellationReason;
use std::any::Any;

/// Error returned when retrieving the outcome of a task, or when a
/// task-aware wait is interrupted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task was cancelled and observed it, or was cancelled before it
    /// ever ran.
    #[error("task cancelled: {0}")]
    Cancelled(CancellationReason),

    /// The deadline expired before the awaited condition became true.
    #[error("deadline expired while waiting")]
    TimedOut,

    /// Admission control rejected the task before its body ran.
    #[error("task rejected by admission control")]
    Overloaded,

    /// The task body panicked. The panic message is carried over.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The *waiting* task was cancelled while waiting on another task.
    #[error("wait interrupted, waiting task cancelled: {0}")]
    WaitInterrupted(CancellationReason),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::TimedOut)
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, TaskError::Overloaded)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// Returns `true` if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::TimedOut | TaskError::Overloaded)
    }

    /// Error a waiter observes for a task cancelled with `reason`.
    pub(crate) fn from_cancellation(reason: CancellationReason) -> TaskError {
        match reason {
            CancellationReason::Overload => TaskError::Overloaded,
            reason => TaskError::Cancelled(reason),
        }
    }
}

pub(crate) fn panic_payload_as_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::user(CancellationReason::UserRequest, TaskError::Cancelled(CancellationReason::UserRequest))]
    #[case::overload(CancellationReason::Overload, TaskError::Overloaded)]
    #[case::deadline(CancellationReason::Deadline, TaskError::Cancelled(CancellationReason::Deadline))]
    #[case::shutdown(CancellationReason::Shutdown, TaskError::Cancelled(CancellationReason::Shutdown))]
    fn test_cancellation_maps_to_error(
        #[case] reason: CancellationReason,
        #[case] expected: TaskError,
    ) {
        assert_eq!(TaskError::from_cancellation(reason), expected);
    }

    #[test]
    fn test_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_as_str(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_payload_as_str(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_payload_as_str(payload.as_ref()), "Box<dyn Any>");
    }

    #[test]
    fn test_display() {
        let err = TaskError::Cancelled(CancellationReason::UserRequest);
        assert_eq!(err.to_string(), "task cancelled: user request");
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        assert!(TaskError::Overloaded.is_retryable());
    }
}
