use crate::task::{TaskError, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{self, EarlyWakeup, WaitStrategy, Waiter};
use std::time::Duration;

/// Nothing to register, only the deadline and cancellation can wake us.
struct NoWakeups;

impl WaitStrategy for NoWakeups {
    fn setup_wakeups(&mut self, _waiter: &Waiter) -> EarlyWakeup {
        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {}
}

/// Suspends the current task for `duration`.
///
/// Returns `Err(TaskError::Cancelled)` if the task is cancelled first.
pub async fn sleep_for(duration: Duration) -> Result<(), TaskError> {
    sleep_until(Deadline::from_duration(duration)).await
}

/// Suspends the current task until `deadline`.
///
/// Returns `Err(TaskError::Cancelled)` if the task is cancelled first.
pub async fn sleep_until(deadline: impl Into<Deadline>) -> Result<(), TaskError> {
    let deadline = deadline.into();

    loop {
        match wait::sleep(&mut NoWakeups, deadline).await {
            WakeupSource::Deadline => return Ok(()),
            WakeupSource::CancelRequest => {
                return Err(TaskError::Cancelled(current::cancellation_reason()));
            }
            // Spurious, go back to sleep.
            WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {
                if deadline.is_reached() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::task::{CancellationReason, spawn};
    use std::time::Instant;

    #[weft::test]
    async fn test_sleep_for_elapses() {
        let start = Instant::now();
        sleep_for(Duration::from_millis(20)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[weft::test]
    async fn test_sleep_until_passed_deadline_returns_immediately() {
        sleep_until(Deadline::passed()).await.unwrap();
    }

    #[weft::test]
    async fn test_sleep_interrupted_by_cancel() {
        let handle = spawn(async { sleep_for(Duration::from_secs(60)).await });

        sleep_for(Duration::from_millis(5)).await.unwrap();
        handle.cancel();

        let start = Instant::now();
        let res = handle.get().await;
        assert!(start.elapsed() < Duration::from_secs(10));

        // The body observed the cancellation, its result is discarded.
        assert_eq!(res, Err(TaskError::Cancelled(CancellationReason::UserRequest)));
    }

    #[weft::test]
    async fn test_task_deadline_cancels_sleep() {
        let handle = spawn(async {
            current::set_deadline(Deadline::from_duration(Duration::from_millis(10)));
            sleep_for(Duration::from_secs(60)).await
        });

        assert_eq!(
            handle.get().await,
            Err(TaskError::Cancelled(CancellationReason::Deadline))
        );
    }

    #[weft::test]
    async fn test_sleep_accepts_instant() {
        sleep_until(Instant::now() + Duration::from_millis(1)).await.unwrap();
    }
}
