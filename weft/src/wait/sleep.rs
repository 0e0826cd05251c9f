use crate::runtime::TimerKey;
use crate::task::state::Epoch;
use crate::task::{CancellationReason, Task, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{WaitStrategy, Waiter};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Suspends the current task until one of the wakeups set up by `strategy`
/// fires, `deadline` is reached, or the task is cancelled.
///
/// Resolves to the single cause that resumed the task:
///
/// - [`WakeupSource::WaitList`]: a waker signaled a registration. Also
///   returned when `setup_wakeups` reports an early wakeup.
/// - [`WakeupSource::Deadline`]: `deadline` was reached.
/// - [`WakeupSource::CancelRequest`]: the task is cancelled. This includes
///   the task-level deadline expiring. The cancellation is marked observed.
/// - [`WakeupSource::Waker`]: the std waker of the task was used. Usually
///   another future polled by the same task; treat as spurious.
///
/// When several causes race, explicit signals win over deadlines, deadlines
/// over std wakers, and std wakers over cancellation.
///
/// # Panics
///
/// Panics when polled outside of a task, or if the task already has another
/// `Sleep` in progress.
pub fn sleep<S: WaitStrategy>(strategy: &mut S, deadline: Deadline) -> Sleep<'_, S> {
    Sleep {
        strategy,
        deadline,
        stage: Stage::Init,
    }
}

#[must_use = "futures do nothing unless polled"]
pub struct Sleep<'a, S: WaitStrategy> {
    strategy: &'a mut S,
    deadline: Deadline,
    stage: Stage,
}

enum Stage {
    Init,
    Waiting {
        task: Arc<Task>,
        epoch: Epoch,
        timer: Option<TimerKey>,
    },
    Done,
}

impl<S: WaitStrategy> Sleep<'_, S> {
    fn start(&mut self) -> Poll<WakeupSource> {
        let task = current::expect_current_task();
        let cancellable = !task.cancel.is_blocked();

        if cancellable {
            if task.cancel.is_requested() {
                task.cancel.observe();
                return Poll::Ready(WakeupSource::CancelRequest);
            }

            if task.deadline().is_reached() {
                task.request_cancel(CancellationReason::Deadline);
                task.cancel.observe();
                return Poll::Ready(WakeupSource::CancelRequest);
            }
        }

        if self.deadline.is_reached() {
            return Poll::Ready(WakeupSource::Deadline);
        }

        task.enter_sleep();

        let epoch = task.epoch();
        let waiter = Waiter::new(&task, epoch);

        if self.strategy.setup_wakeups(&waiter).0 {
            // Whatever got registered before the strategy noticed the
            // condition must not resume us later.
            task.sleep.retire_epoch();
            self.strategy.disable_wakeups();
            task.leave_sleep();
            self.stage = Stage::Done;
            return Poll::Ready(WakeupSource::WaitList);
        }

        let timer_deadline = if cancellable {
            self.deadline.min(task.deadline())
        } else {
            self.deadline
        };

        let timer = timer_deadline
            .instant()
            .map(|when| task.scheduler().arm_timer(when, &task, epoch));

        self.stage = Stage::Waiting { task, epoch, timer };
        Poll::Pending
    }

    fn finish(&mut self, task: &Arc<Task>, timer: Option<TimerKey>) -> WakeupSource {
        let source = task.take_wakeup_source();

        if let Some(key) = timer {
            task.scheduler().disarm_timer(key);
        }
        self.strategy.disable_wakeups();
        task.leave_sleep();

        let source = match source {
            WakeupSource::Deadline if !self.deadline.is_reached() => {
                if task.deadline().is_reached() {
                    task.request_cancel(CancellationReason::Deadline);
                    WakeupSource::CancelRequest
                } else {
                    // Neither deadline is due, the entry was not ours.
                    WakeupSource::Waker
                }
            }
            source => source,
        };

        if source == WakeupSource::CancelRequest {
            task.cancel.observe();
        }

        source
    }
}

impl<S: WaitStrategy> Future for Sleep<'_, S> {
    type Output = WakeupSource;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &this.stage {
            Stage::Init => this.start(),
            Stage::Waiting { task, epoch, timer } => {
                // Same epoch: polled again before the task was resumed.
                if task.epoch() == *epoch {
                    return Poll::Pending;
                }

                let (task, timer) = (Arc::clone(task), *timer);
                this.stage = Stage::Done;
                Poll::Ready(this.finish(&task, timer))
            }
            Stage::Done => panic!("`Sleep` polled after completion"),
        }
    }
}

impl<S: WaitStrategy> Drop for Sleep<'_, S> {
    fn drop(&mut self) {
        if let Stage::Waiting { task, epoch, timer } = &self.stage {
            // Dropped before the task suspended on it: the next sleep would
            // reuse the epoch and inherit our registrations.
            if task.epoch() == *epoch {
                task.sleep.retire_epoch();
            }
            if let Some(key) = timer {
                task.scheduler().disarm_timer(*key);
            }
            self.strategy.disable_wakeups();
            task.leave_sleep();
        }
    }
}

impl<S: WaitStrategy> fmt::Debug for Sleep<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            Stage::Init => "init",
            Stage::Waiting { .. } => "waiting",
            Stage::Done => "done",
        };

        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("stage", &stage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate as weft;
    use crate::sync::{Event, SingleConsumerEvent};
    use crate::task::{CancellationReason, current};
    use crate::time::Deadline;
    use futures::future::{self, Either};
    use std::thread;
    use std::time::Duration;

    #[weft::test]
    async fn test_dropped_sleep_leaves_no_deadline_behind() {
        let handle = weft::spawn(async {
            let abandoned = Event::new();
            let later = SingleConsumerEvent::new();

            // The losing wait is dropped right after its first poll.
            let deadline = Deadline::from_duration(Duration::from_millis(10));
            assert!(matches!(
                future::select(Box::pin(abandoned.wait_until(deadline)), Box::pin(async {})).await,
                Either::Right(_)
            ));

            let sender = later.sender();
            let sender_thread = thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                sender.send();
            });

            let res = later.wait().await;
            sender_thread.join().unwrap();
            (res, current::cancellation_reason())
        });

        assert_eq!(handle.get().await, Ok((Ok(()), CancellationReason::None)));
    }

    #[weft::test]
    async fn test_resolved_waits_disarm_their_timer() {
        let event = SingleConsumerEvent::new();
        let deadline = Deadline::from_duration(Duration::from_secs(3600));

        for _ in 0..1000 {
            let sender = event.sender();
            let sender_thread = thread::spawn(move || sender.send());
            event.wait_until(deadline).await.unwrap();
            sender_thread.join().unwrap();
        }

        assert_eq!(current::expect_current_task().scheduler().armed_timers(), 0);
    }

    #[weft::test]
    async fn test_timed_out_wait_leaves_no_timer() {
        let event = Event::new();
        let res = event
            .wait_until(Deadline::from_duration(Duration::from_millis(5)))
            .await;

        assert!(res.is_err());
        assert_eq!(current::expect_current_task().scheduler().armed_timers(), 0);
    }
}
