use crate::sync::ConditionStrategy;
use crate::task::{TaskError, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{self, EarlyWakeup, WaitList, WaitStrategy, WakeSlot, Waiter};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Auto-reset event with a single waiting task.
///
/// [`send`](SingleConsumerEvent::send) may be called from anywhere, worker
/// threads or not, any number of times; the consumer sees at most one
/// pending signal. A successful wait consumes it.
///
/// Two tasks waiting at the same time is a bug and panics.
///
/// ```no_run
/// use weft::sync::SingleConsumerEvent;
///
/// # async fn doc() {
/// let event = SingleConsumerEvent::new();
/// let sender = event.sender();
///
/// std::thread::spawn(move || sender.send());
/// event.wait().await.unwrap();
/// # }
/// ```
#[derive(Default)]
pub struct SingleConsumerEvent {
    slot: Arc<WakeSlot>,
}

/// Sending side of a [`SingleConsumerEvent`], usable from any thread. This
/// is what an I/O reactor holds to resume a task.
#[derive(Clone)]
pub struct EventSender {
    slot: Arc<WakeSlot>,
}

struct SlotStrategy<'a> {
    slot: &'a WakeSlot,
    waiter: Option<Waiter>,
}

impl WaitStrategy for SlotStrategy<'_> {
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
        if !self.slot.try_register(waiter.clone()) {
            return EarlyWakeup(true);
        }

        self.waiter = Some(waiter.clone());
        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.slot.cancel_if_unresolved(&waiter);
        }
    }
}

fn send_to(slot: &WakeSlot) {
    if let Some(waiter) = slot.wake() {
        waiter.wake();
    }
}

impl SingleConsumerEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Signals the event. Idempotent until the signal is consumed.
    pub fn send(&self) {
        send_to(&self.slot);
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_signaled()
    }

    /// Drops a pending signal.
    pub fn reset(&self) {
        self.slot.reset();
    }

    /// Waits for a signal and consumes it.
    pub async fn wait(&self) -> Result<(), TaskError> {
        self.wait_until(Deadline::unreachable()).await
    }

    /// Waits for a signal until `deadline`. Returns
    /// [`TaskError::TimedOut`] on expiry and [`TaskError::Cancelled`] if the
    /// current task is cancelled.
    pub async fn wait_until(&self, deadline: Deadline) -> Result<(), TaskError> {
        loop {
            if self.slot.take_signal() {
                return Ok(());
            }

            let mut strategy = SlotStrategy {
                slot: &self.slot,
                waiter: None,
            };

            match wait::sleep(&mut strategy, deadline).await {
                WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
                WakeupSource::Deadline => {
                    return if self.slot.take_signal() {
                        Ok(())
                    } else {
                        Err(TaskError::TimedOut)
                    };
                }
                WakeupSource::CancelRequest => {
                    return Err(TaskError::Cancelled(current::cancellation_reason()));
                }
            }
        }
    }
}

impl EventSender {
    pub fn send(&self) {
        send_to(&self.slot);
    }
}

impl fmt::Debug for SingleConsumerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleConsumerEvent")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

/// Manual-reset event with any number of waiting tasks.
///
/// Once sent, every current and future waiter passes until
/// [`reset`](Event::reset) is called.
#[derive(Default)]
pub struct Event {
    signaled: AtomicBool,
    waiters: WaitList,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the event and wakes every waiter.
    pub fn send(&self) {
        // Set under the list lock, waiters check the flag under it too.
        let waiters = self.waiters.lock();
        self.signaled.store(true, Ordering::Release);
        waiters.wakeup_all();
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub async fn wait(&self) -> Result<(), TaskError> {
        self.wait_until(Deadline::unreachable()).await
    }

    /// Waits for the event until `deadline`. Returns
    /// [`TaskError::TimedOut`] on expiry and [`TaskError::Cancelled`] if the
    /// current task is cancelled.
    pub async fn wait_until(&self, deadline: Deadline) -> Result<(), TaskError> {
        loop {
            if self.is_ready() {
                return Ok(());
            }

            let mut strategy = ConditionStrategy::new(&self.waiters, || self.is_ready());
            match wait::sleep(&mut strategy, deadline).await {
                WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
                WakeupSource::Deadline => {
                    return if self.is_ready() {
                        Ok(())
                    } else {
                        Err(TaskError::TimedOut)
                    };
                }
                WakeupSource::CancelRequest => {
                    return Err(TaskError::Cancelled(current::cancellation_reason()));
                }
            }
        }
    }

    pub(crate) fn waiters(&self) -> &WaitList {
        &self.waiters
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("ready", &self.is_ready())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::task::CancellationReason;
    use crate::time::sleep_for;
    use static_assertions::assert_impl_all;
    use std::thread;
    use std::time::Duration;

    assert_impl_all!(SingleConsumerEvent: Send, Sync);
    assert_impl_all!(EventSender: Send, Sync, Clone);
    assert_impl_all!(Event: Send, Sync);

    #[weft::test]
    async fn test_signal_before_wait_is_kept() {
        let event = SingleConsumerEvent::new();
        event.send();
        event.send();
        assert!(event.is_ready());

        event.wait().await.unwrap();
        assert!(!event.is_ready());

        // Auto reset, the second send was folded in the first.
        let res = event
            .wait_until(Deadline::from_duration(Duration::from_millis(5)))
            .await;
        assert_eq!(res, Err(TaskError::TimedOut));
    }

    #[weft::test]
    async fn test_send_from_foreign_thread() {
        let event = SingleConsumerEvent::new();

        for _ in 0..100 {
            let sender = event.sender();
            let sender_thread = thread::spawn(move || sender.send());
            event.wait().await.unwrap();
            sender_thread.join().unwrap();
        }
    }

    #[weft::test]
    async fn test_wait_is_cancellable() {
        let event = Arc::new(SingleConsumerEvent::new());

        let handle = weft::spawn({
            let event = Arc::clone(&event);
            async move { event.wait().await }
        });

        sleep_for(Duration::from_millis(10)).await.unwrap();
        handle.cancel();
        assert_eq!(
            handle.get().await,
            Err(TaskError::Cancelled(CancellationReason::UserRequest))
        );

        // Registration retracted, a new consumer may wait.
        event.send();
        event.wait().await.unwrap();
    }

    #[weft::test]
    async fn test_manual_reset_event_releases_everyone() {
        let event = Arc::new(Event::new());

        let handles = (0..8)
            .map(|_| {
                let event = Arc::clone(&event);
                weft::spawn(async move { event.wait().await })
            })
            .collect::<Vec<_>>();

        sleep_for(Duration::from_millis(10)).await.unwrap();
        event.send();

        for handle in handles {
            assert_eq!(handle.get().await, Ok(Ok(())));
        }

        // Stays signaled until reset.
        event.wait().await.unwrap();
        event.reset();
        let res = event
            .wait_until(Deadline::from_duration(Duration::from_millis(5)))
            .await;
        assert_eq!(res, Err(TaskError::TimedOut));
    }
}
