//! Task-aware synchronization primitives.
//!
//! Contention suspends the waiting *task*, never the worker thread running
//! it. [`Future`] here is a one-shot value set through a [`Promise`], not the
//! std trait. Every primitive is built from a [`WaitList`] or a
//! [`WakeSlot`](crate::wait::WakeSlot) and [`wait::sleep`](crate::wait::sleep).

mod condvar;
pub use condvar::{CondVar, CvStatus};

mod event;
pub use event::{Event, EventSender, SingleConsumerEvent};

mod future;
pub use future::{Future, FutureError, FutureStatus, Promise};

mod mutex;
pub use mutex::{Mutex, MutexGuard};

mod semaphore;
pub use semaphore::{Semaphore, SemaphoreError, SemaphorePermit};

mod wait_any;
pub use wait_any::{Waitable, wait_all, wait_all_until, wait_any, wait_any_until};

use crate::wait::{EarlyWakeup, WaitList, WaitStrategy, Waiter};

/// Parks the task on `list` unless `ready` holds. `ready` is evaluated under
/// the list lock, so a notifier that makes it true and then wakes the list
/// can't slip in between the check and the registration.
pub(crate) struct ConditionStrategy<'a, F: Fn() -> bool> {
    list: &'a WaitList,
    ready: F,
    waiter: Option<Waiter>,
}

impl<'a, F: Fn() -> bool> ConditionStrategy<'a, F> {
    pub(crate) fn new(list: &'a WaitList, ready: F) -> Self {
        Self {
            list,
            ready,
            waiter: None,
        }
    }
}

impl<F: Fn() -> bool> WaitStrategy for ConditionStrategy<'_, F> {
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
        let mut waiters = self.list.lock();
        if (self.ready)() {
            return EarlyWakeup(true);
        }

        waiters.push(waiter.clone());
        self.waiter = Some(waiter.clone());
        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.list.lock().remove(&waiter);
        }
    }
}
