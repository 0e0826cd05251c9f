//! Building blocks for task-aware waiting.
//!
//! A primitive that wants to suspend the current task implements
//! [`WaitStrategy`] and awaits [`sleep`]. The strategy registers a [`Waiter`]
//! wherever the wake will come from (a [`WaitList`], a [`WakeSlot`], ...) and
//! retracts it afterwards. The sleep itself takes care of deadlines,
//! cancellation and the at-most-one-wake guarantee.
//!
//! ```no_run
//! use weft::time::Deadline;
//! use weft::wait::{EarlyWakeup, WaitList, WaitStrategy, Waiter, sleep};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! struct Flag {
//!     set: AtomicBool,
//!     waiters: WaitList,
//! }
//!
//! struct FlagStrategy<'a> {
//!     flag: &'a Flag,
//!     waiter: Option<Waiter>,
//! }
//!
//! impl WaitStrategy for FlagStrategy<'_> {
//!     fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
//!         let mut waiters = self.flag.waiters.lock();
//!         if self.flag.set.load(Ordering::Acquire) {
//!             return EarlyWakeup(true);
//!         }
//!         waiters.push(waiter.clone());
//!         self.waiter = Some(waiter.clone());
//!         EarlyWakeup(false)
//!     }
//!
//!     fn disable_wakeups(&mut self) {
//!         if let Some(waiter) = self.waiter.take() {
//!             self.flag.waiters.lock().remove(&waiter);
//!         }
//!     }
//! }
//!
//! # async fn wait(flag: &Flag) {
//! while !flag.set.load(Ordering::Acquire) {
//!     let mut strategy = FlagStrategy { flag, waiter: None };
//!     sleep(&mut strategy, Deadline::unreachable()).await;
//! }
//! # }
//! ```

use crate::task::state::Epoch;
use crate::task::{Id, Task};
use std::fmt;
use std::sync::{Arc, Weak};

mod list;
pub use list::{WaitList, WaitListGuard};

mod sleep;
pub use sleep::{Sleep, sleep};

mod slot;
pub use slot::WakeSlot;

pub use crate::task::WakeupSource;

/// Returned by [`WaitStrategy::setup_wakeups`]. `EarlyWakeup(true)` means the
/// awaited condition is already satisfied and the task must not suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyWakeup(pub bool);

/// How a primitive registers and retracts the current task.
pub trait WaitStrategy {
    /// Registers `waiter` with every wake source. Runs before the task is
    /// suspended; a wake delivered from this point on is never lost.
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup;

    /// Retracts the registrations made by `setup_wakeups`. Must be
    /// idempotent and tolerate registrations already consumed by a waker.
    fn disable_wakeups(&mut self);
}

/// Registration of a suspended task for one particular sleep.
///
/// Holds the task weakly, a wait list never extends the lifetime of a task.
/// Once the task resumes, waking a stale `Waiter` is a no-op.
#[derive(Clone)]
pub struct Waiter {
    task: Weak<Task>,
    epoch: Epoch,
    task_id: Id,
}

impl Waiter {
    pub(crate) fn new(task: &Arc<Task>, epoch: Epoch) -> Self {
        Self {
            task: Arc::downgrade(task),
            epoch,
            task_id: task.id(),
        }
    }

    pub fn task_id(&self) -> Id {
        self.task_id
    }

    /// Wakes the registered task with [`WakeupSource::WaitList`]. Returns
    /// `false` if the registration is stale or the task is gone.
    pub fn wake(&self) -> bool {
        match self.task.upgrade() {
            Some(task) => task.wakeup(WakeupSource::WaitList, Some(self.epoch)),
            None => false,
        }
    }

    /// Registration that belongs to no task. Waking it always fails.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            task: Weak::new(),
            epoch: Epoch::default(),
            task_id: Id::next(),
        }
    }

    /// Same task, same sleep.
    pub fn same_as(&self, other: &Waiter) -> bool {
        self.task_id == other.task_id && self.epoch == other.epoch
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("task_id", &self.task_id)
            .field("epoch", &self.epoch)
            .finish()
    }
}
