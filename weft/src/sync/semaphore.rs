use crate::sync::ConditionStrategy;
use crate::task::{CancellationReason, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{self, WaitList};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SemaphoreError {
    /// More units requested than the semaphore will ever hold.
    #[error("requested {requested} units from a semaphore of capacity {capacity}")]
    TooMany { requested: usize, capacity: usize },

    #[error("acquire cancelled: {0}")]
    Cancelled(CancellationReason),

    #[error("deadline expired while acquiring")]
    TimedOut,
}

/// Counting semaphore for tasks.
///
/// Acquiring suspends the task while not enough units are available. The
/// units are returned when the [`SemaphorePermit`] is dropped.
pub struct Semaphore {
    available: AtomicUsize,
    capacity: usize,
    waiters: WaitList,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: AtomicUsize::new(capacity),
            capacity,
            waiters: WaitList::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, SemaphoreError> {
        self.acquire_many_until(1, Deadline::unreachable()).await
    }

    pub async fn acquire_until(
        &self,
        deadline: Deadline,
    ) -> Result<SemaphorePermit<'_>, SemaphoreError> {
        self.acquire_many_until(1, deadline).await
    }

    pub async fn acquire_many(&self, n: usize) -> Result<SemaphorePermit<'_>, SemaphoreError> {
        self.acquire_many_until(n, Deadline::unreachable()).await
    }

    /// Acquires `n` units at once, suspending until they are available.
    ///
    /// Fails right away with [`SemaphoreError::TooMany`] when `n` exceeds the
    /// capacity. A cancelled task gets [`SemaphoreError::Cancelled`] and
    /// holds nothing.
    pub async fn acquire_many_until(
        &self,
        n: usize,
        deadline: Deadline,
    ) -> Result<SemaphorePermit<'_>, SemaphoreError> {
        self.check_capacity(n)?;

        loop {
            if self.try_take(n) {
                return Ok(SemaphorePermit { sem: self, n });
            }

            let mut strategy = ConditionStrategy::new(&self.waiters, || self.available() >= n);
            match wait::sleep(&mut strategy, deadline).await {
                WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
                WakeupSource::Deadline => {
                    return if self.try_take(n) {
                        Ok(SemaphorePermit { sem: self, n })
                    } else {
                        Err(SemaphoreError::TimedOut)
                    };
                }
                WakeupSource::CancelRequest => {
                    return Err(SemaphoreError::Cancelled(current::cancellation_reason()));
                }
            }
        }
    }

    pub fn try_acquire(&self) -> Result<Option<SemaphorePermit<'_>>, SemaphoreError> {
        self.try_acquire_many(1)
    }

    /// Acquires `n` units if they are available right now.
    pub fn try_acquire_many(&self, n: usize) -> Result<Option<SemaphorePermit<'_>>, SemaphoreError> {
        self.check_capacity(n)?;
        Ok(self.try_take(n).then(|| SemaphorePermit { sem: self, n }))
    }

    fn check_capacity(&self, n: usize) -> Result<(), SemaphoreError> {
        if n > self.capacity {
            return Err(SemaphoreError::TooMany {
                requested: n,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn try_take(&self, n: usize) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |avail| {
                avail.checked_sub(n)
            })
            .is_ok()
    }

    fn release(&self, n: usize) {
        self.available.fetch_add(n, Ordering::AcqRel);

        // Waiters may want different amounts, let each re-check.
        self.waiters.wakeup_all();
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available())
            .field("capacity", &self.capacity)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// Units held from a [`Semaphore`], returned on drop.
#[must_use = "dropping a permit releases it immediately"]
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
    n: usize,
}

impl SemaphorePermit<'_> {
    pub fn count(&self) -> usize {
        self.n
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if self.n > 0 {
            self.sem.release(self.n);
        }
    }
}

impl fmt::Debug for SemaphorePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphorePermit").field("n", &self.n).finish()
    }
}
