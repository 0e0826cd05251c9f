use crate::sync::ConditionStrategy;
use crate::task::{CancellationReason, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{self, WaitList};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FutureError {
    #[error("future already retrieved from this promise")]
    AlreadyRetrieved,

    #[error("promise already satisfied")]
    AlreadySatisfied,

    /// The promise was dropped without a value.
    #[error("broken promise")]
    BrokenPromise,

    #[error("wait interrupted, waiting task cancelled: {0}")]
    WaitInterrupted(CancellationReason),
}

/// Outcome of [`Future::wait`] and [`Future::wait_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// A value was set or the promise is broken, [`Future::get`] won't
    /// suspend.
    Ready,
    Timeout,
    Cancelled,
}

enum Slot<T> {
    Empty,
    Value(T),
    Broken,
    Taken,
}

struct State<T> {
    slot: Mutex<Slot<T>>,

    /// Mirrors `slot` leaving `Empty`, readable without the slot lock.
    ready: AtomicBool,
    retrieved: AtomicBool,
    waiters: WaitList,
}

impl<T> State<T> {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn complete(&self, slot: Slot<T>) -> Result<(), FutureError> {
        // Taken first, readiness is checked under this lock by the waiters.
        let waiters = self.waiters.lock();

        let mut current = self.slot.lock();
        if !matches!(*current, Slot::Empty) {
            return Err(FutureError::AlreadySatisfied);
        }
        *current = slot;
        drop(current);

        self.ready.store(true, Ordering::Release);
        waiters.wakeup_all();
        Ok(())
    }
}

/// Writing side of a one-shot value, see [`Future`].
///
/// May be completed from any thread. Dropping an unsatisfied promise breaks
/// it and wakes the waiting task.
///
/// ```no_run
/// use weft::sync::Promise;
///
/// # async fn doc() -> Result<(), weft::sync::FutureError> {
/// let mut promise = Promise::new();
/// let future = promise.get_future()?;
///
/// std::thread::spawn(move || promise.set_value(42));
/// assert_eq!(future.get().await?, 42);
/// # Ok(())
/// # }
/// ```
pub struct Promise<T> {
    state: Arc<State<T>>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                slot: Mutex::new(Slot::Empty),
                ready: AtomicBool::new(false),
                retrieved: AtomicBool::new(false),
                waiters: WaitList::new(),
            }),
        }
    }

    /// Returns the reading side. Only one future exists per promise.
    pub fn get_future(&mut self) -> Result<Future<T>, FutureError> {
        if self.state.retrieved.swap(true, Ordering::AcqRel) {
            return Err(FutureError::AlreadyRetrieved);
        }

        Ok(Future {
            state: Arc::clone(&self.state),
        })
    }

    /// Stores `value` and wakes the waiting task. Fails if the promise was
    /// already satisfied, `value` is dropped in that case.
    pub fn set_value(&self, value: T) -> Result<(), FutureError> {
        self.state.complete(Slot::Value(value))
    }

    pub fn is_satisfied(&self) -> bool {
        self.state.is_ready()
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.state.is_ready() {
            let _ = self.state.complete(Slot::Broken);
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("satisfied", &self.is_satisfied())
            .finish()
    }
}

/// Reading side of a one-shot value set through a [`Promise`].
///
/// Waiting suspends the current task. Several futures, and task handles,
/// can be waited on at once with [`wait_any`](crate::sync::wait_any).
#[must_use = "a future does nothing unless waited on"]
pub struct Future<T> {
    state: Arc<State<T>>,
}

impl<T> Future<T> {
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub async fn wait(&self) -> FutureStatus {
        self.wait_until(Deadline::unreachable()).await
    }

    pub async fn wait_until(&self, deadline: Deadline) -> FutureStatus {
        loop {
            if self.is_ready() {
                return FutureStatus::Ready;
            }

            let mut strategy = ConditionStrategy::new(&self.state.waiters, || self.is_ready());
            match wait::sleep(&mut strategy, deadline).await {
                WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
                WakeupSource::Deadline => {
                    return if self.is_ready() {
                        FutureStatus::Ready
                    } else {
                        FutureStatus::Timeout
                    };
                }
                WakeupSource::CancelRequest => return FutureStatus::Cancelled,
            }
        }
    }

    /// Waits for the value and takes it.
    ///
    /// Returns [`FutureError::BrokenPromise`] if the promise was dropped
    /// unsatisfied and [`FutureError::WaitInterrupted`] if the current task
    /// is cancelled first.
    pub async fn get(self) -> Result<T, FutureError> {
        match self.wait().await {
            FutureStatus::Ready => {}
            FutureStatus::Cancelled => {
                return Err(FutureError::WaitInterrupted(current::cancellation_reason()));
            }
            FutureStatus::Timeout => unreachable!("wait without a deadline timed out"),
        }

        match mem::replace(&mut *self.state.slot.lock(), Slot::Taken) {
            Slot::Value(value) => Ok(value),
            Slot::Broken => Err(FutureError::BrokenPromise),
            Slot::Empty | Slot::Taken => unreachable!("ready future without a value"),
        }
    }

    pub(crate) fn waiters(&self) -> &WaitList {
        &self.state.waiters
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish()
    }
}
