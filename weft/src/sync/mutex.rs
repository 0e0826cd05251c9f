use crate::sync::ConditionStrategy;
use crate::task::{CancellationBlocker, WakeupSource, current};
use crate::time::Deadline;
use crate::utils::ScopeGuard;
use crate::wait::{self, WaitList};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

const UNLOCKED: u64 = 0;

/// Mutual exclusion between tasks.
///
/// Waiting for the lock suspends the task, the worker thread moves on to
/// other tasks. Waiters are queued FIFO but the lock is not handed over: a
/// task that finds the mutex unlocked takes it even if others are queued.
///
/// Locking is not interrupted by cancellation. The guard may be held across
/// `.await` points and dropped from any worker.
///
/// ```no_run
/// use std::sync::Arc;
/// use weft::sync::Mutex;
///
/// # async fn doc() {
/// let counter = Arc::new(Mutex::new(0));
/// let handles = (0..8)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         weft::spawn(async move { *counter.lock().await += 1 })
///     })
///     .collect::<Vec<_>>();
///
/// for handle in handles {
///     handle.get().await.unwrap();
/// }
/// assert_eq!(*counter.lock().await, 8);
/// # }
/// ```
pub struct Mutex<T: ?Sized> {
    /// Id of the owning task, `UNLOCKED` otherwise.
    owner: AtomicU64,
    waiters: WaitList,
    data: UnsafeCell<T>,
}

// Safety: the owner slot gives exclusive access to `data` to one task at a
// time, the same rules as `std::sync::Mutex` apply.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
            waiters: WaitList::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Locks the mutex, suspending the current task until it is available.
    ///
    /// # Panics
    ///
    /// Panics when the current task already holds the lock.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        match self.lock_until(Deadline::unreachable()).await {
            Some(guard) => guard,
            None => unreachable!("lock without deadline gave up"),
        }
    }

    /// Like [`lock`](Mutex::lock) but gives up once `deadline` is reached.
    pub async fn lock_until(&self, deadline: Deadline) -> Option<MutexGuard<'_, T>> {
        let me = current::id().as_u64();
        if self.try_claim(me) {
            return Some(self.guard());
        }

        assert_ne!(
            self.owner.load(Ordering::Acquire),
            me,
            "task {me} tried to lock a mutex it already holds"
        );

        let _blocker = CancellationBlocker::new();

        // Our wakeup may be the one meant to hand over the mutex. If we leave
        // without the lock (timeout, or the future is dropped) pass it on.
        let mut baton = ScopeGuard::new(|| {
            if !self.is_locked() {
                self.waiters.wakeup_one();
            }
        });

        loop {
            let mut strategy = ConditionStrategy::new(&self.waiters, || !self.is_locked());
            let source = wait::sleep(&mut strategy, deadline).await;

            if self.try_claim(me) {
                baton.disarm();
                return Some(self.guard());
            }

            if source == WakeupSource::Deadline {
                tracing::trace!(task_id = me, "mutex lock timed out");
                return None;
            }
        }
    }

    /// Locks the mutex if it is available right now.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a task.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_claim(current::id().as_u64())
            .then(|| self.guard())
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != UNLOCKED
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn try_claim(&self, me: u64) -> bool {
        self.owner
            .compare_exchange(UNLOCKED, me, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            _marker: PhantomData,
        }
    }

    fn unlock(&self) {
        self.owner.store(UNLOCKED, Ordering::Release);
        self.waiters.wakeup_one();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Releases the [`Mutex`] when dropped.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,

    // `Sync` only if `T: Sync`, the guard hands out `&T`.
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    pub(crate) fn mutex(guard: &Self) -> &'a Mutex<T> {
        guard.mutex
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves we own the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves we own the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::runtime::Builder;
    use crate::time::{sleep_for, yield_now};
    use anyhow::Result;
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    assert_impl_all!(Mutex<u64>: Send, Sync);
    assert_impl_all!(MutexGuard<'static, u64>: Send, Sync);
    assert_not_impl_any!(MutexGuard<'static, Cell<u64>>: Sync);

    #[test]
    fn test_640k_increments() -> Result<()> {
        const TASKS: usize = 64;
        const ITERATIONS: usize = 10_000;

        let processor = Builder::new().worker_threads(4).try_build()?;
        let counter = Arc::new(Mutex::new(0usize));

        let handles = (0..TASKS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                processor.spawn(async move {
                    for i in 0..ITERATIONS {
                        let mut guard = counter.lock().await;
                        *guard += 1;

                        // Hold the lock across a suspension now and then.
                        if i % 1000 == 0 {
                            yield_now().await;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.blocking_get()?;
        }

        let total = processor.block_on(async move { *counter.lock().await })?;
        assert_eq!(total, TASKS * ITERATIONS);
        processor.shutdown()
    }

    #[weft::test]
    async fn test_try_lock() {
        let mutex = Mutex::new(1);

        let guard = mutex.try_lock().expect("unlocked");
        assert!(mutex.is_locked());
        drop(guard);

        assert!(!mutex.is_locked());
        assert!(mutex.try_lock().is_some());
    }

    #[weft::test]
    async fn test_lock_until_times_out() {
        let mutex = Arc::new(Mutex::new(()));
        let guard = mutex.lock().await;

        let handle = weft::spawn({
            let mutex = Arc::clone(&mutex);
            async move {
                mutex
                    .lock_until(Deadline::from_duration(Duration::from_millis(20)))
                    .await
                    .is_some()
            }
        });

        assert_eq!(handle.get().await, Ok(false));
        drop(guard);
    }

    #[weft::test]
    async fn test_timed_out_waiter_passes_wakeup_on() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock().await;

        let quitter = weft::spawn({
            let mutex = Arc::clone(&mutex);
            async move {
                mutex
                    .lock_until(Deadline::from_duration(Duration::from_millis(30)))
                    .await
                    .map(|_| ())
            }
        });
        let patient = weft::spawn({
            let mutex = Arc::clone(&mutex);
            async move { *mutex.lock().await += 1 }
        });

        sleep_for(Duration::from_millis(10)).await.unwrap();
        drop(guard);

        // Whether or not the quitter got the lock, the patient task must.
        let _ = quitter.get().await;
        patient.get().await.unwrap();
        assert_eq!(*mutex.lock().await, 1);
    }

    #[weft::test]
    async fn test_lock_ignores_cancellation() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock().await;

        let handle = weft::spawn({
            let mutex = Arc::clone(&mutex);
            async move {
                *mutex.lock().await += 1;
                current::cancellation_reason()
            }
        });

        sleep_for(Duration::from_millis(10)).await.unwrap();
        handle.cancel();
        sleep_for(Duration::from_millis(10)).await.unwrap();
        drop(guard);

        assert_eq!(handle.get().await, Ok(crate::task::CancellationReason::UserRequest));
        assert_eq!(*mutex.lock().await, 1);
    }

    #[weft::test]
    #[should_panic(expected = "already holds")]
    async fn test_recursive_lock_panics() {
        let mutex = Mutex::new(());
        let _guard = mutex.lock().await;
        let _again = mutex.lock().await;
    }
}
