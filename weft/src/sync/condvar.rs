use crate::sync::MutexGuard;
use crate::task::WakeupSource;
use crate::time::Deadline;
use crate::wait::{self, EarlyWakeup, WaitList, WaitStrategy, Waiter};
use std::fmt;
use std::time::Duration;

/// Why a [`CondVar`] wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CvStatus {
    /// Notified, or spuriously woken.
    NoTimeout,
    Timeout,
    /// The waiting task was cancelled.
    Cancelled,
}

impl From<WakeupSource> for CvStatus {
    fn from(source: WakeupSource) -> Self {
        match source {
            WakeupSource::Deadline => CvStatus::Timeout,
            WakeupSource::CancelRequest => CvStatus::Cancelled,
            WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {
                CvStatus::NoTimeout
            }
        }
    }
}

/// Condition variable for tasks, used together with a
/// [`Mutex`](crate::sync::Mutex).
///
/// Every wait re-acquires the mutex before returning, whatever the
/// [`CvStatus`]. Re-locking is not interrupted by cancellation.
#[derive(Default)]
pub struct CondVar {
    waiters: WaitList,
}

/// Registers on the condvar, then releases the mutex. The registration comes
/// first so a notification sent right after the unlock can't be missed.
struct UnlockStrategy<'a, 'g, T: ?Sized> {
    cv: &'a CondVar,
    guard: Option<MutexGuard<'g, T>>,
    waiter: Option<Waiter>,
}

impl<T: ?Sized> WaitStrategy for UnlockStrategy<'_, '_, T> {
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
        self.cv.waiters.lock().push(waiter.clone());
        self.waiter = Some(waiter.clone());

        drop(self.guard.take());
        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.cv.waiters.lock().remove(&waiter);
        }
    }
}

impl CondVar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait<'g, T: ?Sized>(
        &self,
        guard: MutexGuard<'g, T>,
    ) -> (MutexGuard<'g, T>, CvStatus) {
        self.wait_until(guard, Deadline::unreachable()).await
    }

    pub async fn wait_for<'g, T: ?Sized>(
        &self,
        guard: MutexGuard<'g, T>,
        timeout: Duration,
    ) -> (MutexGuard<'g, T>, CvStatus) {
        self.wait_until(guard, Deadline::from_duration(timeout)).await
    }

    /// Releases the mutex, waits for a notification and locks the mutex
    /// again.
    pub async fn wait_until<'g, T: ?Sized>(
        &self,
        guard: MutexGuard<'g, T>,
        deadline: Deadline,
    ) -> (MutexGuard<'g, T>, CvStatus) {
        let mutex = MutexGuard::mutex(&guard);
        let mut strategy = UnlockStrategy {
            cv: self,
            guard: Some(guard),
            waiter: None,
        };

        let status = CvStatus::from(wait::sleep(&mut strategy, deadline).await);

        // Sleep returns early on cancellation or an expired deadline, then
        // we still hold the lock.
        let guard = match strategy.guard.take() {
            Some(guard) => guard,
            None => mutex.lock().await,
        };

        (guard, status)
    }

    /// Waits until `pred` holds. Returns `false` if the wait was cancelled
    /// first.
    pub async fn wait_pred<'g, T: ?Sized, F>(
        &self,
        guard: MutexGuard<'g, T>,
        pred: F,
    ) -> (MutexGuard<'g, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_until_pred(guard, Deadline::unreachable(), pred)
            .await
    }

    /// Waits until `pred` holds. Returns `false` if `deadline` was reached
    /// or the wait cancelled before. The predicate is checked one last time
    /// after a timeout.
    pub async fn wait_until_pred<'g, T: ?Sized, F>(
        &self,
        mut guard: MutexGuard<'g, T>,
        deadline: Deadline,
        mut pred: F,
    ) -> (MutexGuard<'g, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        while !pred(&mut guard) {
            let (relocked, status) = self.wait_until(guard, deadline).await;
            guard = relocked;

            if status != CvStatus::NoTimeout {
                let ok = pred(&mut guard);
                return (guard, ok);
            }
        }

        (guard, true)
    }

    /// Wakes one waiting task. Returns `true` if a task accepted the
    /// notification.
    pub fn notify_one(&self) -> bool {
        self.waiters.wakeup_one()
    }

    /// Wakes every waiting task, in the order they started waiting.
    pub fn notify_all(&self) -> usize {
        self.waiters.wakeup_all()
    }
}

impl fmt::Debug for CondVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondVar")
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::sync::Mutex;
    use crate::time::sleep_for;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;

    assert_impl_all!(CondVar: Send, Sync);

    #[weft::test]
    async fn test_notify_one_wakes_waiter() {
        let state = Arc::new((Mutex::new(false), CondVar::new()));

        let waiter = weft::spawn({
            let state = Arc::clone(&state);
            async move {
                let (mutex, cv) = &*state;
                let guard = mutex.lock().await;
                let (guard, ok) = cv.wait_pred(guard, |ready| *ready).await;
                ok && *guard
            }
        });

        sleep_for(Duration::from_millis(10)).await.unwrap();
        {
            let (mutex, cv) = &*state;
            *mutex.lock().await = true;
            cv.notify_one();
        }

        assert_eq!(waiter.get().await, Ok(true));
    }

    #[weft::test]
    async fn test_wait_for_times_out_and_relocks() {
        let mutex = Mutex::new(5);
        let cv = CondVar::new();

        let guard = mutex.lock().await;
        let (guard, status) = cv.wait_for(guard, Duration::from_millis(10)).await;

        assert_eq!(status, CvStatus::Timeout);
        assert_eq!(*guard, 5);
        assert!(mutex.is_locked());
    }

    #[weft::test]
    async fn test_wait_pred_times_out() {
        let mutex = Mutex::new(false);
        let cv = CondVar::new();

        let guard = mutex.lock().await;
        let deadline = Deadline::from_duration(Duration::from_millis(10));
        let (_guard, ok) = cv.wait_until_pred(guard, deadline, |ready| *ready).await;
        assert!(!ok);
    }

    #[weft::test]
    async fn test_cancelled_wait_keeps_lock() {
        let state = Arc::new((Mutex::new(0), CondVar::new()));

        let handle = weft::spawn({
            let state = Arc::clone(&state);
            async move {
                let (mutex, cv) = &*state;
                let guard = mutex.lock().await;
                let (mut guard, status) = cv.wait(guard).await;
                *guard += 1;
                status
            }
        });

        while state.1.waiters.is_empty() {
            sleep_for(Duration::from_millis(1)).await.unwrap();
        }
        handle.cancel();

        // The cancelled wait returns, re-locks and the body completes; its
        // result is discarded since the cancellation was observed.
        assert!(handle.get().await.is_err());
        assert_eq!(*state.0.lock().await, 1);
    }

    #[weft::test(worker_threads = 1)]
    async fn test_notify_all_wakes_in_fifo_order() {
        let state = Arc::new((Mutex::new(Vec::new()), CondVar::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(weft::spawn({
                let state = Arc::clone(&state);
                async move {
                    let (mutex, cv) = &*state;
                    let guard = mutex.lock().await;
                    let (mut guard, _) = cv.wait(guard).await;
                    guard.push(i);
                }
            }));

            // Register one waiter at a time.
            while state.1.waiters.len() <= i {
                sleep_for(Duration::from_millis(1)).await.unwrap();
            }
        }

        assert_eq!(state.1.notify_all(), 8);
        for handle in handles {
            handle.get().await.unwrap();
        }
        assert_eq!(*state.0.lock().await, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_timeout_race_reports_one_cause() -> anyhow::Result<()> {
        let processor = crate::runtime::Builder::new().worker_threads(2).try_build()?;

        processor.block_on(async {
            let state = Arc::new((Mutex::new(()), CondVar::new()));

            for i in 0..10_000u32 {
                let waiter = weft::spawn({
                    let state = Arc::clone(&state);
                    async move {
                        let (mutex, cv) = &*state;
                        let guard = mutex.lock().await;
                        let deadline = Deadline::from_duration(Duration::from_micros(50));
                        cv.wait_until(guard, deadline).await.1
                    }
                });

                // Land the notification anywhere around the deadline.
                if i % 2 == 0 {
                    crate::time::yield_now().await;
                }
                let notified = state.1.notify_one();
                let status = waiter.get().await.expect("waiter completes");

                assert!(matches!(status, CvStatus::NoTimeout | CvStatus::Timeout));
                if notified {
                    assert_eq!(status, CvStatus::NoTimeout, "iteration {i}");
                }
            }
        })?;

        processor.shutdown()
    }
}
