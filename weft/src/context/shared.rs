use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Thread};

#[derive(Debug)]
struct ParkedThread {
    thread: Thread,
    unparked: Arc<AtomicBool>,
}

/// State shared by all the workers of a task processor.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) shutdown: AtomicBool,

    /// Parked workers, most recent last. Unparking the most recent one
    /// favors a warm cache.
    parked_threads: RwLock<VecDeque<ParkedThread>>,

    /// Lets pushers skip the lock when nobody sleeps.
    num_parked: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            parked_threads: RwLock::new(VecDeque::with_capacity(num_workers)),
            num_parked: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Parks the current thread until a pusher or the shutdown sequence
    /// unparks it. `has_work` is re-checked after registering, so a push that
    /// raced with us is never missed.
    pub(crate) fn park_current_thread(&self, has_work: impl Fn() -> bool) {
        let unparked = {
            let mut parked_threads = self.parked_threads.write();

            self.num_parked.fetch_add(1, Ordering::SeqCst);
            atomic::fence(Ordering::SeqCst);

            // Under the lock: a pusher bumps its queue before taking it.
            if has_work() || self.is_shutdown() {
                self.num_parked.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            let unparked = Arc::new(AtomicBool::new(false));
            parked_threads.push_back(ParkedThread {
                thread: thread::current(),
                unparked: Arc::clone(&unparked),
            });
            unparked
        };

        // `park` may return spuriously.
        while !unparked.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// Called after every push on a ready queue.
    pub(crate) fn unpark_one_thread(&self) -> bool {
        atomic::fence(Ordering::SeqCst);
        if self.num_parked.load(Ordering::SeqCst) == 0 {
            return false;
        }

        let parked = self.parked_threads.write().pop_back();
        match parked {
            Some(parked) => {
                self.num_parked.fetch_sub(1, Ordering::SeqCst);
                parked.unparked.store(true, Ordering::Release);
                parked.thread.unpark();
                true
            }
            None => false,
        }
    }

    pub(crate) fn unpark_all_threads(&self) -> usize {
        let mut num_unparked = 0;
        let mut parked_threads = self.parked_threads.write();

        while let Some(parked) = parked_threads.pop_back() {
            num_unparked += 1;
            self.num_parked.fetch_sub(1, Ordering::SeqCst);
            parked.unparked.store(true, Ordering::Release);
            parked.thread.unpark();
        }

        num_unparked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Barrier;
    use std::time::Duration;

    assert_impl_all!(Shared: Send, Sync);

    #[test]
    fn test_park_returns_immediately_with_work() {
        let shared = Shared::new(1);
        shared.park_current_thread(|| true);
        assert_eq!(shared.num_parked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unpark_one_wakes_parked_thread() {
        let shared = Arc::new(Shared::new(1));
        let barrier = Arc::new(Barrier::new(2));

        let handle = thread::spawn({
            let shared = Arc::clone(&shared);
            let barrier = Arc::clone(&barrier);
            move || {
                barrier.wait();
                shared.park_current_thread(|| false);
            }
        });

        barrier.wait();
        while shared.num_parked.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(shared.unpark_one_thread());
        handle.join().unwrap();
        assert!(!shared.unpark_one_thread());
    }

    #[test]
    fn test_shutdown_prevents_parking() {
        let shared = Shared::new(1);
        shared.shutdown.store(true, Ordering::Release);
        shared.park_current_thread(|| false);
        assert_eq!(shared.unpark_all_threads(), 0);
    }
}
