use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier of a task. Never reused.
///
/// Ids grow with each spawn on one thread, there is no ordering between
/// threads. Available as [`current::id`](crate::task::current::id) inside the
/// task and [`TaskHandle::id`](crate::task::TaskHandle::id) outside.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

impl Id {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        // A u64 does not wrap in the lifetime of a process; zero is reserved
        // for "unlocked" in `sync::Mutex`.
        match NonZeroU64::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)) {
            Some(id) => Id(id),
            None => panic!("task id space exhausted"),
        }
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_unique_across_threads() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 1_000;

        let spawners = (0..THREADS)
            .map(|_| thread::spawn(|| (0..PER_THREAD).map(|_| Id::next()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();

        let ids = spawners
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect::<HashSet<_>>();

        assert_eq!(ids.len(), THREADS * PER_THREAD);
        assert!(ids.iter().all(|id| id.as_u64() != 0));
    }
}
