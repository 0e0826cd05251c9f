use crate::wait::Waiter;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::collections::VecDeque;

// Most wake-all batches are small. Past that we spill to the heap.
const SPILL_TO_HEAP_THRESHOLD: usize = 16;

/// FIFO queue of suspended tasks.
///
/// The lock is only ever held for the duration of a push, a removal or a
/// wake, never across a suspension.
#[derive(Debug, Default)]
pub struct WaitList {
    waiters: Mutex<VecDeque<Waiter>>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the list. Primitives use the guard to check their condition and
    /// register a waiter atomically with respect to wakers.
    pub fn lock(&self) -> WaitListGuard<'_> {
        WaitListGuard {
            waiters: self.waiters.lock(),
        }
    }

    /// Wakes the oldest waiter that accepts the wakeup.
    pub fn wakeup_one(&self) -> bool {
        self.lock().wakeup_one()
    }

    /// Wakes every waiter in FIFO order. Returns how many accepted.
    pub fn wakeup_all(&self) -> usize {
        self.lock().wakeup_all()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct WaitListGuard<'a> {
    waiters: MutexGuard<'a, VecDeque<Waiter>>,
}

impl WaitListGuard<'_> {
    pub fn push(&mut self, waiter: Waiter) {
        self.waiters.push_back(waiter);
    }

    /// Removes `waiter` if it is still queued. Returns `false` if a waker
    /// already popped it.
    pub fn remove(&mut self, waiter: &Waiter) -> bool {
        match self.waiters.iter().position(|w| w.same_as(waiter)) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Pops waiters until one accepts the wakeup. Waiters whose sleep is
    /// already over are dropped along the way so the wakeup is not lost.
    pub fn wakeup_one(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.wake() {
                return true;
            }
        }
        false
    }

    pub fn wakeup_all(mut self) -> usize {
        let waiters = self
            .waiters
            .drain(..)
            .collect::<SmallVec<[Waiter; SPILL_TO_HEAP_THRESHOLD]>>();

        drop(self);

        waiters.iter().filter(|w| w.wake()).count()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_only_queued() {
        let list = WaitList::new();
        let first = Waiter::detached();
        let second = Waiter::detached();

        {
            let mut guard = list.lock();
            guard.push(first.clone());
            guard.push(second.clone());
            assert_eq!(guard.len(), 2);

            assert!(guard.remove(&first));
            assert!(!guard.remove(&first));
        }

        assert_eq!(list.len(), 1);
        assert!(list.lock().remove(&second));
        assert!(list.is_empty());
    }

    #[test]
    fn test_stale_waiters_are_skipped() {
        let list = WaitList::new();
        {
            let mut guard = list.lock();
            for _ in 0..SPILL_TO_HEAP_THRESHOLD + 4 {
                guard.push(Waiter::detached());
            }
        }

        // Nobody accepts, the list is drained rather than stuck.
        assert!(!list.wakeup_one());
        assert!(list.is_empty());

        list.lock().push(Waiter::detached());
        assert_eq!(list.wakeup_all(), 0);
        assert!(list.is_empty());
    }
}
