use crate::wait::Waiter;
use parking_lot::Mutex;
use std::mem;

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Registered(Waiter),
    Signaled,
}

/// Single-waiter rendezvous between one consumer and any number of wakers.
///
/// The slot is either empty, holds the registration of the one consumer, or
/// is signaled. The consumer never sleeps once the slot is signaled and a
/// registered consumer is handed out exactly once, so it cannot be woken
/// twice.
#[derive(Debug, Default)]
pub struct WakeSlot {
    state: Mutex<SlotState>,
}

impl WakeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the consumer. Returns `false` if the slot is already
    /// signaled and the consumer must not suspend.
    ///
    /// # Panics
    ///
    /// Panics if another waiter is registered.
    #[track_caller]
    pub fn try_register(&self, waiter: Waiter) -> bool {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Empty => {
                *state = SlotState::Registered(waiter);
                true
            }
            SlotState::Signaled => false,
            SlotState::Registered(prev) => {
                panic!(
                    "wake slot already has a registered waiter (task {})",
                    prev.task_id()
                );
            }
        }
    }

    /// Signals the slot and hands out the registered waiter, if any. The
    /// caller is expected to [`wake`](Waiter::wake) it. Signaling an already
    /// signaled slot returns `None`.
    pub fn wake(&self) -> Option<Waiter> {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, SlotState::Signaled) {
            SlotState::Registered(waiter) => Some(waiter),
            SlotState::Empty | SlotState::Signaled => None,
        }
    }

    /// Removes the registration of `waiter` unless a waker got to it first.
    /// Returns `true` if the registration was removed.
    pub fn cancel_if_unresolved(&self, waiter: &Waiter) -> bool {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Registered(registered) if registered.same_as(waiter) => {
                *state = SlotState::Empty;
                true
            }
            _ => false,
        }
    }

    /// Consumes a pending signal.
    pub fn take_signal(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Signaled) {
            *state = SlotState::Empty;
            true
        } else {
            false
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Signaled) {
            *state = SlotState::Empty;
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Signaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_register_after_signal_does_not_sleep() {
        let slot = WakeSlot::new();
        assert!(slot.wake().is_none());
        assert!(slot.is_signaled());

        assert!(!slot.try_register(Waiter::detached()));
        assert!(slot.take_signal());
        assert!(!slot.is_signaled());
        assert!(slot.try_register(Waiter::detached()));
    }

    #[test]
    #[should_panic(expected = "already has a registered waiter")]
    fn test_double_registration_panics() {
        let slot = WakeSlot::new();
        assert!(slot.try_register(Waiter::detached()));
        slot.try_register(Waiter::detached());
    }

    #[test]
    fn test_cancel_only_own_registration() {
        let slot = WakeSlot::new();
        let waiter = Waiter::detached();
        let other = Waiter::detached();

        assert!(slot.try_register(waiter.clone()));
        assert!(!slot.cancel_if_unresolved(&other));
        assert!(slot.cancel_if_unresolved(&waiter));
        assert!(!slot.cancel_if_unresolved(&waiter));

        // Waker lost the race, nothing to hand out.
        assert!(slot.wake().is_none());
    }

    #[test]
    fn test_cancel_after_wake_is_resolved() {
        let slot = WakeSlot::new();
        let waiter = Waiter::detached();
        assert!(slot.try_register(waiter.clone()));

        let woken = slot.wake().expect("registered waiter");
        assert!(woken.same_as(&waiter));
        assert!(!slot.cancel_if_unresolved(&waiter));
    }

    #[rstest]
    #[case::two(2)]
    #[case::sixteen(16)]
    fn test_concurrent_wake_hands_out_waiter_once(#[case] n: usize) {
        for _ in 0..100 {
            let slot = Arc::new(WakeSlot::new());
            assert!(slot.try_register(Waiter::detached()));

            let barrier = Arc::new(Barrier::new(n));
            let handed_out = Arc::new(AtomicUsize::new(0));

            let handles = (0..n)
                .map(|_| {
                    let slot = Arc::clone(&slot);
                    let barrier = Arc::clone(&barrier);
                    let handed_out = Arc::clone(&handed_out);
                    thread::spawn(move || {
                        barrier.wait();
                        if slot.wake().is_some() {
                            handed_out.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(handed_out.load(Ordering::Relaxed), 1);
            assert!(slot.is_signaled());
        }
    }
}
