//! Deadline timer shared by all workers of a task processor.
//!
//! Sleeping tasks never block their worker, so suspensions with a deadline
//! register an entry here. A dedicated thread waits on a condvar for the
//! earliest entry and delivers a [`WakeupSource::Deadline`] wakeup bound to
//! the epoch of the suspension. A suspension that ends some other way disarms
//! its entry with the [`TimerKey`] it got when arming.
use crate::task::state::Epoch;
use crate::task::{Task, WakeupSource};
use anyhow::{Context as _, Result};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Identifies an armed entry. Ordered by firing instant, then arming order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    when: Instant,
    seq: u64,
}

struct TimerEntry {
    task: Weak<Task>,
    epoch: Epoch,
}

#[derive(Default)]
struct TimerState {
    entries: BTreeMap<TimerKey, TimerEntry>,
    next_seq: u64,
}

#[derive(Default)]
pub(crate) struct Timer {
    state: Mutex<TimerState>,
    notify: Condvar,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("armed", &self.len())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Timer {
    pub(crate) fn start(self: &Arc<Self>, name: String) -> Result<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || timer.run())
            .with_context(|| format!("failed to spawn timer thread {name}"))?;

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Delivers a deadline wakeup to `task` at `when`, provided it is still in
    /// the suspension identified by `epoch`.
    pub(crate) fn arm(&self, when: Instant, task: &Arc<Task>, epoch: Epoch) -> TimerKey {
        let (key, earliest) = self.insert(when, Arc::downgrade(task), epoch);

        // The timer thread only needs to recompute its timeout if the new
        // entry fires before everything else.
        if earliest {
            self.notify.notify_one();
        }
        key
    }

    fn insert(&self, when: Instant, task: Weak<Task>, epoch: Epoch) -> (TimerKey, bool) {
        let mut state = self.state.lock();

        let key = TimerKey {
            when,
            seq: state.next_seq,
        };
        state.next_seq += 1;

        let earliest = state.entries.first_key_value().is_none_or(|(head, _)| key < *head);
        state.entries.insert(key, TimerEntry { task, epoch });
        (key, earliest)
    }

    /// Removes an entry that has not fired yet. Returns `false` if it already
    /// fired or was disarmed. The timer thread is not notified, at worst it
    /// wakes up once for nothing.
    pub(crate) fn disarm(&self, key: TimerKey) -> bool {
        self.state.lock().entries.remove(&key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub(crate) fn stop(&self) -> Result<()> {
        {
            let _state = self.state.lock();
            self.shutdown.store(true, Ordering::Release);
            self.notify.notify_one();
        }

        match self.thread.lock().take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("timer thread panicked")),
            None => Ok(()),
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();

        loop {
            // Checked under the lock, `stop` flips the flag while holding it.
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = Instant::now();
            let mut expired = SmallVec::<[TimerEntry; 16]>::new();
            while state
                .entries
                .first_key_value()
                .is_some_and(|(head, _)| head.when <= now)
            {
                if let Some((_, entry)) = state.entries.pop_first() {
                    expired.push(entry);
                }
            }

            if !expired.is_empty() {
                // Waking may push on the injector and unpark a worker, keep
                // that out of the critical section.
                drop(state);
                for entry in expired {
                    if let Some(task) = entry.task.upgrade() {
                        task.wakeup(WakeupSource::Deadline, Some(entry.epoch));
                    }
                }
                state = self.state.lock();
                continue;
            }

            match state.entries.first_key_value().map(|(head, _)| head.when) {
                Some(when) => {
                    self.notify.wait_until(&mut state, when);
                }
                None => self.notify.wait(&mut state),
            }
        }

        tracing::trace!(pending = state.entries.len(), "timer thread stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(Timer: Send, Sync);

    #[test]
    fn test_entries_fire_earliest_first() {
        let timer = Timer::default();
        let now = Instant::now();

        let keys = [30, 10, 20, 10].map(|offset| {
            let when = now + Duration::from_millis(offset);
            timer.insert(when, Weak::new(), Epoch::default()).0
        });

        let mut state = timer.state.lock();
        let order = std::iter::from_fn(|| state.entries.pop_first().map(|(key, _)| key))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![keys[1], keys[3], keys[2], keys[0]]);
    }

    #[test]
    fn test_insert_reports_new_head() {
        let timer = Timer::default();
        let now = Instant::now();

        assert!(timer.insert(now + Duration::from_millis(20), Weak::new(), Epoch::default()).1);
        assert!(!timer.insert(now + Duration::from_millis(30), Weak::new(), Epoch::default()).1);
        assert!(timer.insert(now + Duration::from_millis(10), Weak::new(), Epoch::default()).1);
    }

    #[test]
    fn test_disarm_removes_entry_once() {
        let timer = Timer::default();
        let when = Instant::now() + Duration::from_secs(3600);

        let (key, _) = timer.insert(when, Weak::new(), Epoch::default());
        let (other, _) = timer.insert(when, Weak::new(), Epoch::default());
        assert_ne!(key, other);
        assert_eq!(timer.len(), 2);

        assert!(timer.disarm(key));
        assert!(!timer.disarm(key));
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn test_stop_joins_thread() -> Result<()> {
        let timer = Arc::new(Timer::default());
        timer.start("weft_timer_test".to_owned())?;
        timer.stop()?;
        assert!(timer.thread.lock().is_none());
        Ok(())
    }
}
