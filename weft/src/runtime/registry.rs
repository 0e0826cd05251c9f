use crate::task::{CancellationReason, Id, Task};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// A collection of all alive tasks owned by a task processor. Every task holds
// three kinds of strong references:
//
// 1. TaskHandle :: owned by the awaiter of the task, claim to the result
// 2. Notified   :: owned by a ready queue, in and out of scope as the task
//                  suspends and resumes
// 3. Arc<Task>  :: owned by the processor <--- this is what we store here
//
// Keeping the last reference is what lets a detached, sleeping task survive
// until something wakes it, and what lets shutdown cancel everybody.
#[derive(Debug)]
pub(crate) struct OwnedTasks {
    tasks: DashMap<Id, Arc<Task>>,

    // Keep track of size separately because DashMap impl for len iterates over
    // all shards.
    size: AtomicUsize,

    // Closed once shutdown drained every task, no task can be added after.
    closed: AtomicBool,

    // Shutdown blocks here until the registry is empty.
    empty: Mutex<()>,
    empty_cv: Condvar,
}

impl OwnedTasks {
    pub(crate) fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            empty: Mutex::new(()),
            empty_cv: Condvar::new(),
        }
    }

    #[track_caller]
    pub(crate) fn insert(&self, task: &Arc<Task>) {
        assert!(
            !self.closed.load(Ordering::Acquire),
            "cannot spawn task {} on a task processor that is shut down",
            task.id()
        );

        if self.tasks.insert(task.id(), Arc::clone(task)).is_none() {
            self.size.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn remove(&self, task: &Task) -> Option<Arc<Task>> {
        let (_, task) = self.tasks.remove(&task.id())?;

        if self.size.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Synchronize with `wait_until_empty` checking the size.
            let _guard = self.empty.lock();
            self.empty_cv.notify_all();
        }

        Some(task)
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests cancellation of every alive task. Returns how many tasks were
    /// alive.
    pub(crate) fn cancel_all(&self, reason: CancellationReason) -> usize {
        // Collect first, `request_cancel` may schedule the task and we should
        // not hold a shard lock while doing so.
        let tasks = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();

        for task in &tasks {
            task.request_cancel(reason);
        }

        tasks.len()
    }

    pub(crate) fn wait_until_empty(&self) {
        let mut guard = self.empty.lock();
        while !self.is_empty() {
            self.empty_cv.wait(&mut guard);
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
