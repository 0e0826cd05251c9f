//! Admission control.
//!
//! Two independent triggers put the processor in overload:
//!
//! - the ready queue length, checked whenever a task is scheduled;
//! - the time a sampled task spent in the ready queue, checked on dequeue.
//!   Every [`SAMPLE_EVERY`]th scheduled task is stamped with its enqueue time.
//!   Once a sample reaches the limit every dequeued task is overloaded until a
//!   later sample comes in under it.
//!
//! Critical tasks are exempt from both.
use crate::runtime::{OverloadAction, ProcessorConfig};
use crate::task::{CancellationReason, Task};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const SAMPLE_EVERY: u64 = 4;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) created: AtomicU64,
    pub(crate) finished: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) overloaded: AtomicU64,
    pub(crate) cancelled_by_overload: AtomicU64,
    pub(crate) wait_time_sensor_hits: AtomicU64,
    pub(crate) task_switches: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub(crate) struct Admission {
    queue_length_limit: Option<usize>,
    queue_wait_time_limit: Option<Duration>,
    sensor_wait_time_limit: Option<Duration>,
    action: OverloadAction,

    /// Tasks currently sitting in any ready queue of the processor.
    queued: AtomicUsize,

    scheduled: AtomicU64,

    /// Result of the last wait-time sample.
    wait_time_overloaded: AtomicBool,

    pub(crate) counters: Counters,
}

impl Admission {
    pub(crate) fn new(cfg: &ProcessorConfig) -> Self {
        Self {
            queue_length_limit: cfg.queue_length_limit,
            queue_wait_time_limit: cfg.queue_wait_time_limit,
            sensor_wait_time_limit: cfg.sensor_wait_time_limit,
            action: cfg.overload_action,
            queued: AtomicUsize::new(0),
            scheduled: AtomicU64::new(0),
            wait_time_overloaded: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn samples_wait_time(&self) -> bool {
        self.queue_wait_time_limit.is_some() || self.sensor_wait_time_limit.is_some()
    }

    /// Called right before `task` is pushed on a ready queue.
    pub(crate) fn on_schedule(&self, task: &Arc<Task>) {
        let queued = self.queued.fetch_add(1, Ordering::AcqRel);

        if self
            .queue_length_limit
            .is_some_and(|limit| queued >= limit)
        {
            self.handle_overload(task);
        }

        if self.samples_wait_time() {
            let nth = self.scheduled.fetch_add(1, Ordering::Relaxed);
            let stamp = nth.is_multiple_of(SAMPLE_EVERY).then(Instant::now);
            task.stamp_enqueued(stamp);
        }
    }

    /// Called by the worker once `task` left the ready queue, before it runs.
    pub(crate) fn on_dequeue(&self, task: &Arc<Task>) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Counters::bump(&self.counters.task_switches);

        if let Some(enqueued_at) = task.take_enqueued() {
            let waited = enqueued_at.elapsed();

            if self
                .sensor_wait_time_limit
                .is_some_and(|limit| waited >= limit)
            {
                Counters::bump(&self.counters.wait_time_sensor_hits);
            }

            if let Some(limit) = self.queue_wait_time_limit {
                let overloaded = waited >= limit;
                let was = self.wait_time_overloaded.swap(overloaded, Ordering::AcqRel);
                if overloaded != was {
                    tracing::warn!(
                        waited_us = waited.as_micros() as u64,
                        limit_us = limit.as_micros() as u64,
                        overloaded,
                        "ready queue wait time overload changed"
                    );
                }
            }
        }

        if self.wait_time_overloaded.load(Ordering::Acquire) {
            self.handle_overload(task);
        }
    }

    fn handle_overload(&self, task: &Arc<Task>) {
        if task.is_critical() {
            return;
        }

        Counters::bump(&self.counters.overloaded);

        match self.action {
            OverloadAction::Ignore => {}
            OverloadAction::Cancel => {
                let already_requested = task.cancel.is_requested();
                task.request_cancel(CancellationReason::Overload);
                if !already_requested && task.cancel.reason() == CancellationReason::Overload {
                    Counters::bump(&self.counters.cancelled_by_overload);
                }
            }
        }
    }
}
