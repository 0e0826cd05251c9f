use crate::context;
use crate::task::state::SleepFlags;
use crate::task::{Task, TaskState, WakeupSource};
use futures::task::waker_ref;
use std::sync::Arc;
use std::task::{Context, Poll};

impl Task {
    /// Runs one step of the task: polls the body until it completes or
    /// returns `Pending`. Only called by a worker that popped the task off a
    /// ready queue.
    pub(crate) fn run(self: Arc<Self>) {
        if let Err(actual) = self.state.transition(TaskState::Queued, TaskState::Running) {
            panic!("task {} resumed in state {actual:?}", self.id());
        }

        let prev = self.sleep.resume();
        self.set_wakeup_source(WakeupSource::primary(prev.flags));

        if self.mark_started() && self.cancel.is_requested() && !self.is_critical() {
            tracing::debug!(
                task_id = %self.id(),
                reason = %self.cancel.reason(),
                "task cancelled before start"
            );
            self.future.lock().take();
            self.finish(TaskState::Cancelled);
            return;
        }

        let Some(mut slot) = self.future.try_lock() else {
            panic!("task {} resumed while already running", self.id());
        };

        let Some(future) = slot.as_mut() else {
            panic!("task {} resumed after completion", self.id());
        };

        let poll = {
            let waker = waker_ref(&self);
            let mut cx = Context::from_waker(&waker);
            let _guard = context::enter_task(&self);
            future.as_mut().poll(&mut cx)
        };

        match poll {
            Poll::Ready(()) => {
                slot.take();
                drop(slot);

                let state = if self.cancel.is_observed() {
                    TaskState::Cancelled
                } else {
                    TaskState::Completed
                };
                self.finish(state);
            }
            Poll::Pending => {
                drop(slot);
                self.suspend();
            }
        }
    }

    fn suspend(self: &Arc<Self>) {
        if let Err(actual) = self.state.transition(TaskState::Running, TaskState::Suspended) {
            panic!("task {} suspended from state {actual:?}", self.id());
        }

        let extra = if self.cancel.is_blocked() {
            SleepFlags::NON_CANCELLABLE
        } else {
            SleepFlags::empty()
        };

        // A wakeup delivered while the task was running found no SLEEPING
        // bit, so nobody rescheduled it. That's on us.
        let prev = self.sleep.suspend(extra);
        if (prev.flags | extra).has_wakeup() {
            self.schedule();
        }
    }

    fn finish(self: &Arc<Self>, state: TaskState) {
        debug_assert!(state.is_finished());

        if let Err(actual) = self.state.transition(TaskState::Running, state) {
            panic!("task {} finished from state {actual:?}", self.id());
        }

        tracing::trace!(task_id = %self.id(), ?state, "task finished");

        // Counters and registry first, a waiter may look at them as soon as
        // it is notified.
        self.scheduler.on_task_finished(self);
        self.notify_finished();
    }
}
