use crate::runtime::Handle;
use crate::task::cancel::CancelState;
use crate::task::state::{AtomicTaskState, Epoch, SleepState, WakeupOutcome};
use crate::task::{CancellationReason, Id, TaskState, WakeupSource};
use crate::time::Deadline;
use crate::wait::WaitList;
use futures::future::BoxFuture;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// A spawned unit of work. Always lives behind an `Arc`.
///
/// Strong references are held by the processor registry, by the ready queue
/// the task currently sits in, by its [`TaskHandle`](crate::task::TaskHandle)
/// and by cancellation tokens. Wait lists and the deadline timer only hold
/// `Weak` references.
pub(crate) struct Task {
    id: Id,

    /// Exempt from admission control and from cancel-before-start.
    critical: bool,

    pub(super) state: AtomicTaskState,

    pub(crate) sleep: SleepState,

    /// Primary cause of the last resume, consumed by `wait::sleep`.
    wakeup_source: AtomicU8,

    pub(crate) cancel: CancelState,

    /// Task-level deadline, see `current::set_deadline`.
    deadline: Mutex<Deadline>,

    /// Guards against two `wait::sleep` futures being live in the same task.
    in_sleep: AtomicBool,

    started: AtomicBool,

    /// Type-erased body. `None` once the task reached a terminal state.
    pub(super) future: Mutex<Option<BoxFuture<'static, ()>>>,

    /// Set for every 4th scheduled task, feeds the wait-time overload sensor.
    enqueued_at: Mutex<Option<Instant>>,

    /// Tasks waiting for this one to finish.
    pub(crate) finish_waiters: WaitList,

    /// Latch for threads blocked in `TaskHandle::blocking_wait`.
    finished: Mutex<bool>,
    finished_cv: Condvar,

    pub(super) scheduler: Handle,
}

impl Task {
    pub(crate) fn new(future: BoxFuture<'static, ()>, critical: bool, scheduler: Handle) -> Self {
        Self {
            id: Id::next(),
            critical,
            state: AtomicTaskState::new(),
            sleep: SleepState::new(),
            wakeup_source: AtomicU8::new(WakeupSource::None as u8),
            cancel: CancelState::default(),
            deadline: Mutex::new(Deadline::unreachable()),
            in_sleep: AtomicBool::new(false),
            started: AtomicBool::new(false),
            future: Mutex::new(Some(future)),
            enqueued_at: Mutex::new(None),
            finish_waiters: WaitList::new(),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
            scheduler,
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.load()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub(crate) fn scheduler(&self) -> &Handle {
        &self.scheduler
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.sleep.load().epoch
    }

    pub(super) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub(super) fn set_wakeup_source(&self, source: WakeupSource) {
        self.wakeup_source.store(source as u8, Ordering::Release);
    }

    /// Returns the cause recorded at the last resume, at most once.
    pub(crate) fn take_wakeup_source(&self) -> WakeupSource {
        WakeupSource::from_u8(self.wakeup_source.swap(WakeupSource::None as u8, Ordering::AcqRel))
    }

    pub(crate) fn deadline(&self) -> Deadline {
        *self.deadline.lock()
    }

    pub(crate) fn set_deadline(&self, deadline: Deadline) {
        *self.deadline.lock() = deadline;
    }

    #[track_caller]
    pub(crate) fn enter_sleep(&self) {
        assert!(
            !self.in_sleep.swap(true, Ordering::AcqRel),
            "task {} is already suspended in another wait",
            self.id
        );
    }

    pub(crate) fn leave_sleep(&self) {
        self.in_sleep.store(false, Ordering::Release);
    }

    pub(crate) fn stamp_enqueued(&self, at: Option<Instant>) {
        *self.enqueued_at.lock() = at;
    }

    pub(crate) fn take_enqueued(&self) -> Option<Instant> {
        self.enqueued_at.lock().take()
    }

    /// Delivers a wakeup. Returns `false` if it was discarded (stale epoch,
    /// duplicate cause, cancellation while non-cancellable).
    ///
    /// The caller that delivers the first cause to a sleeping task pushes it
    /// on the ready queue; every other caller only records its cause.
    pub(crate) fn wakeup(self: &Arc<Self>, source: WakeupSource, epoch: Option<Epoch>) -> bool {
        match self.sleep.wakeup(source, epoch) {
            WakeupOutcome::Schedule => {
                tracing::trace!(task_id = %self.id, ?source, "waking task");
                self.schedule();
                true
            }
            WakeupOutcome::Accepted => true,
            WakeupOutcome::Rejected => false,
        }
    }

    /// First request wins, later ones are no-ops.
    pub(crate) fn request_cancel(self: &Arc<Self>, reason: CancellationReason) {
        if self.is_finished() || !self.cancel.request(reason) {
            return;
        }

        tracing::debug!(task_id = %self.id, %reason, "cancellation requested");
        self.wakeup(WakeupSource::CancelRequest, None);
    }

    /// Pushes a sleeping task back on a ready queue.
    #[track_caller]
    pub(crate) fn schedule(self: &Arc<Self>) {
        if let Err(actual) = self.state.transition(TaskState::Suspended, TaskState::Queued) {
            panic!("task {} scheduled from state {actual:?}", self.id);
        }

        self.scheduler.schedule(Arc::clone(self));
    }

    /// Pushes a freshly spawned task on a ready queue.
    #[track_caller]
    pub(crate) fn schedule_new(self: &Arc<Self>) {
        if let Err(actual) = self.state.transition(TaskState::New, TaskState::Queued) {
            panic!("new task {} scheduled from state {actual:?}", self.id);
        }

        self.scheduler.schedule(Arc::clone(self));
    }

    pub(super) fn notify_finished(&self) {
        self.finish_waiters.wakeup_all();

        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_cv.notify_all();
    }

    /// Blocks the calling OS thread until the task reaches a terminal state
    /// or `deadline` is reached. Returns `true` if finished.
    pub(crate) fn block_until_finished(&self, deadline: Deadline) -> bool {
        let mut finished = self.finished.lock();
        while !*finished {
            match deadline.instant() {
                Some(when) => {
                    if self.finished_cv.wait_until(&mut finished, when).timed_out() {
                        return *finished;
                    }
                }
                None => self.finished_cv.wait(&mut finished),
            }
        }
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("critical", &self.critical)
            .field("cancel", &self.cancel.reason())
            .finish()
    }
}

/// Queue-owned reference to a task in state `Queued`.
#[derive(Debug)]
pub(crate) struct Notified(pub(crate) Arc<Task>);

impl Notified {
    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.0
    }

    pub(crate) fn run(self) {
        self.0.run();
    }
}
