use crate::context::{self, Shared};
use crate::runtime::admission::{Admission, Counters};
use crate::runtime::pool::ThreadPool;
use crate::runtime::registry::OwnedTasks;
use crate::runtime::timer::{Timer, TimerKey};
use crate::runtime::ProcessorConfig;
use crate::task::state::Epoch;
use crate::task::{CancellationReason, Notified, Output, Task, TaskError, TaskFuture, TaskHandle, TaskState};
use anyhow::Result;
use crossbeam_deque::{Injector, Stealer, Worker as CbWorker};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// State shared by the workers, the timer thread and every task of one
/// processor.
pub(crate) struct Scheduler {
    pub(crate) cfg: ProcessorConfig,

    /// Global injector queue. Tasks scheduled from outside of the worker pool
    /// land here.
    pub(crate) injector: Injector<Notified>,

    /// One stealer per worker local queue, indexed by worker.
    pub(crate) stealers: Vec<Stealer<Notified>>,

    pub(crate) shared: Shared,

    pub(crate) tasks: OwnedTasks,

    pub(crate) admission: Admission,

    timer: Arc<Timer>,

    /// Set at the beginning of the shutdown sequence. Tasks scheduled from
    /// then on are cancelled.
    shutting_down: AtomicBool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.cfg.name)
            .field("workers", &self.cfg.worker_threads)
            .field("alive", &self.tasks.len())
            .field("queued", &self.admission.queue_len())
            .finish()
    }
}

/// Cheap handle to a running processor.
#[derive(Debug, Clone)]
pub(crate) struct Handle(Arc<Scheduler>);

impl Deref for Handle {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Handle {
    pub(crate) fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[track_caller]
    pub(crate) fn spawn<F>(&self, future: F, critical: bool) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let output: Output<F::Output> = Arc::new(Mutex::new(None));
        let future = Box::pin(TaskFuture::new(future, Arc::clone(&output)));
        let task = Arc::new(Task::new(future, critical, self.clone()));

        self.tasks.insert(&task);
        Counters::bump(&self.admission.counters.created);

        tracing::trace!(
            task_id = %task.id(),
            processor = %self.cfg.name,
            critical,
            "spawning task"
        );

        task.schedule_new();
        TaskHandle::new(task, output)
    }

    /// Pushes a task that just moved to `Queued` on a ready queue.
    ///
    /// From one of our own workers the task goes to that worker's local
    /// queue, from anywhere else to the global injector.
    pub(crate) fn schedule(&self, task: Arc<Task>) {
        if self.shutting_down.load(Ordering::Acquire) {
            task.request_cancel(CancellationReason::Shutdown);
        }

        self.admission.on_schedule(&task);

        let mut notified = Some(Notified(task));
        context::with_context(|ctx| {
            if ctx.handle.ptr_eq(self)
                && let Some(notified) = notified.take()
            {
                ctx.local.push(notified);
            }
        });

        if let Some(notified) = notified {
            self.injector.push(notified);
        }

        self.shared.unpark_one_thread();
    }

    pub(crate) fn on_task_finished(&self, task: &Arc<Task>) {
        Counters::bump(&self.admission.counters.finished);
        if task.state() == TaskState::Cancelled {
            Counters::bump(&self.admission.counters.cancelled);
        }

        self.tasks.remove(task);
    }

    pub(crate) fn arm_timer(&self, when: Instant, task: &Arc<Task>, epoch: Epoch) -> TimerKey {
        self.timer.arm(when, task, epoch)
    }

    pub(crate) fn disarm_timer(&self, key: TimerKey) {
        self.timer.disarm(key);
    }

    #[cfg(test)]
    pub(crate) fn armed_timers(&self) -> usize {
        self.timer.len()
    }
}

/// Snapshot of the counters of a [`TaskProcessor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Tasks spawned so far.
    pub created: u64,

    /// Tasks that reached a terminal state, cancelled ones included.
    pub finished: u64,

    pub cancelled: u64,

    /// Tasks that hit a queue length or queue wait time limit, whatever the
    /// [`OverloadAction`](crate::runtime::OverloadAction).
    pub overloaded: u64,

    /// Tasks cancelled with
    /// [`CancellationReason::Overload`](crate::task::CancellationReason::Overload).
    pub cancelled_by_overload: u64,

    /// Sampled queue wait times at or above the sensor limit.
    pub wait_time_sensor_hits: u64,

    /// Task steps run by the workers.
    pub task_switches: u64,

    /// Tasks currently sitting in a ready queue.
    pub queue_len: usize,

    /// Tasks spawned and not finished yet.
    pub alive: usize,
}

/// A pool of worker threads running tasks, built by
/// [`Builder`](crate::runtime::Builder).
///
/// Dropping the processor runs [`shutdown`](TaskProcessor::shutdown).
///
/// ```no_run
/// use weft::runtime::Builder;
///
/// let processor = Builder::new().worker_threads(2).try_build().unwrap();
/// let handle = processor.spawn(async { 40 + 2 });
/// assert_eq!(handle.blocking_get().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct TaskProcessor {
    handle: Handle,
    pool: ThreadPool,
    shut_down: bool,
}

impl TaskProcessor {
    pub(crate) fn start(cfg: ProcessorConfig) -> Result<Self> {
        let locals = (0..cfg.worker_threads)
            .map(|_| CbWorker::new_fifo())
            .collect::<Vec<CbWorker<Notified>>>();
        let stealers = locals.iter().map(CbWorker::stealer).collect();

        let timer = Arc::new(Timer::default());
        let handle = Handle(Arc::new(Scheduler {
            shared: Shared::new(cfg.worker_threads),
            admission: Admission::new(&cfg),
            injector: Injector::new(),
            stealers,
            tasks: OwnedTasks::new(),
            timer: Arc::clone(&timer),
            shutting_down: AtomicBool::new(false),
            cfg,
        }));

        timer.start(format!("{}_timer", handle.cfg.name))?;

        let pool = match ThreadPool::spawn(&handle, locals) {
            Ok(pool) => pool,
            Err(e) => {
                // Threads that did start only need to see the shutdown flag.
                handle.shared.shutdown.store(true, Ordering::Release);
                handle.shared.unpark_all_threads();
                let _ = timer.stop();
                return Err(e);
            }
        };

        tracing::info!(
            processor = %handle.cfg.name,
            workers = handle.cfg.worker_threads,
            "task processor started"
        );

        Ok(Self {
            handle,
            pool,
            shut_down: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.handle.cfg.name
    }

    /// Number of worker threads.
    pub fn worker_threads(&self) -> usize {
        self.handle.cfg.worker_threads
    }

    /// Spawns a task from any thread. See [`crate::spawn`].
    #[track_caller]
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future, false)
    }

    /// Spawns a task that is exempt from admission control. See
    /// [`crate::spawn_critical`].
    #[track_caller]
    pub fn spawn_critical<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future, true)
    }

    /// Runs `future` as a critical task and blocks the calling thread until it
    /// finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from a worker thread, blocking it would starve the
    /// tasks queued behind.
    #[track_caller]
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, TaskError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        assert!(
            !context::is_worker_thread(),
            "`block_on` cannot be called from a worker thread"
        );

        self.spawn_critical(future).blocking_get()
    }

    pub fn stats(&self) -> ProcessorStats {
        let counters = &self.handle.admission.counters;
        let load = |c: &std::sync::atomic::AtomicU64| c.load(Ordering::Relaxed);

        ProcessorStats {
            created: load(&counters.created),
            finished: load(&counters.finished),
            cancelled: load(&counters.cancelled),
            overloaded: load(&counters.overloaded),
            cancelled_by_overload: load(&counters.cancelled_by_overload),
            wait_time_sensor_hits: load(&counters.wait_time_sensor_hits),
            task_switches: load(&counters.task_switches),
            queue_len: self.handle.admission.queue_len(),
            alive: self.handle.tasks.len(),
        }
    }

    /// Cancels every alive task with
    /// [`CancellationReason::Shutdown`], waits for all of them to finish,
    /// then stops the worker and timer threads.
    ///
    /// Tasks that ignore cancellation keep the shutdown waiting.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.shut_down, true) {
            return Ok(());
        }

        let own_worker = context::with_context(|ctx| ctx.handle.ptr_eq(&self.handle));
        assert!(
            own_worker != Some(true),
            "task processor {} shut down from one of its own tasks",
            self.handle.cfg.name
        );

        let handle = &self.handle;
        handle.shutting_down.store(true, Ordering::Release);

        let alive = handle.tasks.cancel_all(CancellationReason::Shutdown);
        tracing::debug!(processor = %handle.cfg.name, alive, "shutting down task processor");

        handle.tasks.wait_until_empty();
        handle.tasks.close();

        handle.shared.shutdown.store(true, Ordering::Release);
        handle.shared.unpark_all_threads();

        let workers = self.pool.join_all();
        let timer = handle.timer.stop();

        tracing::info!(processor = %handle.cfg.name, "task processor stopped");
        workers.and(timer)
    }
}

impl Drop for TaskProcessor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            tracing::error!(processor = %self.handle.cfg.name, error = %e, "task processor shutdown failed");
        }
    }
}
