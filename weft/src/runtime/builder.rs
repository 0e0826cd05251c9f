use crate::runtime::TaskProcessor;
use anyhow::{Result, anyhow};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Worker ticks between two forced looks at the global injector.
const GLOBAL_QUEUE_INTERVAL: u32 = 31;

const MAX_STEAL_RETRIES: usize = 3;

const DEFAULT_NAME: &str = "weft";

/// What admission control does with a task once the processor is overloaded.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadAction {
    /// Non-critical tasks are cancelled with
    /// [`CancellationReason::Overload`](crate::task::CancellationReason::Overload).
    /// Tasks that did not start yet never run and report
    /// [`TaskError::Overloaded`](crate::task::TaskError::Overloaded).
    #[default]
    Cancel,

    /// Overload is only counted in [`ProcessorStats`](crate::runtime::ProcessorStats).
    Ignore,
}

/// Generates the name of the worker thread with the given index.
#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    fn prefixed(prefix: String) -> Self {
        ThreadNameFn(Arc::new(move |idx| format!("{prefix}_{idx}")))
    }
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ThreadNameFn(..)")
    }
}

/// Configures and builds a [`TaskProcessor`].
///
/// ```no_run
/// use weft::runtime::{Builder, OverloadAction};
/// use std::time::Duration;
///
/// let processor = Builder::new()
///     .name("main")
///     .worker_threads(4)
///     .queue_length_limit(10_000)
///     .queue_wait_time_limit(Duration::from_millis(50))
///     .overload_action(OverloadAction::Cancel)
///     .try_build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct Builder {
    /// `None` picks the available parallelism.
    worker_threads: Option<usize>,

    name: String,

    thread_name: Option<ThreadNameFn>,

    thread_stack_size: Option<usize>,

    /// Ready queue length at which new non-critical tasks trigger the
    /// overload action.
    queue_length_limit: Option<usize>,

    /// Sampled ready queue wait time at which dequeued tasks trigger the
    /// overload action.
    queue_wait_time_limit: Option<Duration>,

    /// Sampled ready queue wait time above which the sensor counter is bumped.
    /// Never cancels anything.
    sensor_wait_time_limit: Option<Duration>,

    overload_action: OverloadAction,

    global_queue_interval: u32,

    max_steal_retries: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            name: DEFAULT_NAME.to_owned(),
            thread_name: None,
            thread_stack_size: None,
            queue_length_limit: None,
            queue_wait_time_limit: None,
            sensor_wait_time_limit: None,
            overload_action: OverloadAction::default(),
            global_queue_interval: GLOBAL_QUEUE_INTERVAL,
            max_steal_retries: MAX_STEAL_RETRIES,
        }
    }

    /// Size of the worker pool. Defaults to the available parallelism of the
    /// machine.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the task processor name. Worker threads are named `{name}_{N}`
    /// unless [`thread_name_fn`](Builder::thread_name_fn) is used.
    ///
    /// The default name is "weft".
    #[track_caller]
    pub fn name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        assert!(!val.is_empty(), "name must not be empty");
        self.name = val;
        self
    }

    /// Names worker `idx` with `f(idx)` instead of `{name}_{idx}`.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = Some(ThreadNameFn(Arc::new(f)));
        self
    }

    /// Worker thread stack size in bytes, passed to
    /// [`std::thread::Builder::stack_size`].
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(val > 0, "thread_stack_size must be greater than 0");
        self.thread_stack_size = Some(val);
        self
    }

    /// Once the ready queue holds `val` tasks, every new non-critical task
    /// gets the [`OverloadAction`].
    #[track_caller]
    pub fn queue_length_limit(mut self, val: usize) -> Self {
        assert!(val > 0, "queue_length_limit must be greater than 0");
        self.queue_length_limit = Some(val);
        self
    }

    /// Once a sampled task waited at least `val` in the ready queue, every
    /// dequeued task gets the [`OverloadAction`] until a sample comes in under
    /// the limit again.
    #[track_caller]
    pub fn queue_wait_time_limit(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "queue_wait_time_limit must be greater than 0");
        self.queue_wait_time_limit = Some(val);
        self
    }

    /// Sampled wait times at or above `val` are counted in
    /// [`ProcessorStats::wait_time_sensor_hits`](crate::runtime::ProcessorStats).
    #[track_caller]
    pub fn sensor_wait_time_limit(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "sensor_wait_time_limit must be greater than 0");
        self.sensor_wait_time_limit = Some(val);
        self
    }

    pub fn overload_action(mut self, val: OverloadAction) -> Self {
        self.overload_action = val;
        self
    }

    /// Every `val` loop iterations a worker looks at the global injector before
    /// its local queue, so that tasks pushed from outside the pool are not
    /// starved by a busy local queue. Defaults to 31.
    #[track_caller]
    pub fn global_queue_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "global_queue_interval must be greater than 0");
        self.global_queue_interval = val;
        self
    }

    /// Rounds over the injector and the peer queues an idle worker makes before
    /// parking. Defaults to 3.
    #[track_caller]
    pub fn max_steal_retries(mut self, val: usize) -> Self {
        assert!(val > 0, "max_steal_retries must be greater than 0");
        self.max_steal_retries = val;
        self
    }

    /// Creates the configured [`TaskProcessor`] and starts its threads.
    pub fn try_build(self) -> Result<TaskProcessor> {
        let cfg = ProcessorConfig::try_from(self)?;
        TaskProcessor::start(cfg)
    }
}

/// Validated [`Builder`] settings, shared by the processor, its workers and
/// admission control.
#[derive(Debug, Clone)]
pub(crate) struct ProcessorConfig {
    pub(crate) name: String,
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) queue_length_limit: Option<usize>,
    pub(crate) queue_wait_time_limit: Option<Duration>,
    pub(crate) sensor_wait_time_limit: Option<Duration>,
    pub(crate) overload_action: OverloadAction,
    pub(crate) global_queue_interval: u32,
    pub(crate) max_steal_retries: usize,
}

impl TryFrom<Builder> for ProcessorConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()
                .map_err(|e| anyhow!("failed to detect available parallelism: {e}"))?
                .get(),
        };

        if builder.name.contains('\0') {
            return Err(anyhow!("task processor name contains a NUL byte"));
        }

        let thread_name = builder
            .thread_name
            .unwrap_or_else(|| ThreadNameFn::prefixed(builder.name.clone()));

        Ok(ProcessorConfig {
            name: builder.name,
            worker_threads,
            thread_name,
            thread_stack_size: builder.thread_stack_size,
            queue_length_limit: builder.queue_length_limit,
            queue_wait_time_limit: builder.queue_wait_time_limit,
            sensor_wait_time_limit: builder.sensor_wait_time_limit,
            overload_action: builder.overload_action,
            global_queue_interval: builder.global_queue_interval,
            max_steal_retries: builder.max_steal_retries,
        })
    }
}
