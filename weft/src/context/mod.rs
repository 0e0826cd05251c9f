use crate::runtime::Handle;
use crate::task::{Notified, Task};
use crossbeam_deque::Worker as CbWorker;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread_local;

mod shared;
pub(crate) use shared::Shared;

/// Per worker thread state. Lives as long as the worker loop.
pub(crate) struct Context {
    pub(crate) handle: Handle,

    /// Worker-local FIFO ready queue. Tasks scheduled from this thread for
    /// this processor land here, peers steal from its `Stealer`.
    pub(crate) local: CbWorker<Notified>,

    current_task: RefCell<Option<Arc<Task>>>,
}

impl Context {
    pub(crate) fn new(handle: Handle, local: CbWorker<Notified>) -> Self {
        Self {
            handle,
            local,
            current_task: RefCell::new(None),
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Installs `ctx` for the current thread until the guard is dropped.
#[track_caller]
pub(crate) fn enter(ctx: Context) -> ContextGuard {
    CONTEXT.with(|cell| {
        let mut cell = cell.borrow_mut();
        assert!(cell.is_none(), "worker context already initialized");
        *cell = Some(ctx);
    });

    ContextGuard { _p: () }
}

pub(crate) struct ContextGuard {
    _p: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let ctx = CONTEXT.with(|cell| cell.borrow_mut().take());
        // Dropped outside of the borrow, the local queue may still hold tasks
        // whose drop glue touches the context.
        drop(ctx);
    }
}

/// Runs `f` with the context of the current thread, `None` if the thread is
/// not a worker.
#[inline(always)]
pub(crate) fn with_context<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Context) -> R,
{
    CONTEXT.with(|cell| cell.borrow().as_ref().map(f))
}

pub(crate) fn is_worker_thread() -> bool {
    with_context(|_| ()).is_some()
}

pub(crate) fn current_handle() -> Option<Handle> {
    with_context(|ctx| ctx.handle.clone())
}

pub(crate) fn current_task() -> Option<Arc<Task>> {
    with_context(|ctx| ctx.current_task.borrow().clone()).flatten()
}

/// Makes `task` the current task while polling it.
pub(crate) fn enter_task(task: &Arc<Task>) -> TaskGuard {
    let prev = with_context(|ctx| ctx.current_task.replace(Some(Arc::clone(task))))
        .expect("tasks are only polled on worker threads");

    TaskGuard { prev }
}

pub(crate) struct TaskGuard {
    prev: Option<Arc<Task>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        with_context(|ctx| ctx.current_task.replace(prev));
    }
}
