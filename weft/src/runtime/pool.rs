use crate::context::{self, Context};
use crate::runtime::Handle;
use crate::runtime::worker::Worker;
use crate::task::Notified;
use anyhow::{Context as _, Result, anyhow};
use crossbeam_deque::Worker as CbWorker;
use parking_lot::Mutex;
use std::thread;

/// The worker threads of a task processor.
#[derive(Debug)]
pub(crate) struct ThreadPool {
    handles: Mutex<Vec<(String, thread::JoinHandle<()>)>>,
}

impl ThreadPool {
    /// Starts one thread per local queue. On failure the threads that did
    /// start are left running, the caller is expected to flip the shutdown
    /// flag.
    pub(crate) fn spawn(handle: &Handle, locals: Vec<CbWorker<Notified>>) -> Result<Self> {
        let mut handles = Vec::with_capacity(locals.len());

        for (index, local) in locals.into_iter().enumerate() {
            // Give each worker a list of all *other* workers' stealers.
            let stealers = handle
                .stealers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != index)
                .map(|(_, s)| s.clone())
                .collect::<Vec<_>>();

            let name = (handle.cfg.thread_name.0)(index);
            let worker = Worker::new(index, &handle.cfg, stealers);
            let join = spawn_worker_thread(handle.clone(), name.clone(), worker, local)?;
            handles.push((name, join));
        }

        Ok(Self {
            handles: Mutex::new(handles),
        })
    }

    pub(crate) fn join_all(&self) -> Result<()> {
        let mut handles = self.handles.lock();

        let errors = handles
            .drain(..)
            .filter_map(|(name, handle)| handle.join().err().map(|_| name))
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} worker thread(s) panicked: {}",
                errors.len(),
                errors.join(", ")
            ))
        }
    }
}

fn spawn_worker_thread(
    handle: Handle,
    name: String,
    mut worker: Worker,
    local: CbWorker<Notified>,
) -> Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(name.clone());

    if let Some(stack_size) = handle.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            let index = worker.index();
            let _guard = context::enter(Context::new(handle, local));

            context::with_context(|ctx| worker.run(ctx));
            tracing::trace!(worker = index, "worker thread exiting");
        })
        .with_context(|| format!("failed to spawn worker thread {name}"))
}
