use std::pin::Pin;
use std::task::{Context, Poll};

/// Gives other ready tasks a chance to run. The current task goes to the back
/// of the ready queue of this worker.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[derive(Debug, Clone, Copy)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }

        // Records a wakeup while we are still running, the worker requeues
        // us as soon as we return `Pending`.
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::task::spawn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[weft::test(worker_threads = 1)]
    async fn test_yield_lets_other_tasks_run() {
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = spawn({
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        // Single worker: the spawned task can only run while we are yielded.
        while counter.load(Ordering::Relaxed) == 0 {
            yield_now().await;
        }

        handle.get().await.unwrap();
    }
}
