use super::*;
use crate as weft;
use crate::task::{CancellationReason, TaskError, TaskState, current};
use crate::time::{sleep_for, yield_now};
use anyhow::Result;
use pin_project::pin_project;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

assert_impl_all!(TaskProcessor: Send, Sync);
assert_impl_all!(Handle: Send, Sync, Clone);

/// Counts how many times the wrapped future gets polled.
#[pin_project]
struct PollCounter<F> {
    #[pin]
    inner: F,
    polls: Arc<AtomicUsize>,
}

impl<F: Future> Future for PollCounter<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.polls.fetch_add(1, Ordering::SeqCst);
        this.inner.poll(cx)
    }
}

fn wait_for_state<T>(handle: &crate::task::TaskHandle<T>, state: TaskState) {
    let start = Instant::now();
    while handle.state() != state {
        assert!(start.elapsed() < Duration::from_secs(5), "task never reached {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_worker_threads_are_named() -> Result<()> {
    let processor = Builder::new().name("proc").worker_threads(3).try_build()?;

    let names = (0..32)
        .map(|_| processor.spawn(async { thread::current().name().map(str::to_owned) }))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.blocking_get())
        .collect::<Result<Vec<_>, _>>()?;

    for name in names {
        let name = name.expect("worker threads are named");
        let (prefix, index) = name.rsplit_once('_').expect("name has an index");
        assert_eq!(prefix, "proc");
        assert!(index.parse::<usize>()? < 3);
    }

    processor.shutdown()
}

#[test]
fn test_block_on_returns_output() -> Result<()> {
    let processor = Builder::new().worker_threads(2).try_build()?;
    assert_eq!(processor.name(), "weft");
    assert_eq!(processor.worker_threads(), 2);

    let res = processor.block_on(async {
        assert!(current::is_critical());
        let handle = weft::spawn(async { 20 });
        handle.get().await.map(|v| v + 22)
    })?;

    assert_eq!(res, Ok(42));
    Ok(())
}

#[test]
fn test_block_on_reports_panic() -> Result<()> {
    fn explode() -> u32 {
        panic!("boom")
    }

    let processor = Builder::new().worker_threads(1).try_build()?;
    let res = processor.block_on(async { explode() });

    assert_eq!(res, Err(TaskError::Panicked("boom".to_owned())));
    Ok(())
}

#[test]
#[should_panic(expected = "outside of a weft task processor")]
fn test_spawn_outside_processor_panics() {
    let _ = weft::spawn(async {});
}

#[rstest]
#[case::single_worker(1)]
#[case::many_workers(4)]
fn test_every_task_finishes_exactly_once(#[case] workers: usize) -> Result<()> {
    let processor = Builder::new().worker_threads(workers).try_build()?;
    let runs = Arc::new(AtomicUsize::new(0));

    let handles = (0..500)
        .map(|i| {
            let runs = Arc::clone(&runs);
            processor.spawn(async move {
                if i % 3 == 0 {
                    yield_now().await;
                }
                runs.fetch_add(1, Ordering::SeqCst);
                i
            })
        })
        .collect::<Vec<_>>();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.blocking_get()?, i);
    }

    assert_eq!(runs.load(Ordering::SeqCst), 500);

    let stats = processor.stats();
    assert_eq!(stats.created, 500);
    assert_eq!(stats.finished, 500);
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.alive, 0);
    assert_eq!(stats.queue_len, 0);
    assert!(stats.task_switches >= 500);

    processor.shutdown()
}

#[test]
fn test_idle_workers_steal() -> Result<()> {
    let processor = Builder::new().worker_threads(4).try_build()?;

    let threads = processor.block_on(async {
        let handles = (0..64)
            .map(|_| {
                weft::spawn(async {
                    // Hog the worker so that peers have to steal.
                    thread::sleep(Duration::from_millis(2));
                    thread::current().id()
                })
            })
            .collect::<Vec<_>>();

        let mut threads = HashSet::new();
        for handle in handles {
            threads.insert(handle.get().await.expect("task completes"));
        }
        threads
    })?;

    assert!(threads.len() > 1, "all tasks ran on a single worker");
    Ok(())
}

#[weft::test(worker_threads = 1)]
async fn test_cancel_before_start_skips_body() {
    let ran = Arc::new(AtomicBool::new(false));

    // Single worker busy running us, the task can't start before we cancel it.
    let handle = weft::spawn({
        let ran = Arc::clone(&ran);
        async move { ran.store(true, Ordering::SeqCst) }
    });
    handle.cancel();

    assert_eq!(handle.get().await, Err(TaskError::Cancelled(CancellationReason::UserRequest)));
    assert!(!ran.load(Ordering::SeqCst));
}

#[weft::test(worker_threads = 1)]
async fn test_critical_task_runs_despite_cancel() {
    let handle = weft::spawn_critical(async { current::cancellation_reason() });
    handle.cancel();

    assert_eq!(handle.get().await, Ok(CancellationReason::UserRequest));
}

#[weft::test]
async fn test_cancel_is_idempotent_and_first_reason_wins() {
    let handle = weft::spawn(async {
        let res = sleep_for(Duration::from_secs(3600)).await;
        (res, current::cancellation_reason())
    });
    let token = handle.cancellation_token();

    token.cancel();
    handle.cancel();
    token.cancel();

    assert!(token.is_cancel_requested());
    assert_eq!(token.reason(), CancellationReason::UserRequest);
    assert_eq!(
        handle.get().await,
        Err(TaskError::Cancelled(CancellationReason::UserRequest))
    );
}

#[test]
fn test_resumed_once_under_competing_wakeups() -> Result<()> {
    let processor = Builder::new().worker_threads(2).try_build()?;

    for _ in 0..50 {
        let polls = Arc::new(AtomicUsize::new(0));
        let handle = processor.spawn(PollCounter {
            inner: sleep_for(Duration::from_millis(5)),
            polls: Arc::clone(&polls),
        });
        wait_for_state(&handle, TaskState::Suspended);

        // The deadline timer races with every token holder.
        let barrier = Arc::new(Barrier::new(4));
        let cancellers = (0..4)
            .map(|_| {
                let token = handle.cancellation_token();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    token.cancel();
                })
            })
            .collect::<Vec<_>>();

        for canceller in cancellers {
            canceller.join().expect("canceller thread");
        }

        // Either the deadline or the cancel request won, never both.
        let res = handle.blocking_get();
        assert!(matches!(res, Ok(Ok(())) | Err(TaskError::Cancelled(_))), "{res:?}");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    processor.shutdown()
}

#[rstest]
#[case::limit_1(1, 5)]
#[case::limit_10(10, 3)]
#[case::limit_32(32, 32)]
fn test_queue_length_admission(#[case] limit: usize, #[case] extra: usize) -> Result<()> {
    let processor = Builder::new()
        .worker_threads(1)
        .queue_length_limit(limit)
        .try_build()?;

    let (done, overloaded) = processor.block_on(async move {
        // The only worker runs us, nothing gets dequeued while we spawn.
        let handles = (0..limit + extra)
            .map(|i| weft::spawn(async move { i }))
            .collect::<Vec<_>>();

        let mut done = 0;
        let mut overloaded = 0;
        for handle in handles {
            match handle.get().await {
                Ok(_) => done += 1,
                Err(TaskError::Overloaded) => overloaded += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        (done, overloaded)
    })?;

    assert_eq!(done, limit);
    assert_eq!(overloaded, extra);

    let stats = processor.stats();
    assert_eq!(stats.overloaded, extra as u64);
    assert_eq!(stats.cancelled_by_overload, extra as u64);
    Ok(())
}

#[test]
fn test_ignore_overload_only_counts() -> Result<()> {
    let processor = Builder::new()
        .worker_threads(1)
        .queue_length_limit(2)
        .overload_action(OverloadAction::Ignore)
        .try_build()?;

    let results = processor.block_on(async {
        let handles = (0..6).map(|i| weft::spawn(async move { i })).collect::<Vec<_>>();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.get().await);
        }
        results
    })?;

    assert!(results.iter().all(Result::is_ok));
    let stats = processor.stats();
    assert_eq!(stats.overloaded, 4);
    assert_eq!(stats.cancelled_by_overload, 0);
    Ok(())
}

#[test]
fn test_wait_time_overload_spares_critical_tasks() -> Result<()> {
    let processor = Builder::new()
        .worker_threads(1)
        .queue_wait_time_limit(Duration::from_nanos(1))
        .sensor_wait_time_limit(Duration::from_nanos(1))
        .try_build()?;

    let overloaded = processor.block_on(async {
        let handles = (0..16).map(|i| weft::spawn(async move { i })).collect::<Vec<_>>();
        let critical = weft::spawn_critical(async { 7 });

        let mut overloaded = 0u64;
        for handle in handles {
            if let Err(e) = handle.get().await {
                assert!(e.is_overloaded(), "{e}");
                overloaded += 1;
            }
        }

        assert_eq!(critical.get().await, Ok(7));
        overloaded
    })?;

    let stats = processor.stats();
    assert!(overloaded > 0);
    assert_eq!(stats.cancelled_by_overload, overloaded);
    assert!(stats.wait_time_sensor_hits > 0);
    Ok(())
}

#[test]
fn test_shutdown_cancels_sleeping_tasks() -> Result<()> {
    let processor = Builder::new().worker_threads(2).try_build()?;
    let reasons = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..8 {
        let reasons = Arc::clone(&reasons);
        let handle = processor.spawn(async move {
            let res = sleep_for(Duration::from_secs(3600)).await;
            reasons.lock().expect("poisoned").push(res);
        });

        // A task cancelled before it starts never runs its body.
        wait_for_state(&handle, TaskState::Suspended);
        handle.detach();
    }

    let start = Instant::now();
    processor.shutdown()?;

    assert!(start.elapsed() < Duration::from_secs(5));
    let reasons = reasons.lock().expect("poisoned");
    assert_eq!(reasons.len(), 8);
    assert!(
        reasons
            .iter()
            .all(|r| *r == Err(TaskError::Cancelled(CancellationReason::Shutdown)))
    );
    Ok(())
}

#[test]
fn test_dropped_handle_abandons_task() -> Result<()> {
    let processor = Builder::new().worker_threads(1).try_build()?;
    let reason = Arc::new(Mutex::new(None));

    let handle = processor.spawn({
        let reason = Arc::clone(&reason);
        async move {
            let _ = sleep_for(Duration::from_secs(3600)).await;
            *reason.lock().expect("poisoned") = Some(current::cancellation_reason());
        }
    });
    wait_for_state(&handle, TaskState::Suspended);
    drop(handle);

    let start = Instant::now();
    while processor.stats().alive > 0 {
        assert!(start.elapsed() < Duration::from_secs(5));
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(*reason.lock().expect("poisoned"), Some(CancellationReason::Abandoned));
    processor.shutdown()
}
