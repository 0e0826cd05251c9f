use crate::context::Context;
use crate::runtime::ProcessorConfig;
use crate::runtime::ticker::{Ticker, TickerData, TickerEvents};
use crate::task::Notified;
use crossbeam_deque::{Steal, Stealer};
use std::iter;
use std::ops::ControlFlow;

/// Scheduler loop of one worker thread. The local queue lives in the thread
/// [`Context`] so that tasks scheduled from this thread can reach it.
#[derive(Debug)]
pub(crate) struct Worker {
    index: usize,

    cfg: LoopConfig,

    ticker: Ticker,

    /// Set by the ticker, the next pop looks at the injector first.
    pop_global_queue: bool,

    /// Peers' local queues, every worker but this one.
    stealers: Vec<Stealer<Notified>>,
}

impl Worker {
    pub(crate) fn new(index: usize, cfg: &ProcessorConfig, mut stealers: Vec<Stealer<Notified>>) -> Self {
        // Per-worker victim order, idle workers don't all hit the same peer.
        fastrand::shuffle(&mut stealers);

        Self {
            index,
            cfg: cfg.into(),
            ticker: Ticker::new(),
            pop_global_queue: false,
            stealers,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Runs tasks until the processor shuts down.
    pub(crate) fn run(&mut self, ctx: &Context) {
        tracing::trace!(worker = self.index, "worker loop started");

        loop {
            match self.find_task(ctx) {
                Some(notified) => {
                    ctx.handle.admission.on_dequeue(notified.task());
                    notified.run();
                }
                None => {
                    // The only point where a worker blocks its OS thread.
                    ctx.handle
                        .shared
                        .park_current_thread(|| self.has_work(ctx));
                }
            }

            let events = self.ticker.tick(ctx, &mut self.cfg);
            if let ControlFlow::Break(()) = self.process_ticker_events(events) {
                break;
            }
        }
    }

    fn find_task(&mut self, ctx: &Context) -> Option<Notified> {
        let global = &ctx.handle.injector;

        // Tasks pushed from outside the pool would starve behind a local queue
        // that never drains.
        if std::mem::take(&mut self.pop_global_queue)
            && let Some(task) = global.steal_batch_and_pop(&ctx.local).success()
        {
            return Some(task);
        }

        // FIFO: a task that keeps yielding goes behind everything queued
        // before it.
        ctx.local.pop().or_else(|| {
            // Stolen batches land in our local queue.
            iter::repeat_with(|| {
                global.steal_batch_and_pop(&ctx.local).or_else(|| {
                    // Stops at the first victim that hands over a batch.
                    self.stealers
                        .iter()
                        .map(|s| s.steal_batch_and_pop(&ctx.local))
                        .collect::<Steal<_>>()
                })
            })
            .take(self.cfg.max_steal_retries)
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        })
    }

    fn has_work(&self, ctx: &Context) -> bool {
        !ctx.local.is_empty()
            || !ctx.handle.injector.is_empty()
            || self.stealers.iter().any(|s| !s.is_empty())
    }

    #[inline(always)]
    fn process_ticker_events(&mut self, events: TickerEvents) -> ControlFlow<()> {
        if events.contains(TickerEvents::SHUTDOWN) {
            return ControlFlow::Break(());
        }

        if events.contains(TickerEvents::POP_GLOBAL_QUEUE) {
            self.pop_global_queue = true;
        }

        ControlFlow::Continue(())
    }
}

#[derive(Debug, Clone)]
struct LoopConfig {
    global_queue_interval: u32,
    max_steal_retries: usize,
}

impl LoopConfig {
    #[inline(always)]
    fn should_pop_global_queue(&self, tick: u32) -> bool {
        tick.is_multiple_of(self.global_queue_interval)
    }
}

impl From<&ProcessorConfig> for LoopConfig {
    fn from(cfg: &ProcessorConfig) -> LoopConfig {
        LoopConfig {
            global_queue_interval: cfg.global_queue_interval,
            max_steal_retries: cfg.max_steal_retries,
        }
    }
}

impl TickerData for LoopConfig {
    type Context = Context;

    #[inline(always)]
    fn update_and_check(&mut self, ctx: &Self::Context, tick: u32) -> TickerEvents {
        // Queues are empty by then, the flag flips once every task finished.
        if ctx.handle.shared.is_shutdown() {
            return TickerEvents::SHUTDOWN;
        }

        let mut events = TickerEvents::empty();
        if self.should_pop_global_queue(tick) {
            events.insert(TickerEvents::POP_GLOBAL_QUEUE);
        }

        events
    }
}
