//! Task processors: worker pools running tasks off a work-stealing ready
//! queue.
//!
//! Each worker owns a FIFO local queue. Tasks scheduled from a worker go to
//! its local queue, tasks scheduled from any other thread (the deadline timer,
//! a reactor, `block_on`) go to the global injector. Idle workers steal
//! batches from the injector and from their peers, then park.

mod admission;

mod builder;
pub use builder::{Builder, OverloadAction};
pub(crate) use builder::ProcessorConfig;

mod pool;

mod processor;
pub(crate) use processor::Handle;
pub use processor::{ProcessorStats, TaskProcessor};

mod registry;

mod ticker;

mod timer;
pub(crate) use timer::TimerKey;

mod worker;

#[cfg(test)]
mod tests;
