//! Cooperative M:N task scheduling.
//!
//! A [`TaskProcessor`](runtime::TaskProcessor) runs many lightweight tasks
//! on a fixed pool of worker threads. Tasks are suspended and resumed through
//! a single sleep word, which guarantees that a task is rescheduled exactly
//! once no matter how many wake sources race: a wait list, a deadline, a
//! `std` waker or a cancellation request.
//!
//! ```no_run
//! #[weft::main(worker_threads = 4)]
//! async fn main() {
//!     let handle = weft::spawn(async { 40 + 2 });
//!     assert_eq!(handle.get().await, Ok(42));
//! }
//! ```

#[doc(inline)]
pub use weft_macros::main;

#[doc(inline)]
pub use weft_macros::test;

mod context;

pub mod runtime;

pub mod sync;

pub mod task;
pub use task::{spawn, spawn_critical};

pub mod time;

pub mod wait;

mod utils;
