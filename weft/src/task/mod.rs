//! Tasks: spawning, handles, cancellation and the accessors for the current
//! task.

mod cancel;
pub use cancel::{CancellationBlocker, CancellationReason, TaskCancellationToken};

pub mod current;

mod error;
pub use error::TaskError;

mod handle;
pub(crate) use handle::{Output, TaskFuture};
pub use handle::TaskHandle;

mod harness;

mod id;
pub use id::Id;

mod shared;
pub use shared::SharedTaskHandle;

mod spawn;
pub use spawn::{spawn, spawn_critical};

pub(crate) mod state;
pub use state::{TaskState, WakeupSource};

#[allow(clippy::module_inception)]
mod task;
pub(crate) use task::{Notified, Task};

mod waker;
