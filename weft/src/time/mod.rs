//! Deadlines, timed sleeps and cooperative yielding.

mod deadline;
pub use deadline::Deadline;

mod sleep;
pub use sleep::{sleep_for, sleep_until};

mod yield_now;
pub use yield_now::{YieldNow, yield_now};
