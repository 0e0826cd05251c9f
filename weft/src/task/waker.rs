use crate::task::{Task, WakeupSource};
use futures::task::ArcWake;
use std::sync::Arc;

// The std `Waker` of a task delivers an epoch-less wakeup. Foreign futures
// and std-style reactors use it; the native primitives go through wait lists.
impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wakeup(WakeupSource::Waker, None);
    }
}
