use crate::sync::{Event, Future};
use crate::task::{SharedTaskHandle, TaskError, TaskHandle, WakeupSource, current};
use crate::time::Deadline;
use crate::wait::{self, EarlyWakeup, WaitList, WaitStrategy, Waiter};

mod sealed {
    pub trait Sealed {}
}

/// Something a task can wait on together with others, see [`wait_any`].
///
/// Implemented for task handles, [`Event`] and [`Future`].
pub trait Waitable: sealed::Sealed {
    #[doc(hidden)]
    fn is_ready(&self) -> bool;

    #[doc(hidden)]
    fn wait_list(&self) -> &WaitList;
}

impl<T> sealed::Sealed for TaskHandle<T> {}

impl<T> Waitable for TaskHandle<T> {
    fn is_ready(&self) -> bool {
        self.is_finished()
    }

    fn wait_list(&self) -> &WaitList {
        &self.task().finish_waiters
    }
}

impl<T> sealed::Sealed for SharedTaskHandle<T> {}

impl<T> Waitable for SharedTaskHandle<T> {
    fn is_ready(&self) -> bool {
        self.is_finished()
    }

    fn wait_list(&self) -> &WaitList {
        &self.task().finish_waiters
    }
}

impl<T> sealed::Sealed for Future<T> {}

impl<T> Waitable for Future<T> {
    fn is_ready(&self) -> bool {
        Future::is_ready(self)
    }

    fn wait_list(&self) -> &WaitList {
        self.waiters()
    }
}

impl sealed::Sealed for Event {}

impl Waitable for Event {
    fn is_ready(&self) -> bool {
        Event::is_ready(self)
    }

    fn wait_list(&self) -> &WaitList {
        self.waiters()
    }
}

impl<W: Waitable + ?Sized> sealed::Sealed for &W {}

impl<W: Waitable + ?Sized> Waitable for &W {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn wait_list(&self) -> &WaitList {
        (**self).wait_list()
    }
}

/// Registers the same waiter on every list. The first one to fire wins, the
/// sleep word rejects the rest.
struct AnyStrategy<'a, W> {
    items: &'a [W],
    registered: usize,
    waiter: Option<Waiter>,
}

impl<W: Waitable> WaitStrategy for AnyStrategy<'_, W> {
    fn setup_wakeups(&mut self, waiter: &Waiter) -> EarlyWakeup {
        self.waiter = Some(waiter.clone());

        for item in self.items {
            let mut list = item.wait_list().lock();
            if item.is_ready() {
                return EarlyWakeup(true);
            }
            list.push(waiter.clone());
            self.registered += 1;
        }

        EarlyWakeup(false)
    }

    fn disable_wakeups(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            for item in &self.items[..self.registered] {
                item.wait_list().lock().remove(&waiter);
            }
        }
        self.registered = 0;
    }
}

fn first_ready<W: Waitable>(items: &[W]) -> Option<usize> {
    items.iter().position(Waitable::is_ready)
}

/// Waits until one of `items` is ready and returns its index, the lowest
/// one if several are. Returns `Ok(None)` for an empty slice.
///
/// Returns [`TaskError::WaitInterrupted`] if the current task is cancelled
/// first.
pub async fn wait_any<W: Waitable>(items: &[W]) -> Result<Option<usize>, TaskError> {
    wait_any_until(items, Deadline::unreachable()).await
}

/// Like [`wait_any`] but gives up with [`TaskError::TimedOut`] once
/// `deadline` is reached.
pub async fn wait_any_until<W: Waitable>(
    items: &[W],
    deadline: Deadline,
) -> Result<Option<usize>, TaskError> {
    if items.is_empty() {
        return Ok(None);
    }

    loop {
        if let Some(idx) = first_ready(items) {
            return Ok(Some(idx));
        }

        let mut strategy = AnyStrategy {
            items,
            registered: 0,
            waiter: None,
        };

        match wait::sleep(&mut strategy, deadline).await {
            WakeupSource::WaitList | WakeupSource::Waker | WakeupSource::None => {}
            WakeupSource::Deadline => {
                return first_ready(items)
                    .map(Some)
                    .ok_or(TaskError::TimedOut);
            }
            WakeupSource::CancelRequest => {
                return Err(TaskError::WaitInterrupted(current::cancellation_reason()));
            }
        }
    }
}

/// Waits until every item in `items` is ready.
pub async fn wait_all<W: Waitable>(items: &[W]) -> Result<(), TaskError> {
    wait_all_until(items, Deadline::unreachable()).await
}

/// Like [`wait_all`] but gives up with [`TaskError::TimedOut`] once
/// `deadline` is reached.
pub async fn wait_all_until<W: Waitable>(items: &[W], deadline: Deadline) -> Result<(), TaskError> {
    for item in items {
        wait_any_until(std::slice::from_ref(item), deadline).await?;
    }
    Ok(())
}
