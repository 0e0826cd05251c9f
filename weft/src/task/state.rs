use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle of a task.
///
/// `New → Queued → Running → {Suspended ⇄ Queued} → {Completed | Cancelled}`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Spawned, not yet pushed on a ready queue.
    New = 0,

    /// Sitting in exactly one ready queue.
    Queued = 1,

    /// Being polled by a worker.
    Running = 2,

    /// Parked until one of its wakeup sources fires.
    Suspended = 3,

    /// The future returned a value (or panicked).
    Completed = 4,

    /// The task observed a cancellation request, or was cancelled before it
    /// ever ran.
    Cancelled = 5,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    fn from_u8(val: u8) -> TaskState {
        match val {
            0 => TaskState::New,
            1 => TaskState::Queued,
            2 => TaskState::Running,
            3 => TaskState::Suspended,
            4 => TaskState::Completed,
            5 => TaskState::Cancelled,
            _ => unreachable!("invalid task state {val}"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicTaskState(AtomicU8);

impl AtomicTaskState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TaskState::New as u8))
    }

    pub(crate) fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Atomically moves the task from `from` to `to`. On failure the actual
    /// state is returned.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> Result<(), TaskState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TaskState::from_u8)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct SleepFlags: u32 {
        /// The worker has given up the task after a `Pending` poll.
        const SLEEPING = 1;

        const WAKEUP_BY_WAIT_LIST = 1 << 1;
        const WAKEUP_BY_DEADLINE = 1 << 2;
        const WAKEUP_BY_WAKER = 1 << 3;
        const WAKEUP_BY_CANCEL_REQUEST = 1 << 4;

        /// Task suspended inside a `CancellationBlocker` scope.
        const NON_CANCELLABLE = 1 << 5;

        const WAKEUP_MASK = Self::WAKEUP_BY_WAIT_LIST.bits()
            | Self::WAKEUP_BY_DEADLINE.bits()
            | Self::WAKEUP_BY_WAKER.bits()
            | Self::WAKEUP_BY_CANCEL_REQUEST.bits();

        /// Wakeups that only make sense for the registration epoch they were
        /// delivered to.
        const EPOCH_BOUND = Self::WAKEUP_BY_WAIT_LIST.bits() | Self::WAKEUP_BY_DEADLINE.bits();
    }
}

impl SleepFlags {
    fn effective_wakeups(self) -> SleepFlags {
        let mut wakeups = self & SleepFlags::WAKEUP_MASK;
        if self.contains(SleepFlags::NON_CANCELLABLE) {
            wakeups.remove(SleepFlags::WAKEUP_BY_CANCEL_REQUEST);
        }
        wakeups
    }

    pub(crate) fn has_wakeup(self) -> bool {
        !self.effective_wakeups().is_empty()
    }
}

/// The reason a suspended task was resumed.
///
/// Returned exactly once by [`sleep`](crate::wait::sleep) to the code path
/// that suspended the task.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeupSource {
    /// Resumed without any recorded cause. Treat as spurious.
    None = 0,

    /// An explicit signal delivered through a wait list or a wake slot.
    WaitList = 1,

    /// The deadline of the suspension expired.
    Deadline = 2,

    /// The task's std [`Waker`](std::task::Waker) was used, usually by a
    /// foreign future or an external reactor.
    Waker = 3,

    /// Cancellation of the task was requested.
    CancelRequest = 4,
}

impl WakeupSource {
    pub(crate) fn flag(self) -> SleepFlags {
        match self {
            WakeupSource::None => SleepFlags::empty(),
            WakeupSource::WaitList => SleepFlags::WAKEUP_BY_WAIT_LIST,
            WakeupSource::Deadline => SleepFlags::WAKEUP_BY_DEADLINE,
            WakeupSource::Waker => SleepFlags::WAKEUP_BY_WAKER,
            WakeupSource::CancelRequest => SleepFlags::WAKEUP_BY_CANCEL_REQUEST,
        }
    }

    /// Picks a single cause out of all the wakeups that raced for the same
    /// epoch. An explicit signal always wins.
    pub(crate) fn primary(flags: SleepFlags) -> WakeupSource {
        let wakeups = flags.effective_wakeups();

        if wakeups.contains(SleepFlags::WAKEUP_BY_WAIT_LIST) {
            WakeupSource::WaitList
        } else if wakeups.contains(SleepFlags::WAKEUP_BY_DEADLINE) {
            WakeupSource::Deadline
        } else if wakeups.contains(SleepFlags::WAKEUP_BY_WAKER) {
            WakeupSource::Waker
        } else if wakeups.contains(SleepFlags::WAKEUP_BY_CANCEL_REQUEST) {
            WakeupSource::CancelRequest
        } else {
            WakeupSource::None
        }
    }

    pub(crate) fn from_u8(val: u8) -> WakeupSource {
        match val {
            1 => WakeupSource::WaitList,
            2 => WakeupSource::Deadline,
            3 => WakeupSource::Waker,
            4 => WakeupSource::CancelRequest,
            _ => WakeupSource::None,
        }
    }
}

/// Registration generation of a task. Bumped every time the task is resumed
/// so that late wakeups aimed at a previous suspension are discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Epoch(u32);

impl Epoch {
    pub(crate) fn next(self) -> Epoch {
        Epoch(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SleepParams {
    pub(crate) flags: SleepFlags,
    pub(crate) epoch: Epoch,
}

impl SleepParams {
    fn pack(self) -> u64 {
        (u64::from(self.epoch.0) << 32) | u64::from(self.flags.bits())
    }

    fn unpack(val: u64) -> Self {
        Self {
            flags: SleepFlags::from_bits_retain(val as u32),
            epoch: Epoch((val >> 32) as u32),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeupOutcome {
    /// Stale epoch, duplicate cause, or cancellation while non-cancellable.
    Rejected,

    /// The cause was recorded but somebody else is responsible for
    /// rescheduling the task.
    Accepted,

    /// The caller delivered the first wakeup to a sleeping task and must push
    /// it on a ready queue.
    Schedule,
}

/// Flags and epoch of a task packed in a single atomic word.
#[derive(Debug)]
pub(crate) struct SleepState(AtomicU64);

impl SleepState {
    pub(crate) fn new() -> Self {
        let params = SleepParams {
            flags: SleepFlags::empty(),
            epoch: Epoch(0),
        };
        Self(AtomicU64::new(params.pack()))
    }

    pub(crate) fn load(&self) -> SleepParams {
        SleepParams::unpack(self.0.load(Ordering::Acquire))
    }

    fn update(&self, f: impl Fn(SleepParams) -> SleepParams) -> SleepParams {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |val| {
                Some(f(SleepParams::unpack(val)).pack())
            });

        match prev {
            Ok(val) | Err(val) => SleepParams::unpack(val),
        }
    }

    /// Clears every flag and opens a new epoch. Returns the previous value so
    /// the worker can record why the task was resumed.
    pub(crate) fn resume(&self) -> SleepParams {
        self.update(|prev| SleepParams {
            flags: SleepFlags::empty(),
            epoch: prev.epoch.next(),
        })
    }

    /// Marks the task as sleeping. Returns the previous value; if it already
    /// carries a wakeup the worker must reschedule the task itself.
    pub(crate) fn suspend(&self, extra: SleepFlags) -> SleepParams {
        let flags = SleepFlags::SLEEPING | (extra & SleepFlags::NON_CANCELLABLE);
        SleepParams::unpack(self.0.fetch_or(u64::from(flags.bits()), Ordering::AcqRel))
    }

    /// Invalidates registrations made for the current epoch without
    /// suspending. Causes that are not bound to a registration survive.
    pub(crate) fn retire_epoch(&self) {
        self.update(|prev| SleepParams {
            flags: prev.flags - SleepFlags::EPOCH_BOUND,
            epoch: prev.epoch.next(),
        });
    }

    /// Records `source` for the given epoch, or for whatever epoch is current
    /// when `epoch` is `None`.
    pub(crate) fn wakeup(&self, source: WakeupSource, epoch: Option<Epoch>) -> WakeupOutcome {
        let flag = source.flag();
        let mut current = self.0.load(Ordering::Acquire);

        loop {
            let params = SleepParams::unpack(current);

            if epoch.is_some_and(|e| e != params.epoch) {
                return WakeupOutcome::Rejected;
            }

            if source == WakeupSource::CancelRequest
                && params.flags.contains(SleepFlags::NON_CANCELLABLE)
            {
                return WakeupOutcome::Rejected;
            }

            if flag.is_empty() || params.flags.contains(flag) {
                return WakeupOutcome::Rejected;
            }

            let next = SleepParams {
                flags: params.flags | flag,
                epoch: params.epoch,
            };

            match self.0.compare_exchange_weak(
                current,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let should_schedule = params.flags.contains(SleepFlags::SLEEPING)
                        && !params.flags.has_wakeup();

                    return if should_schedule {
                        WakeupOutcome::Schedule
                    } else {
                        WakeupOutcome::Accepted
                    };
                }
                Err(actual) => current = actual,
            }
        }
    }
}
