use bitflags::bitflags;

#[derive(Debug)]
pub(crate) struct Ticker {
    tick: u32,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Self { tick: 0 }
    }

    pub(crate) fn tick<T: TickerData>(&mut self, ctx: &T::Context, data: &mut T) -> TickerEvents {
        self.tick = self.tick.wrapping_add(1);
        data.update_and_check(ctx, self.tick)
    }
}

/// The worker consumes the tick and turns it into [`TickerEvents`]. This way
/// we decouple the loop from the policies.
pub(crate) trait TickerData {
    type Context;

    fn update_and_check(&mut self, ctx: &Self::Context, tick: u32) -> TickerEvents;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub(crate) struct TickerEvents: u8 {
        /// Look at the global injector before the local queue on the next pop.
        const POP_GLOBAL_QUEUE = 1;

        /// The task processor is shutting down, leave the worker loop.
        const SHUTDOWN = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EveryThird;

    impl TickerData for EveryThird {
        type Context = ();

        fn update_and_check(&mut self, _: &(), tick: u32) -> TickerEvents {
            if tick.is_multiple_of(3) {
                TickerEvents::POP_GLOBAL_QUEUE
            } else {
                TickerEvents::empty()
            }
        }
    }

    #[test]
    fn test_ticks_feed_policy() {
        let mut ticker = Ticker::new();
        let fired = (0..9)
            .filter(|_| ticker.tick(&(), &mut EveryThird).contains(TickerEvents::POP_GLOBAL_QUEUE))
            .count();
        assert_eq!(fired, 3);
    }
}
