use std::fmt;
use std::time::{Duration, Instant};

/// A point in time after which a wait gives up. May be unreachable.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    pub const fn unreachable() -> Self {
        Self(None)
    }

    pub fn from_instant(when: Instant) -> Self {
        Self(Some(when))
    }

    /// `now + duration`. Saturates to unreachable on overflow.
    pub fn from_duration(duration: Duration) -> Self {
        Self(Instant::now().checked_add(duration))
    }

    /// A deadline that is already reached.
    pub fn passed() -> Self {
        Self(Some(Instant::now()))
    }

    pub fn is_reachable(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_reached(&self) -> bool {
        self.0.is_some_and(|when| when <= Instant::now())
    }

    /// Time left until the deadline, `None` if unreachable.
    pub fn time_left(&self) -> Option<Duration> {
        self.0.map(|when| when.saturating_duration_since(Instant::now()))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// The earlier of the two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) | (None, Some(a)) => Deadline(Some(a)),
            (None, None) => Deadline(None),
        }
    }
}

impl From<Instant> for Deadline {
    fn from(when: Instant) -> Self {
        Self::from_instant(when)
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time_left() {
            Some(left) => write!(f, "Deadline(in {left:?})"),
            None => f.write_str("Deadline(unreachable)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable() {
        let deadline = Deadline::unreachable();
        assert!(!deadline.is_reachable());
        assert!(!deadline.is_reached());
        assert_eq!(deadline.time_left(), None);
        assert_eq!(Deadline::default(), deadline);
    }

    #[test]
    fn test_min_prefers_reachable() {
        let soon = Deadline::from_duration(Duration::from_millis(10));
        let later = Deadline::from_duration(Duration::from_secs(10));

        assert_eq!(soon.min(later), soon);
        assert_eq!(later.min(soon), soon);
        assert_eq!(Deadline::unreachable().min(later), later);
        assert_eq!(later.min(Deadline::unreachable()), later);
    }

    #[test]
    fn test_passed() {
        let deadline = Deadline::passed();
        assert!(deadline.is_reached());
        assert_eq!(deadline.time_left(), Some(Duration::ZERO));
    }

    #[test]
    fn test_overflow_saturates() {
        assert!(!Deadline::from_duration(Duration::MAX).is_reachable());
    }
}
