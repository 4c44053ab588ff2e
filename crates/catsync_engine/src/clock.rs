//! Time sources.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// A source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a clock frozen at a Unix time in milliseconds.
    pub fn at_millis(ms: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    /// Sets the current time.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Moves the clock by `delta` (may be negative).
    ///
    /// Returns `false` and leaves the clock unchanged if the result would
    /// fall outside the representable range.
    pub fn advance(&self, delta: TimeDelta) -> bool {
        let mut now = self.now.lock();
        match now.checked_add_signed(delta) {
            Some(next) => {
                *now = next;
                true
            }
            None => false,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_both_ways() {
        let clock = ManualClock::at_millis(1_000);
        assert!(clock.advance(TimeDelta::milliseconds(500)));
        assert_eq!(clock.now().timestamp_millis(), 1_500);
        clock.advance(TimeDelta::milliseconds(-2_000));
        assert_eq!(clock.now().timestamp_millis(), -500);
    }

    #[test]
    fn manual_clock_rejects_overflow() {
        let clock = ManualClock::at_millis(1_000);
        assert!(!clock.advance(TimeDelta::MAX));
        assert!(!clock.advance(TimeDelta::MIN));
        assert_eq!(clock.now().timestamp_millis(), 1_000);
    }

    #[test]
    fn manual_clock_set() {
        let clock = ManualClock::at_millis(0);
        let at = DateTime::from_timestamp_millis(86_400_000).unwrap();
        clock.set(at);
        assert_eq!(clock.now(), at);
    }
}
