//! Monotonic logical clock.
//!
//! Nodes never look at a host frame timer. The engine owns one
//! [`LogicalClock`], advances it once per simulation tick, and hands the
//! current [`Tick`] to every evaluation through
//! [`EvalContext`][crate::node::EvalContext].  Cache windows, action
//! durations and stuck detection are all expressed in ticks.

use serde::{Deserialize, Serialize};

/// A point on the logical timeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Ticks elapsed since `earlier` (zero if `earlier` is in the future).
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn offset(self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }
}

/// Tick counter paired with the tick rate used to convert to seconds.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    now: Tick,
    tick_rate_hz: f32,
}

impl LogicalClock {
    pub const DEFAULT_TICK_RATE_HZ: f32 = 60.0;

    /// Create a clock at tick 0.  Non-positive or non-finite rates fall back
    /// to [`Self::DEFAULT_TICK_RATE_HZ`].
    pub fn new(tick_rate_hz: f32) -> Self {
        let tick_rate_hz = if tick_rate_hz.is_finite() && tick_rate_hz > 0.0 {
            tick_rate_hz
        } else {
            Self::DEFAULT_TICK_RATE_HZ
        };
        Self {
            now: Tick(0),
            tick_rate_hz,
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Advance by one tick and return the new time.
    pub fn advance(&mut self) -> Tick {
        self.now = self.now.offset(1);
        self.now
    }

    pub fn tick_rate_hz(&self) -> f32 {
        self.tick_rate_hz
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        seconds_to_ticks(seconds, self.tick_rate_hz)
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.tick_rate_hz as f64
    }

    /// Seconds since tick 0.
    pub fn elapsed_seconds(&self) -> f64 {
        self.ticks_to_seconds(self.now.0)
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TICK_RATE_HZ)
    }
}

pub(crate) fn seconds_to_ticks(seconds: f64, tick_rate_hz: f32) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * tick_rate_hz as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let mut clock = LogicalClock::default();
        assert_eq!(clock.now(), Tick(0));
        assert_eq!(clock.advance(), Tick(1));
        assert_eq!(clock.advance(), Tick(2));
    }

    #[test]
    fn conversions_at_sixty_hz() {
        let clock = LogicalClock::new(60.0);
        assert_eq!(clock.seconds_to_ticks(0.1), 6);
        assert_eq!(clock.seconds_to_ticks(-1.0), 0);
        assert!((clock.ticks_to_seconds(30) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn invalid_rate_falls_back_to_default() {
        assert_eq!(LogicalClock::new(0.0).tick_rate_hz(), 60.0);
        assert_eq!(LogicalClock::new(f32::NAN).tick_rate_hz(), 60.0);
    }

    #[test]
    fn since_saturates() {
        assert_eq!(Tick(3).since(Tick(10)), 0);
        assert_eq!(Tick(10).since(Tick(3)), 7);
    }
}
