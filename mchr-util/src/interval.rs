//! Minimum-interval gate, used for `SAVE_STATE_INTERVAL`, `STATS_DUMP_INTERVAL`
//! and `DATA_DUMP_INTERVAL`.

use std::time::{Duration, Instant};

/// Returns `true` at most once per `interval`, tracked from the last time it
/// returned `true`. The first call always returns `true`.
pub struct IntervalGate {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl IntervalGate {
    /// Build a gate that fires at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        IntervalGate {
            interval,
            last_fired: None,
        }
    }

    /// Check whether the interval has elapsed since the last fire, relative
    /// to `now`. Does not mutate state.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// If due, record `now` as the new fire time and return `true`.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.last_fired = Some(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut gate = IntervalGate::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(gate.fire(t0));
        assert!(!gate.fire(t0 + Duration::from_secs(5)));
        assert!(gate.fire(t0 + Duration::from_secs(11)));
    }
}
