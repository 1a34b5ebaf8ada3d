//! Monotonic time source for session-relative timestamps.

use chrono::{DateTime, Utc};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Monotonic reading used for every session-relative time. Only differences
/// between readings are meaningful.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    /// Calendar time for session start/end stamps and folder names.
    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for replays and tests. Wall time moves with it from a
/// fixed origin.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicU64,
    wall_origin: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_wall_origin(Utc::now())
    }

    pub fn with_wall_origin(wall_origin: DateTime<Utc>) -> Self {
        Self {
            nanos: AtomicU64::new(0),
            wall_origin,
        }
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, seconds: f64) {
        self.advance(Duration::from_secs_f64(seconds.max(0.0)));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.now()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(250));
        clock.advance_secs(0.75);
        assert_eq!(clock.now(), Duration::from_secs(1));
        clock.set(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
    }

    #[test]
    fn manual_wall_time_follows_the_clock() {
        let origin = DateTime::parse_from_rfc3339("2026-10-16T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::with_wall_origin(origin);
        assert_eq!(clock.wall_time(), origin);
        clock.advance_secs(1.5);
        assert_eq!(
            clock.wall_time(),
            origin + chrono::Duration::milliseconds(1500)
        );
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
