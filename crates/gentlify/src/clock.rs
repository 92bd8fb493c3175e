//! Injectable monotonic time source.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use tokio::time::Instant;

/// Monotonic clock abstraction.
///
/// Every time read in the crate goes through this trait so tests can
/// substitute a deterministic clock. Readings are seconds since an
/// arbitrary epoch; only differences are meaningful.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> f64;
}

/// Production clock backed by the tokio timer.
///
/// Reads `tokio::time::Instant`, so code under
/// `#[tokio::test(start_paused = true)]` observes paused and auto-advanced
/// time together with `tokio::time::sleep`.
#[derive(Debug)]
pub struct RealClock {
    start: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Deterministic clock for tests. Starts at 0.0 and advances manually.
#[derive(Debug, Default)]
pub struct MockClock {
    micros: AtomicU64,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `seconds`.
    pub fn advance(&self, seconds: f64) {
        self.micros.fetch_add((seconds * 1e6) as u64, Relaxed);
    }

    /// Set the clock to an absolute reading in seconds.
    pub fn set(&self, seconds: f64) {
        self.micros.store((seconds * 1e6) as u64, Relaxed);
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        self.micros.load(Relaxed) as f64 / 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_starts_at_zero_and_advances() {
        let clock = MockClock::new();
        assert_eq!(clock.now(), 0.0);

        clock.advance(1.5);
        assert!((clock.now() - 1.5).abs() < 1e-9);

        clock.advance(0.25);
        assert!((clock.now() - 1.75).abs() < 1e-9);
    }

    #[test]
    fn mock_clock_set_overwrites() {
        let clock = MockClock::new();
        clock.advance(10.0);
        clock.set(2.0);
        assert!((clock.now() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn real_clock_is_monotonic() {
        let clock = RealClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
