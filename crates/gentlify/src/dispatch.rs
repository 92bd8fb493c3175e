//! Minimum inter-dispatch spacing with bounded jitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::random::RandomSource;

/// Enforces a minimum time gap between consecutive dispatches.
///
/// The gate lock is held across the sleep, so concurrent waiters are
/// serialized and successive returns are spaced at least the current
/// interval apart, plus jitter drawn from
/// `[0, interval * jitter_fraction)`. The first wait carries no base
/// delay, only jitter.
#[derive(Debug)]
pub struct DispatchGate {
    jitter_fraction: f64,
    clock: Arc<dyn Clock>,
    rand: Arc<dyn RandomSource>,
    interval: Mutex<f64>,
    last_dispatch: tokio::sync::Mutex<Option<f64>>,
}

impl DispatchGate {
    pub fn new(
        interval: f64,
        jitter_fraction: f64,
        clock: Arc<dyn Clock>,
        rand: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            jitter_fraction,
            clock,
            rand,
            interval: Mutex::new(interval),
            last_dispatch: tokio::sync::Mutex::new(None),
        }
    }

    /// Current dispatch interval in seconds.
    pub fn interval(&self) -> f64 {
        *self.interval.lock().unwrap()
    }

    /// Wait until the next dispatch is allowed, then record it.
    pub async fn wait(&self) {
        let mut last = self.last_dispatch.lock().await;
        let interval = self.interval();
        let now = self.clock.now();

        let remaining = match *last {
            Some(previous) => (interval - (now - previous)).max(0.0),
            None => 0.0,
        };
        let jitter = self.rand.uniform(0.0, interval * self.jitter_fraction);
        let delay = remaining + jitter;

        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        *last = Some(self.clock.now());
    }

    /// Double the interval, capped at `max_interval`. Returns (old, new).
    pub fn decelerate(&self, max_interval: f64) -> (f64, f64) {
        let mut interval = self.interval.lock().unwrap();
        let old = *interval;
        *interval = (old * 2.0).min(max_interval);
        debug!(old, new = *interval, "dispatch interval decelerated");
        (old, *interval)
    }

    /// Halve the interval, floored at `min_interval`. Returns (old, new).
    pub fn reaccelerate(&self, min_interval: f64) -> (f64, f64) {
        let mut interval = self.interval.lock().unwrap();
        let old = *interval;
        *interval = (old / 2.0).max(min_interval);
        debug!(old, new = *interval, "dispatch interval reaccelerated");
        (old, *interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RealClock;
    use crate::random::FixedRand;
    use tokio::time::Instant;

    fn gate(interval: f64, jitter_fraction: f64) -> DispatchGate {
        DispatchGate::new(
            interval,
            jitter_fraction,
            Arc::new(RealClock::new()),
            Arc::new(FixedRand::new(0.0)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_wait_has_no_base_delay() {
        let gate = gate(5.0, 0.0);
        let before = Instant::now();
        gate.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_waits_are_spaced_by_interval() {
        let gate = gate(2.0, 0.0);
        gate.wait().await;

        let before = Instant::now();
        gate.wait().await;
        let elapsed = before.elapsed().as_secs_f64();
        assert!((1.99..=2.01).contains(&elapsed), "elapsed {elapsed}");
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_reduces_the_wait() {
        let gate = gate(2.0, 0.0);
        gate.wait().await;
        tokio::time::sleep(Duration::from_secs_f64(1.5)).await;

        let before = Instant::now();
        gate.wait().await;
        let elapsed = before.elapsed().as_secs_f64();
        assert!((0.49..=0.51).contains(&elapsed), "elapsed {elapsed}");
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_extends_the_wait() {
        let gate = DispatchGate::new(
            2.0,
            0.5,
            Arc::new(RealClock::new()),
            Arc::new(FixedRand::new(1.0)),
        );
        gate.wait().await;

        // Base 2.0 plus the full jitter range 2.0 * 0.5.
        let before = Instant::now();
        gate.wait().await;
        let elapsed = before.elapsed().as_secs_f64();
        assert!((2.99..=3.01).contains(&elapsed), "elapsed {elapsed}");
    }

    #[tokio::test]
    async fn decelerate_doubles_up_to_cap() {
        let gate = gate(1.0, 0.0);
        assert_eq!(gate.decelerate(30.0), (1.0, 2.0));
        assert_eq!(gate.decelerate(30.0), (2.0, 4.0));
        assert_eq!(gate.decelerate(5.0), (4.0, 5.0));
        assert_eq!(gate.decelerate(5.0), (5.0, 5.0));
    }

    #[tokio::test]
    async fn reaccelerate_halves_down_to_floor() {
        let gate = gate(8.0, 0.0);
        assert_eq!(gate.reaccelerate(1.0), (8.0, 4.0));
        assert_eq!(gate.reaccelerate(1.0), (4.0, 2.0));
        assert_eq!(gate.reaccelerate(1.5), (2.0, 1.5));
        assert_eq!(gate.reaccelerate(1.5), (1.5, 1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_sleeps() {
        let gate = gate(0.0, 0.5);
        let before = Instant::now();
        gate.wait().await;
        gate.wait().await;
        gate.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
