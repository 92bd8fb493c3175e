//! Three-state circuit breaker with exponential lockout backoff.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::error::ThrottleError;

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_probes: u32,
    opened_at: f64,
    current_open_duration: f64,
}

/// Three-state circuit breaker: closed -> open -> half-open -> closed/open.
///
/// The lockout doubles each time a half-open probe fails, capped at five
/// times the configured duration, and resets to the base once enough
/// half-open probes succeed to close the circuit.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let current_open_duration = config.open_duration;
        Self {
            config,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_probes: 0,
                opened_at: 0.0,
                current_open_duration,
            }),
        }
    }

    /// Current state.
    ///
    /// Reading the state is not a pure observation: once the lockout has
    /// elapsed it transitions Open -> HalfOpen, the same way `check` does.
    pub fn state(&self) -> CircuitState {
        let mut s = self.state.lock().unwrap();
        self.maybe_half_open(&mut s);
        s.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().unwrap().consecutive_failures
    }

    pub fn half_open_successes(&self) -> u32 {
        self.state.lock().unwrap().half_open_successes
    }

    /// Admission check; never suspends.
    ///
    /// Passes while closed. While open, fails with the residual lockout.
    /// While half-open, admits up to `half_open_max_calls` probes and
    /// rejects the rest.
    pub fn check(&self) -> Result<(), ThrottleError> {
        let mut s = self.state.lock().unwrap();
        self.maybe_half_open(&mut s);
        match s.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(self.rejection(&s)),
            CircuitState::HalfOpen => {
                if s.half_open_probes >= self.config.half_open_max_calls {
                    Err(self.rejection(&s))
                } else {
                    s.half_open_probes += 1;
                    Ok(())
                }
            }
        }
    }

    /// Record a success. Closes the circuit once enough half-open probes
    /// have succeeded.
    pub fn record_success(&self) {
        let mut s = self.state.lock().unwrap();
        s.consecutive_failures = 0;

        if s.state == CircuitState::HalfOpen {
            s.half_open_successes += 1;
            if s.half_open_successes >= self.config.half_open_max_calls {
                debug!("circuit closed after successful half-open probes");
                s.state = CircuitState::Closed;
                s.current_open_duration = self.config.open_duration;
                s.half_open_successes = 0;
                s.half_open_probes = 0;
            }
        }
    }

    /// Record a failure. Opens the circuit at the consecutive-failure
    /// threshold; a half-open failure re-opens with a doubled lockout.
    pub fn record_failure(&self) {
        let mut s = self.state.lock().unwrap();
        s.consecutive_failures += 1;

        if s.state == CircuitState::HalfOpen {
            s.current_open_duration =
                (s.current_open_duration * 2.0).min(self.config.open_duration * 5.0);
            self.trip_open(&mut s);
        } else if s.consecutive_failures >= self.config.consecutive_failures {
            self.trip_open(&mut s);
        }
    }

    fn trip_open(&self, s: &mut BreakerState) {
        warn!(lockout_secs = s.current_open_duration, "circuit opened");
        s.state = CircuitState::Open;
        s.opened_at = self.clock.now();
        s.half_open_successes = 0;
        s.half_open_probes = 0;
    }

    fn maybe_half_open(&self, s: &mut BreakerState) {
        if s.state == CircuitState::Open
            && self.clock.now() - s.opened_at >= s.current_open_duration
        {
            s.state = CircuitState::HalfOpen;
            s.half_open_successes = 0;
            s.half_open_probes = 0;
        }
    }

    fn rejection(&self, s: &BreakerState) -> ThrottleError {
        let retry_after =
            (s.current_open_duration - (self.clock.now() - s.opened_at)).max(0.0);
        ThrottleError::CircuitOpen { retry_after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn breaker(
        consecutive_failures: u32,
        open_duration: f64,
        half_open_max_calls: u32,
    ) -> (CircuitBreaker, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                consecutive_failures,
                open_duration,
                half_open_max_calls,
            },
            clock.clone() as Arc<dyn Clock>,
        );
        (breaker, clock)
    }

    fn retry_after(breaker: &CircuitBreaker) -> f64 {
        match breaker.check() {
            Err(ThrottleError::CircuitOpen { retry_after }) => retry_after,
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn transitions_closed_open_half_open_closed() {
        let (cb, clock) = breaker(3, 10.0, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let remaining = retry_after(&cb);
        assert!((9.9..=10.0).contains(&remaining), "retry_after {remaining}");

        clock.advance(10.0);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn success_in_closed_resets_consecutive_failures() {
        let (cb, _clock) = breaker(3, 10.0, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_doubles_lockout_capped_at_five_times_base() {
        let (cb, clock) = breaker(1, 10.0, 1);
        cb.record_failure();

        let mut expected = 10.0;
        for _ in 0..6 {
            clock.advance(expected + 0.001);
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            cb.record_failure();
            expected = (expected * 2.0).min(50.0);
            let remaining = retry_after(&cb);
            assert!(
                remaining <= expected && remaining > expected - 0.1,
                "lockout {remaining}, expected about {expected}"
            );
            assert!(remaining <= 50.0);
        }
    }

    #[test]
    fn half_open_success_resets_lockout_to_base() {
        let (cb, clock) = breaker(1, 10.0, 1);
        cb.record_failure();
        clock.advance(10.0);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure(); // lockout now 20

        clock.advance(20.0);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // The next trip uses the base lockout again.
        cb.record_failure();
        let remaining = retry_after(&cb);
        assert!((9.9..=10.0).contains(&remaining), "retry_after {remaining}");
    }

    #[test]
    fn half_open_admits_limited_probes() {
        let (cb, clock) = breaker(1, 10.0, 2);
        cb.record_failure();
        clock.advance(10.0);

        assert!(cb.check().is_ok());
        assert!(cb.check().is_ok());
        assert!(matches!(
            cb.check(),
            Err(ThrottleError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn half_open_requires_enough_successes_to_close() {
        let (cb, clock) = breaker(1, 10.0, 2);
        cb.record_failure();
        clock.advance(10.0);

        assert!(cb.check().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.half_open_successes(), 1);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn zero_open_duration_is_immediately_half_open() {
        let (cb, _clock) = breaker(1, 0.0, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn retry_after_shrinks_as_lockout_elapses() {
        let (cb, clock) = breaker(1, 10.0, 1);
        cb.record_failure();

        let first = retry_after(&cb);
        clock.advance(4.0);
        let second = retry_after(&cb);
        assert!(second < first);
        assert!((5.9..=6.0).contains(&second), "retry_after {second}");
    }
}
