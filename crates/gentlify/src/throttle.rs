//! Orchestrator wiring the admission components together.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use crate::circuit::CircuitBreaker;
use crate::clock::{Clock, RealClock};
use crate::concurrency::ConcurrencyController;
use crate::config::ThrottleConfig;
use crate::dispatch::DispatchGate;
use crate::error::{ConfigError, ThrottleError};
use crate::progress::ProgressTracker;
use crate::random::{RandomSource, ThreadRand};
use crate::retry::RetryPolicy;
use crate::slot::{Slot, SlotHandle};
use crate::token_bucket::TokenBucket;
use crate::types::{EventKind, ThrottleEvent, ThrottleSnapshot, ThrottleState};
use crate::window::SlidingWindow;

/// How often `drain` rechecks the in-flight count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Orchestrator state guarded by the core lock. Every check/mutate pair
/// runs under it; it is never held across a suspension point.
#[derive(Debug)]
struct Core {
    state: ThrottleState,
    safe_ceiling: usize,
    cooling_start: Option<f64>,
    last_failure_time: Option<f64>,
    failure_window: SlidingWindow,
    progress: ProgressTracker,
}

/// Callback work collected under the core lock and fired after it is
/// released, in order, so a callback can re-enter the throttle.
enum Emission {
    Event(ThrottleEvent),
    Progress(ThrottleSnapshot),
}

#[derive(Debug)]
pub(crate) struct Inner {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    concurrency: ConcurrencyController,
    dispatch: DispatchGate,
    token_bucket: Option<TokenBucket>,
    breaker: Option<CircuitBreaker>,
    retry: Option<RetryPolicy>,
    core: Mutex<Core>,
}

impl Inner {
    pub(crate) fn now(&self) -> f64 {
        self.clock.now()
    }

    pub(crate) fn release_permit(&self) {
        self.concurrency.release();
    }

    pub(crate) fn complete_success(&self, duration: f64, tokens: u64) {
        let emissions = {
            let mut core = self.core.lock().unwrap();
            self.handle_success(&mut core, duration, tokens)
        };
        self.fire(emissions);
    }

    pub(crate) fn complete_failure(&self, error: &anyhow::Error) {
        let emissions = {
            let mut core = self.core.lock().unwrap();
            self.handle_failure(&mut core, error)
        };
        self.fire(emissions);
    }

    fn handle_success(&self, core: &mut Core, duration: f64, tokens: u64) -> Vec<Emission> {
        let mut emissions = Vec::new();

        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }

        if core.state == ThrottleState::Cooling {
            if let Some(cooling_start) = core.cooling_start {
                if self.now() - cooling_start >= self.config.cooling_period {
                    let (old_c, new_c) = self.concurrency.reaccelerate(core.safe_ceiling);
                    let (old_i, new_i) =
                        self.dispatch.reaccelerate(self.config.min_dispatch_interval);
                    core.state = ThrottleState::Running;
                    core.cooling_start = None;
                    info!(
                        "reaccelerated: concurrency {}->{}, interval {:.3}->{:.3}",
                        old_c, new_c, old_i, new_i
                    );
                    emissions.push(Emission::Event(self.event(
                        EventKind::Reaccelerated,
                        json!({
                            "concurrency": [old_c, new_c],
                            "interval": [old_i, new_i],
                        }),
                    )));
                }
            }
        }

        if let Some(last_failure) = core.last_failure_time {
            let decay_after =
                self.config.cooling_period * self.config.safe_ceiling_decay_multiplier;
            if self.now() - last_failure >= decay_after {
                let old_ceiling = core.safe_ceiling;
                core.safe_ceiling = self.config.max_concurrency;
                core.last_failure_time = None;
                if old_ceiling != core.safe_ceiling {
                    info!(
                        "safe ceiling reset after quiet period: {} -> {}",
                        old_ceiling, core.safe_ceiling
                    );
                }
            }
        }

        if tokens > 0 {
            if let Some(bucket) = &self.token_bucket {
                bucket.consume(tokens);
            }
        }

        let milestone = core.progress.record_completion(duration);
        if milestone && self.config.on_progress.is_some() {
            emissions.push(Emission::Progress(self.snapshot_locked(core)));
        }

        emissions
    }

    fn handle_failure(&self, core: &mut Core, error: &anyhow::Error) -> Vec<Emission> {
        if let Some(predicate) = &self.config.failure_predicate {
            if !predicate(error) {
                debug!(error = %error, "failure excluded by predicate");
                return Vec::new();
            }
        }

        let mut emissions = Vec::new();
        core.failure_window.record();
        core.last_failure_time = Some(self.now());

        if let Some(breaker) = &self.breaker {
            // A CircuitOpen surfaced here is the breaker's own rejection,
            // already recorded, not fresh evidence of a downstream failure.
            let breaker_rejection = matches!(
                error.downcast_ref::<ThrottleError>(),
                Some(ThrottleError::CircuitOpen { .. })
            );
            if !breaker_rejection {
                breaker.record_failure();
            }
        }

        if core.failure_window.count() >= self.config.failure_threshold {
            let (old_c, new_c) = self.concurrency.decelerate();
            let (old_i, new_i) = self.dispatch.decelerate(self.config.max_dispatch_interval);
            core.safe_ceiling = old_c;
            // A fresh window lets the reduced limit prove itself instead
            // of decelerating again on the next failure.
            core.failure_window.clear();
            core.state = ThrottleState::Cooling;
            core.cooling_start = Some(self.now());

            info!(
                "decelerated: concurrency {}->{}, interval {:.3}->{:.3}",
                old_c, new_c, old_i, new_i
            );
            emissions.push(Emission::Event(self.event(
                EventKind::Decelerated,
                json!({
                    "concurrency": [old_c, new_c],
                    "interval": [old_i, new_i],
                    "safe_ceiling": old_c,
                }),
            )));
            emissions.push(Emission::Event(self.event(
                EventKind::CoolingStarted,
                json!({ "cooling_period": self.config.cooling_period }),
            )));
        }

        emissions
    }

    fn snapshot_locked(&self, core: &mut Core) -> ThrottleSnapshot {
        let (tokens_used, tokens_remaining) = match &self.token_bucket {
            Some(bucket) => (bucket.tokens_used(), Some(bucket.tokens_remaining())),
            None => (0, None),
        };

        ThrottleSnapshot {
            concurrency: self.concurrency.current_limit(),
            max_concurrency: self.config.max_concurrency,
            dispatch_interval: self.dispatch.interval(),
            completed_tasks: core.progress.completed(),
            total_tasks: self.config.total_tasks,
            failure_count: core.failure_window.count(),
            state: core.state,
            safe_ceiling: core.safe_ceiling,
            eta_seconds: core.progress.eta_seconds(),
            tokens_used,
            tokens_remaining,
        }
    }

    fn event(&self, kind: EventKind, data: serde_json::Value) -> ThrottleEvent {
        ThrottleEvent {
            kind,
            timestamp: self.now(),
            data,
        }
    }

    fn fire(&self, emissions: Vec<Emission>) {
        for emission in emissions {
            match emission {
                Emission::Event(event) => {
                    if let Some(callback) = &self.config.on_state_change {
                        callback(&event);
                    }
                }
                Emission::Progress(snapshot) => {
                    if let Some(callback) = &self.config.on_progress {
                        callback(&snapshot);
                    }
                }
            }
        }
    }
}

/// Adaptive throttle over a downstream service.
///
/// Admission runs through a fixed sequence: lifecycle check, circuit
/// breaker, concurrency permit, dispatch gate, token budget. Completions
/// feed back into the breaker, the failure window, the token bucket, and
/// the progress tracker; bursts of failures halve concurrency and double
/// the dispatch interval until a cooling period passes, after which
/// successes step capacity back up toward the safe ceiling.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Clone, Debug)]
pub struct Throttle {
    inner: Arc<Inner>,
}

impl Throttle {
    /// Build a throttle, validating the configuration.
    pub fn new(config: ThrottleConfig) -> Result<Self, ConfigError> {
        Self::with_sources(config, Arc::new(RealClock::new()), Arc::new(ThreadRand))
    }

    /// Build with explicit clock and randomness sources. Tests use this to
    /// substitute deterministic implementations.
    pub fn with_sources(
        config: ThrottleConfig,
        clock: Arc<dyn Clock>,
        rand: Arc<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let concurrency =
            ConcurrencyController::new(config.max_concurrency, config.initial_concurrency);
        let dispatch = DispatchGate::new(
            config.min_dispatch_interval,
            config.jitter_fraction,
            Arc::clone(&clock),
            Arc::clone(&rand),
        );
        let token_bucket = config
            .token_budget
            .map(|budget| TokenBucket::new(budget, Arc::clone(&clock)));
        let breaker = config
            .circuit_breaker
            .map(|breaker| CircuitBreaker::new(breaker, Arc::clone(&clock)));
        let retry = config
            .retry
            .clone()
            .map(|retry| RetryPolicy::new(retry, Arc::clone(&rand)));

        let core = Core {
            state: ThrottleState::Running,
            safe_ceiling: config.max_concurrency,
            cooling_start: None,
            last_failure_time: None,
            failure_window: SlidingWindow::new(config.failure_window, Arc::clone(&clock)),
            progress: ProgressTracker::new(config.total_tasks),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                concurrency,
                dispatch,
                token_bucket,
                breaker,
                retry,
                core: Mutex::new(core),
            }),
        })
    }

    /// Build from `GENTLIFY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ThrottleConfig::from_env()?)
    }

    /// Build from `<prefix>_*` environment variables.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        Self::new(ThrottleConfig::from_env_with_prefix(prefix)?)
    }

    /// Acquire a throttled slot.
    ///
    /// Suspends on the concurrency permit, the dispatch gate, and the
    /// token budget, in that order. The breaker is checked before the
    /// permit so an open circuit never hoards concurrency.
    pub async fn acquire(&self) -> Result<Slot, ThrottleError> {
        {
            let core = self.inner.core.lock().unwrap();
            if matches!(core.state, ThrottleState::Closed | ThrottleState::Draining) {
                return Err(ThrottleError::Closed);
            }
        }

        if let Some(breaker) = &self.inner.breaker {
            breaker.check()?;
        }

        self.inner.concurrency.acquire().await;
        // The slot owns the permit from here on; any exit path, including
        // cancellation mid-wait, releases it.
        let slot = Slot::new(Arc::clone(&self.inner));

        self.inner.dispatch.wait().await;

        if let Some(bucket) = &self.inner.token_bucket {
            bucket.wait_for_budget(1).await;
        }

        Ok(slot)
    }

    /// Point-in-time view of throttle state.
    pub fn snapshot(&self) -> ThrottleSnapshot {
        let mut core = self.inner.core.lock().unwrap();
        self.inner.snapshot_locked(&mut core)
    }

    /// Manually record a successful request, outside any slot.
    pub fn record_success(&self, duration: f64, tokens: u64) {
        self.inner.complete_success(duration, tokens);
    }

    /// Manually record a failed request, outside any slot.
    pub fn record_failure(&self, error: Option<&anyhow::Error>) {
        match error {
            Some(error) => self.inner.complete_failure(error),
            None => self
                .inner
                .complete_failure(&anyhow::anyhow!("manual failure")),
        }
    }

    /// Manually record token consumption.
    pub fn record_tokens(&self, count: u64) {
        if let Some(bucket) = &self.inner.token_bucket {
            bucket.consume(count);
        }
    }

    /// Stop accepting new requests. In-flight work completes normally.
    /// Idempotent.
    pub fn close(&self) {
        let event = {
            let mut core = self.inner.core.lock().unwrap();
            core.state = ThrottleState::Closed;
            info!("throttle closed, no new requests accepted");
            self.inner.event(EventKind::Closed, json!({}))
        };
        self.inner.fire(vec![Emission::Event(event)]);
    }

    /// Reject new requests and wait for in-flight work to finish, then
    /// close.
    pub async fn drain(&self) {
        let event = {
            let mut core = self.inner.core.lock().unwrap();
            core.state = ThrottleState::Draining;
            let in_flight = self.inner.concurrency.in_flight();
            info!(in_flight, "draining");
            self.inner
                .event(EventKind::Draining, json!({ "in_flight": in_flight }))
        };
        self.inner.fire(vec![Emission::Event(event)]);

        while self.inner.concurrency.in_flight() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let event = {
            let mut core = self.inner.core.lock().unwrap();
            core.state = ThrottleState::Closed;
            info!("drain complete, throttle closed");
            self.inner.event(EventKind::Drained, json!({}))
        };
        self.inner.fire(vec![Emission::Event(event)]);
    }

    /// Run `f` inside a slot, retrying per the configured retry policy.
    ///
    /// Without a retry configuration `f` runs exactly once. With one, a
    /// retryable failure with attempts remaining feeds the breaker (which
    /// may trip and cut the loop short), emits a `retry` event, sleeps the
    /// backoff delay, and re-invokes `f` within the same slot with an
    /// incremented attempt counter. Only the final failure reaches the
    /// throttle's failure handling; intermediate retries never decelerate.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut(SlotHandle) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let slot = self.acquire().await?;

        let Some(retry) = &self.inner.retry else {
            return match f(slot.handle()).await {
                Ok(value) => {
                    slot.succeed();
                    Ok(value)
                }
                Err(error) => {
                    slot.fail(&error);
                    Err(error)
                }
            };
        };

        let mut attempt: u32 = 0;
        loop {
            match f(slot.handle()).await {
                Ok(value) => {
                    slot.succeed();
                    return Ok(value);
                }
                Err(error) => {
                    if !retry.is_retryable(&error) {
                        slot.fail(&error);
                        return Err(error);
                    }
                    attempt += 1;
                    if attempt >= retry.max_attempts() {
                        slot.fail(&error);
                        return Err(error);
                    }

                    // The breaker sees every attempt, not just the last, so
                    // a hard-failing dependency can trip it mid-loop.
                    if let Some(breaker) = &self.inner.breaker {
                        breaker.record_failure();
                        if let Err(open) = breaker.check() {
                            let open = anyhow::Error::new(open);
                            slot.fail(&open);
                            return Err(open);
                        }
                    }

                    let delay = retry.compute_delay(attempt - 1);
                    debug!(attempt, delay, error = %error, "retrying after failure");
                    let event = self.inner.event(
                        EventKind::Retry,
                        json!({ "attempt": attempt, "delay": delay }),
                    );
                    self.inner.fire(vec![Emission::Event(event)]);

                    if delay > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                    slot.set_attempt(attempt);
                }
            }
        }
    }
}
