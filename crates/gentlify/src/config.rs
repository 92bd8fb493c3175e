//! Throttle configuration: validation, environment loading.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{FailurePredicate, ProgressCallback, RetryPredicate, StateChangeCallback};

/// Default environment-variable prefix for [`ThrottleConfig::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "GENTLIFY";

/// Rolling-window token budget configuration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TokenBudget {
    /// Tokens that may be consumed within one window.
    pub max_tokens: u64,
    /// Window length in seconds.
    pub window_seconds: f64,
}

impl TokenBudget {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens < 1 {
            return Err(invalid(format!(
                "max_tokens must be >= 1, got {}",
                self.max_tokens
            )));
        }
        if !(self.window_seconds > 0.0 && self.window_seconds.is_finite()) {
            return Err(invalid(format!(
                "window_seconds must be > 0, got {}",
                self.window_seconds
            )));
        }
        Ok(())
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub consecutive_failures: u32,
    /// Base lockout in seconds; doubles on half-open failure, capped at
    /// five times this value.
    pub open_duration: f64,
    /// Probes admitted while half-open, and successes needed to close.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_failures: 10,
            open_duration: 30.0,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.consecutive_failures < 1 {
            return Err(invalid(format!(
                "consecutive_failures must be >= 1, got {}",
                self.consecutive_failures
            )));
        }
        if !(self.open_duration >= 0.0 && self.open_duration.is_finite()) {
            return Err(invalid(format!(
                "open_duration must be >= 0, got {}",
                self.open_duration
            )));
        }
        if self.half_open_max_calls < 1 {
            return Err(invalid(format!(
                "half_open_max_calls must be >= 1, got {}",
                self.half_open_max_calls
            )));
        }
        Ok(())
    }
}

/// Backoff strategy for the retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Always `base_delay`.
    Fixed,
    /// `min(base_delay * 2^attempt, max_delay)`.
    Exponential,
    /// Uniform draw from `[0, min(base_delay * 2^attempt, max_delay))`.
    ExponentialJitter,
}

/// Retry policy configuration for [`Throttle::execute`].
///
/// [`Throttle::execute`]: crate::Throttle::execute
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the initial call.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Base delay in seconds.
    pub base_delay: f64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay: f64,
    /// Absent means every error is retryable.
    #[serde(skip)]
    pub retryable: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::ExponentialJitter,
            base_delay: 1.0,
            max_delay: 60.0,
            retryable: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("retryable", &self.retryable.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(invalid(format!(
                "max_attempts must be >= 1, got {}",
                self.max_attempts
            )));
        }
        if !(self.base_delay >= 0.0 && self.base_delay.is_finite()) {
            return Err(invalid(format!(
                "base_delay must be >= 0, got {}",
                self.base_delay
            )));
        }
        if !(self.max_delay >= self.base_delay && self.max_delay.is_finite()) {
            return Err(invalid(format!(
                "max_delay ({}) must be >= base_delay ({})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }
}

/// Complete throttle configuration.
///
/// Construct with a struct literal over [`Default`], deserialize from an
/// untyped map, or load from the environment. Validation runs when the
/// throttle is built.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub max_concurrency: usize,
    /// Starting concurrency; defaults to `max_concurrency`.
    pub initial_concurrency: Option<usize>,
    /// Minimum seconds between dispatches while running.
    pub min_dispatch_interval: f64,
    /// Ceiling the dispatch interval may decelerate to.
    pub max_dispatch_interval: f64,
    /// Failures within `failure_window` that trigger deceleration.
    pub failure_threshold: usize,
    /// Failure window length in seconds.
    pub failure_window: f64,
    /// Seconds spent at reduced capacity before reacceleration may begin.
    pub cooling_period: f64,
    /// The safe ceiling resets to `max_concurrency` after
    /// `cooling_period * safe_ceiling_decay_multiplier` seconds without a
    /// failure.
    pub safe_ceiling_decay_multiplier: f64,
    /// Fraction of the dispatch interval drawn as jitter, in `[0, 1]`.
    pub jitter_fraction: f64,
    /// Expected task count for progress tracking; 0 disables milestones.
    pub total_tasks: u64,
    pub token_budget: Option<TokenBudget>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryConfig>,
    #[serde(skip)]
    pub failure_predicate: Option<FailurePredicate>,
    #[serde(skip)]
    pub on_state_change: Option<StateChangeCallback>,
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            initial_concurrency: None,
            min_dispatch_interval: 0.2,
            max_dispatch_interval: 30.0,
            failure_threshold: 3,
            failure_window: 60.0,
            cooling_period: 60.0,
            safe_ceiling_decay_multiplier: 5.0,
            jitter_fraction: 0.5,
            total_tasks: 0,
            token_budget: None,
            circuit_breaker: None,
            retry: None,
            failure_predicate: None,
            on_state_change: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for ThrottleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleConfig")
            .field("max_concurrency", &self.max_concurrency)
            .field("initial_concurrency", &self.initial_concurrency)
            .field("min_dispatch_interval", &self.min_dispatch_interval)
            .field("max_dispatch_interval", &self.max_dispatch_interval)
            .field("failure_threshold", &self.failure_threshold)
            .field("failure_window", &self.failure_window)
            .field("cooling_period", &self.cooling_period)
            .field(
                "safe_ceiling_decay_multiplier",
                &self.safe_ceiling_decay_multiplier,
            )
            .field("jitter_fraction", &self.jitter_fraction)
            .field("total_tasks", &self.total_tasks)
            .field("token_budget", &self.token_budget)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry", &self.retry)
            .field(
                "failure_predicate",
                &self.failure_predicate.as_ref().map(|_| "<fn>"),
            )
            .field(
                "on_state_change",
                &self.on_state_change.as_ref().map(|_| "<fn>"),
            )
            .field("on_progress", &self.on_progress.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ThrottleConfig {
    /// Validate every field, including nested configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency < 1 {
            return Err(invalid(format!(
                "max_concurrency must be >= 1, got {}",
                self.max_concurrency
            )));
        }
        if let Some(initial) = self.initial_concurrency {
            if initial < 1 || initial > self.max_concurrency {
                return Err(invalid(format!(
                    "initial_concurrency must be between 1 and max_concurrency ({}), got {}",
                    self.max_concurrency, initial
                )));
            }
        }
        if !(self.min_dispatch_interval >= 0.0 && self.min_dispatch_interval.is_finite()) {
            return Err(invalid(format!(
                "min_dispatch_interval must be >= 0, got {}",
                self.min_dispatch_interval
            )));
        }
        if !(self.max_dispatch_interval >= self.min_dispatch_interval
            && self.max_dispatch_interval.is_finite())
        {
            return Err(invalid(format!(
                "max_dispatch_interval ({}) must be >= min_dispatch_interval ({})",
                self.max_dispatch_interval, self.min_dispatch_interval
            )));
        }
        if self.failure_threshold < 1 {
            return Err(invalid(format!(
                "failure_threshold must be >= 1, got {}",
                self.failure_threshold
            )));
        }
        if !(self.failure_window > 0.0 && self.failure_window.is_finite()) {
            return Err(invalid(format!(
                "failure_window must be > 0, got {}",
                self.failure_window
            )));
        }
        if !(self.cooling_period > 0.0 && self.cooling_period.is_finite()) {
            return Err(invalid(format!(
                "cooling_period must be > 0, got {}",
                self.cooling_period
            )));
        }
        if !(self.safe_ceiling_decay_multiplier > 0.0
            && self.safe_ceiling_decay_multiplier.is_finite())
        {
            return Err(invalid(format!(
                "safe_ceiling_decay_multiplier must be > 0, got {}",
                self.safe_ceiling_decay_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) || !self.jitter_fraction.is_finite() {
            return Err(invalid(format!(
                "jitter_fraction must be between 0.0 and 1.0, got {}",
                self.jitter_fraction
            )));
        }
        if let Some(budget) = &self.token_budget {
            budget.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    /// Load configuration from `GENTLIFY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from `<prefix>_*` environment variables.
    ///
    /// Scalar fields map to `<prefix>_<FIELD_UPPERCASE>`. A token budget
    /// needs both `<prefix>_TOKEN_BUDGET_MAX` and
    /// `<prefix>_TOKEN_BUDGET_WINDOW`; a lone one of the pair is ignored.
    /// Any `<prefix>_CIRCUIT_BREAKER_*` variable constructs a breaker
    /// configuration with defaults for the unset fields.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parsed::<usize>(prefix, "MAX_CONCURRENCY")? {
            config.max_concurrency = v;
        }
        if let Some(v) = env_parsed::<usize>(prefix, "INITIAL_CONCURRENCY")? {
            config.initial_concurrency = Some(v);
        }
        if let Some(v) = env_parsed::<f64>(prefix, "MIN_DISPATCH_INTERVAL")? {
            config.min_dispatch_interval = v;
        }
        if let Some(v) = env_parsed::<f64>(prefix, "MAX_DISPATCH_INTERVAL")? {
            config.max_dispatch_interval = v;
        }
        if let Some(v) = env_parsed::<usize>(prefix, "FAILURE_THRESHOLD")? {
            config.failure_threshold = v;
        }
        if let Some(v) = env_parsed::<f64>(prefix, "FAILURE_WINDOW")? {
            config.failure_window = v;
        }
        if let Some(v) = env_parsed::<f64>(prefix, "COOLING_PERIOD")? {
            config.cooling_period = v;
        }
        if let Some(v) = env_parsed::<f64>(prefix, "SAFE_CEILING_DECAY_MULTIPLIER")? {
            config.safe_ceiling_decay_multiplier = v;
        }
        if let Some(v) = env_parsed::<f64>(prefix, "JITTER_FRACTION")? {
            config.jitter_fraction = v;
        }
        if let Some(v) = env_parsed::<u64>(prefix, "TOTAL_TASKS")? {
            config.total_tasks = v;
        }

        let budget_max = env_parsed::<u64>(prefix, "TOKEN_BUDGET_MAX")?;
        let budget_window = env_parsed::<f64>(prefix, "TOKEN_BUDGET_WINDOW")?;
        if let (Some(max_tokens), Some(window_seconds)) = (budget_max, budget_window) {
            config.token_budget = Some(TokenBudget {
                max_tokens,
                window_seconds,
            });
        }

        let breaker_failures = env_parsed::<u32>(prefix, "CIRCUIT_BREAKER_CONSECUTIVE_FAILURES")?;
        let breaker_duration = env_parsed::<f64>(prefix, "CIRCUIT_BREAKER_OPEN_DURATION")?;
        let breaker_half_open = env_parsed::<u32>(prefix, "CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS")?;
        if breaker_failures.is_some() || breaker_duration.is_some() || breaker_half_open.is_some() {
            let mut breaker = CircuitBreakerConfig::default();
            if let Some(v) = breaker_failures {
                breaker.consecutive_failures = v;
            }
            if let Some(v) = breaker_duration {
                breaker.open_duration = v;
            }
            if let Some(v) = breaker_half_open {
                breaker.half_open_max_calls = v;
            }
            config.circuit_breaker = Some(breaker);
        }

        config.validate()?;
        Ok(config)
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

fn env_parsed<T>(prefix: &str, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let var = format!("{prefix}_{name}");
    match env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Env {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
