//! Backoff computation and retryability for the retry loop.

use std::sync::Arc;

use crate::config::{Backoff, RetryConfig};
use crate::random::RandomSource;

/// Computes backoff delays and applies the retryable predicate for
/// [`Throttle::execute`].
///
/// [`Throttle::execute`]: crate::Throttle::execute
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    rand: Arc<dyn RandomSource>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, rand: Arc<dyn RandomSource>) -> Self {
        Self { config, rand }
    }

    /// Total attempts including the initial call.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay in seconds before the retry following zero-indexed `attempt`.
    pub fn compute_delay(&self, attempt: u32) -> f64 {
        let cfg = &self.config;
        match cfg.backoff {
            Backoff::Fixed => cfg.base_delay,
            Backoff::Exponential => {
                (cfg.base_delay * 2f64.powi(attempt as i32)).min(cfg.max_delay)
            }
            Backoff::ExponentialJitter => {
                let cap = (cfg.base_delay * 2f64.powi(attempt as i32)).min(cfg.max_delay);
                self.rand.uniform(0.0, cap)
            }
        }
    }

    /// Whether `execute` may retry after this error. Absent predicate
    /// means everything is retryable.
    pub fn is_retryable(&self, error: &anyhow::Error) -> bool {
        match &self.config.retryable {
            None => true,
            Some(predicate) => predicate(error),
        }
    }
}
