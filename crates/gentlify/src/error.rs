//! Error taxonomy.

use thiserror::Error;

/// Errors surfaced when admission is refused.
///
/// Operational failures from the caller's own work are never translated
/// into this type; the throttle only observes them.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The circuit breaker is open and rejecting requests.
    #[error("circuit breaker is open, retry after {retry_after:.1}s")]
    CircuitOpen {
        /// Seconds until the breaker will admit a probe again.
        retry_after: f64,
    },

    /// The throttle is closed (or draining) and no longer accepting requests.
    #[error("throttle is closed and no longer accepting requests")]
    Closed,
}

/// Marker error reported to the failure handler when a slot is dropped
/// without an explicit outcome (caller cancellation).
///
/// Failure predicates can downcast to this type to exclude cancellations
/// from throttle-affecting failures.
#[derive(Error, Debug, Default)]
#[error("slot dropped before an outcome was reported")]
pub struct SlotCanceled;

/// Configuration errors, reported at construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("{0}")]
    Invalid(String),

    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    Env { var: String, reason: String },
}
