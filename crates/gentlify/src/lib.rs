//! # Gentlify
//!
//! Adaptive client-side throttle: drive a rate-limited downstream service
//! at the highest sustainable throughput without overwhelming it.
//!
//! Callers submit asynchronous work through a [`Throttle`]. The throttle
//! decides how many operations run at once, how far apart they are
//! dispatched, whether to refuse outright, and how to react to failures by
//! slowing down and later re-accelerating. Admission is governed by a set
//! of cooperating state machines:
//!
//! - **Concurrency limiter**: FIFO counting semaphore whose limit halves
//!   on failure bursts and steps back up during recovery.
//! - **Dispatch gate**: minimum spacing between dispatches, with bounded
//!   jitter to avoid thundering herds.
//! - **Circuit breaker**: closed/open/half-open with exponential lockout
//!   backoff, capped at five times the base duration.
//! - **Token bucket**: rolling-window token budget for APIs metered in
//!   tokens rather than requests.
//! - **Failure window and cooling controller**: a burst of failures
//!   inside the window decelerates the throttle; after a cooling period,
//!   successes re-accelerate it up to the last known-safe ceiling.
//!
//! ## Example
//!
//! ```no_run
//! use gentlify::{Throttle, ThrottleConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let throttle = Throttle::new(ThrottleConfig {
//!     max_concurrency: 8,
//!     min_dispatch_interval: 0.1,
//!     ..ThrottleConfig::default()
//! })?;
//!
//! let slot = throttle.acquire().await?;
//! // ... call the rate-limited service ...
//! slot.record_tokens(120);
//! slot.succeed();
//! # Ok(())
//! # }
//! ```
//!
//! With a retry policy configured, [`Throttle::execute`] composes
//! admission and retries in one call:
//!
//! ```no_run
//! # use gentlify::{RetryConfig, Throttle, ThrottleConfig};
//! # async fn demo() -> anyhow::Result<()> {
//! let throttle = Throttle::new(ThrottleConfig {
//!     retry: Some(RetryConfig::default()),
//!     ..ThrottleConfig::default()
//! })?;
//!
//! let body = throttle
//!     .execute(|_slot| async { Ok::<_, anyhow::Error>("response") })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Time is read through an injectable [`Clock`] and jitter through an
//! injectable [`RandomSource`]; [`Throttle::with_sources`] accepts
//! deterministic substitutes for tests.

pub mod circuit;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod progress;
pub mod random;
pub mod retry;
pub mod slot;
pub mod throttle;
pub mod token_bucket;
pub mod types;
pub mod window;

pub use circuit::{CircuitBreaker, CircuitState};
pub use clock::{Clock, MockClock, RealClock};
pub use concurrency::ConcurrencyController;
pub use config::{
    Backoff, CircuitBreakerConfig, RetryConfig, ThrottleConfig, TokenBudget, DEFAULT_ENV_PREFIX,
};
pub use dispatch::DispatchGate;
pub use error::{ConfigError, SlotCanceled, ThrottleError};
pub use progress::ProgressTracker;
pub use random::{FixedRand, RandomSource, ThreadRand};
pub use retry::RetryPolicy;
pub use slot::{Slot, SlotHandle};
pub use throttle::Throttle;
pub use token_bucket::TokenBucket;
pub use types::{
    EventKind, FailurePredicate, ProgressCallback, RetryPredicate, StateChangeCallback,
    ThrottleEvent, ThrottleSnapshot, ThrottleState,
};
pub use window::SlidingWindow;
