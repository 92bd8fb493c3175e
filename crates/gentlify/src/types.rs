//! Shared public types: lifecycle state, snapshots, events, callbacks.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Orchestrator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleState {
    /// Normal operation at the current limits.
    Running,
    /// Reduced capacity after a failure burst; holds until the cooling
    /// period elapses and a success triggers reacceleration.
    Cooling,
    /// No new admissions; in-flight work finishes normally.
    Closed,
    /// Rejecting new admissions while waiting for in-flight work to drain.
    Draining,
}

impl fmt::Display for ThrottleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThrottleState::Running => "running",
            ThrottleState::Cooling => "cooling",
            ThrottleState::Closed => "closed",
            ThrottleState::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of throttle state.
#[derive(Clone, Debug, Serialize)]
pub struct ThrottleSnapshot {
    pub concurrency: usize,
    pub max_concurrency: usize,
    pub dispatch_interval: f64,
    pub completed_tasks: u64,
    pub total_tasks: u64,
    pub failure_count: usize,
    pub state: ThrottleState,
    pub safe_ceiling: usize,
    pub eta_seconds: Option<f64>,
    pub tokens_used: u64,
    pub tokens_remaining: Option<u64>,
}

/// Kind of a state-transition event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decelerated,
    CoolingStarted,
    Reaccelerated,
    Closed,
    Draining,
    Drained,
    Retry,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Decelerated => "decelerated",
            EventKind::CoolingStarted => "cooling_started",
            EventKind::Reaccelerated => "reaccelerated",
            EventKind::Closed => "closed",
            EventKind::Draining => "draining",
            EventKind::Drained => "drained",
            EventKind::Retry => "retry",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured event emitted on state transitions.
#[derive(Clone, Debug, Serialize)]
pub struct ThrottleEvent {
    pub kind: EventKind,
    /// Monotonic clock reading at emission.
    pub timestamp: f64,
    pub data: serde_json::Value,
}

/// Decides whether an operational failure should influence throttle state.
pub type FailurePredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Decides whether `execute` may retry a failed attempt.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Invoked synchronously for every emitted [`ThrottleEvent`]. Must be fast
/// and non-blocking; a slow callback stalls dispatch.
pub type StateChangeCallback = Arc<dyn Fn(&ThrottleEvent) + Send + Sync>;

/// Invoked synchronously with a snapshot whenever a progress milestone is
/// crossed. Same latency contract as [`StateChangeCallback`].
pub type ProgressCallback = Arc<dyn Fn(&ThrottleSnapshot) + Send + Sync>;
