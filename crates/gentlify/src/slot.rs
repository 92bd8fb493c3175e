//! Per-admission handle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use crate::error::SlotCanceled;
use crate::throttle::Inner;

#[derive(Debug, Default)]
pub(crate) struct SlotState {
    tokens: AtomicU64,
    attempt: AtomicU32,
}

impl SlotState {
    fn record_tokens(&self, count: u64) {
        self.tokens.fetch_add(count, Relaxed);
    }

    fn tokens_reported(&self) -> u64 {
        self.tokens.load(Relaxed)
    }

    fn attempt(&self) -> u32 {
        self.attempt.load(Relaxed)
    }
}

/// Per-request handle returned by [`Throttle::acquire`].
///
/// The holder reports token usage through [`record_tokens`] and finishes
/// the request with [`succeed`] or [`fail`]. Dropping the slot without
/// reporting an outcome counts as a cancellation: the failure path runs
/// with a [`SlotCanceled`] error (subject to the configured failure
/// predicate) and the concurrency permit is released either way; no exit
/// path leaks a permit.
///
/// [`Throttle::acquire`]: crate::Throttle::acquire
/// [`record_tokens`]: Slot::record_tokens
/// [`succeed`]: Slot::succeed
/// [`fail`]: Slot::fail
pub struct Slot {
    inner: Arc<Inner>,
    state: Arc<SlotState>,
    started_at: f64,
    finished: bool,
}

impl Slot {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        let started_at = inner.now();
        Self {
            inner,
            state: Arc::new(SlotState::default()),
            started_at,
            finished: false,
        }
    }

    /// Report token consumption for this request. The throttle charges the
    /// budget when the slot succeeds.
    pub fn record_tokens(&self, count: u64) {
        self.state.record_tokens(count);
    }

    /// Tokens reported so far.
    pub fn tokens_reported(&self) -> u64 {
        self.state.tokens_reported()
    }

    /// Zero-indexed attempt number; increments on each retry of
    /// [`Throttle::execute`].
    ///
    /// [`Throttle::execute`]: crate::Throttle::execute
    pub fn attempt(&self) -> u32 {
        self.state.attempt()
    }

    /// Cloneable view for caller code running inside the slot.
    pub fn handle(&self) -> SlotHandle {
        SlotHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn set_attempt(&self, attempt: u32) {
        self.state.attempt.store(attempt, Relaxed);
    }

    /// Report success and release the slot.
    pub fn succeed(mut self) {
        self.finished = true;
        let duration = self.inner.now() - self.started_at;
        self.inner.complete_success(duration, self.tokens_reported());
        self.inner.release_permit();
    }

    /// Report failure and release the slot. The error is observed, never
    /// consumed: it stays with the caller.
    pub fn fail(mut self, error: &anyhow::Error) {
        self.finished = true;
        self.inner.complete_failure(error);
        self.inner.release_permit();
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let canceled = anyhow::Error::new(SlotCanceled);
        self.inner.complete_failure(&canceled);
        self.inner.release_permit();
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("tokens_reported", &self.tokens_reported())
            .field("attempt", &self.attempt())
            .finish()
    }
}

/// Cloneable view of a [`Slot`] handed to the closure run by
/// [`Throttle::execute`].
///
/// [`Throttle::execute`]: crate::Throttle::execute
#[derive(Clone, Debug)]
pub struct SlotHandle {
    state: Arc<SlotState>,
}

impl SlotHandle {
    /// Report token consumption for this request.
    pub fn record_tokens(&self, count: u64) {
        self.state.record_tokens(count);
    }

    /// Tokens reported so far.
    pub fn tokens_reported(&self) -> u64 {
        self.state.tokens_reported()
    }

    /// Zero-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.state.attempt()
    }
}
