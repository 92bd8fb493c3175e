//! Dynamic concurrency limiter.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Mutex;

use tokio::sync::Semaphore;
use tracing::debug;

/// Counting semaphore with a dynamically resizable limit.
///
/// Waiters queue FIFO on the underlying tokio semaphore. Raising the limit
/// releases additional permits immediately, waking queued acquirers.
/// Lowering it removes only permits that are currently available;
/// in-flight work is never preempted, the reduction is observed on
/// subsequent acquisitions. Any shortfall is carried as debt and repaid by
/// future releases, so `in_flight + available == limit` holds whenever the
/// limiter is quiescent.
#[derive(Debug)]
pub struct ConcurrencyController {
    max_concurrency: usize,
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    limits: Mutex<Limits>,
}

#[derive(Debug)]
struct Limits {
    limit: usize,
    /// Permits removed from the limit while still in flight.
    debt: usize,
}

impl ConcurrencyController {
    pub fn new(max_concurrency: usize, initial_concurrency: Option<usize>) -> Self {
        let limit = initial_concurrency.unwrap_or(max_concurrency);
        Self {
            max_concurrency,
            semaphore: Semaphore::new(limit),
            in_flight: AtomicUsize::new(0),
            limits: Mutex::new(Limits { limit, debt: 0 }),
        }
    }

    /// Current concurrency limit.
    pub fn current_limit(&self) -> usize {
        self.limits.lock().unwrap().limit
    }

    /// Number of currently acquired slots.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Relaxed)
    }

    /// Permits available for immediate acquisition.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot. FIFO among waiters; may suspend indefinitely.
    pub async fn acquire(&self) {
        // The semaphore is never closed.
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("concurrency semaphore closed");
        permit.forget();
        self.in_flight.fetch_add(1, Relaxed);
    }

    /// Return a slot.
    pub fn release(&self) {
        self.in_flight.fetch_sub(1, Relaxed);
        let mut limits = self.limits.lock().unwrap();
        if limits.debt > 0 {
            limits.debt -= 1;
        } else {
            self.semaphore.add_permits(1);
        }
    }

    /// Halve the limit, flooring at 1. Returns (old, new).
    pub fn decelerate(&self) -> (usize, usize) {
        let mut limits = self.limits.lock().unwrap();
        let old = limits.limit;
        let new = (old / 2).max(1);
        self.apply_limit(&mut limits, new);
        debug!(old, new, "concurrency decelerated");
        (old, new)
    }

    /// Raise the limit by one, capped at `ceiling`. Returns (old, new).
    pub fn reaccelerate(&self, ceiling: usize) -> (usize, usize) {
        let mut limits = self.limits.lock().unwrap();
        let old = limits.limit;
        let new = (old + 1).min(ceiling);
        self.apply_limit(&mut limits, new);
        debug!(old, new, "concurrency reaccelerated");
        (old, new)
    }

    /// Set the limit to exactly `new_limit`, clamped to
    /// `[1, max_concurrency]`.
    pub fn resize(&self, new_limit: usize) {
        let mut limits = self.limits.lock().unwrap();
        let new = new_limit.clamp(1, self.max_concurrency);
        self.apply_limit(&mut limits, new);
    }

    fn apply_limit(&self, limits: &mut Limits, new: usize) {
        let old = limits.limit;
        limits.limit = new;
        if new > old {
            // Outstanding debt absorbs growth before fresh permits are
            // handed to the semaphore.
            let mut delta = new - old;
            let repaid = delta.min(limits.debt);
            limits.debt -= repaid;
            delta -= repaid;
            if delta > 0 {
                self.semaphore.add_permits(delta);
            }
        } else if new < old {
            let delta = old - new;
            let forgotten = self.semaphore.forget_permits(delta);
            limits.debt += delta - forgotten;
        }
    }
}
