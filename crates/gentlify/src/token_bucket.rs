//! Rolling-window token budget.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::config::TokenBudget;
use crate::window::SlidingWindow;

/// Padding past the oldest entry's expiry so the recheck lands on the
/// expired side of the window boundary.
const REFILL_EPSILON: f64 = 0.001;

/// Rolling-window token accounting layered over a [`SlidingWindow`].
#[derive(Debug)]
pub struct TokenBucket {
    budget: TokenBudget,
    clock: Arc<dyn Clock>,
    window: Mutex<SlidingWindow>,
}

impl TokenBucket {
    pub fn new(budget: TokenBudget, clock: Arc<dyn Clock>) -> Self {
        let window = SlidingWindow::new(budget.window_seconds, Arc::clone(&clock));
        Self {
            budget,
            clock,
            window: Mutex::new(window),
        }
    }

    /// Record token consumption at the current time.
    pub fn consume(&self, tokens: u64) {
        self.window.lock().unwrap().record_value(tokens as f64);
    }

    /// Tokens consumed within the current window.
    pub fn tokens_used(&self) -> u64 {
        self.window.lock().unwrap().total() as u64
    }

    /// Tokens still available within the current window.
    pub fn tokens_remaining(&self) -> u64 {
        self.budget.max_tokens.saturating_sub(self.tokens_used())
    }

    /// Suspend until at least `need` tokens are available.
    ///
    /// The next refill is deterministic: it happens exactly when the
    /// oldest live entry ages out of the window, so the wait sleeps to
    /// that point and rechecks instead of polling.
    pub async fn wait_for_budget(&self, need: u64) {
        loop {
            let sleep_secs = {
                let mut window = self.window.lock().unwrap();
                let used = window.total() as u64;
                if self.budget.max_tokens.saturating_sub(used) >= need {
                    return;
                }
                match window.oldest_timestamp() {
                    Some(oldest) => {
                        let expires_at = oldest + self.budget.window_seconds;
                        (expires_at - self.clock.now()).max(0.0) + REFILL_EPSILON
                    }
                    None => {
                        // Empty window but still short: the need exceeds the
                        // whole budget and no amount of waiting will help.
                        warn!(
                            need,
                            max_tokens = self.budget.max_tokens,
                            "token budget can never satisfy request"
                        );
                        return;
                    }
                }
            };
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
        }
    }
}
