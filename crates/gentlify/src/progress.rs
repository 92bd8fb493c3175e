//! Completion counting, milestone detection, rolling ETA.

use std::collections::VecDeque;

/// Recent-duration samples kept for the rolling ETA.
const ROLLING_SAMPLE_CAPACITY: usize = 50;

/// Completion percentage step at which milestones fire.
const MILESTONE_STEP_PCT: f64 = 10.0;

/// Tracks task completion, detects milestones, and estimates time
/// remaining from a rolling average of recent task durations.
///
/// Not internally synchronized; the owner serializes access.
#[derive(Debug)]
pub struct ProgressTracker {
    total_tasks: u64,
    milestone_pct: f64,
    completed: u64,
    durations: VecDeque<f64>,
    last_milestone: u64,
}

impl ProgressTracker {
    pub fn new(total_tasks: u64) -> Self {
        Self::with_milestone_pct(total_tasks, MILESTONE_STEP_PCT)
    }

    pub fn with_milestone_pct(total_tasks: u64, milestone_pct: f64) -> Self {
        Self {
            total_tasks,
            milestone_pct,
            completed: 0,
            durations: VecDeque::with_capacity(ROLLING_SAMPLE_CAPACITY),
            last_milestone: 0,
        }
    }

    /// Record one completion. Returns true exactly when a milestone index
    /// was crossed.
    pub fn record_completion(&mut self, duration: f64) -> bool {
        self.completed += 1;
        if self.durations.len() == ROLLING_SAMPLE_CAPACITY {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);

        if self.total_tasks == 0 || self.milestone_pct <= 0.0 {
            return false;
        }
        let current = (self.percentage() / self.milestone_pct) as u64;
        if current > self.last_milestone {
            self.last_milestone = current;
            true
        } else {
            false
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Completion percentage, clamped to 100. Zero when no total is known.
    pub fn percentage(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        ((self.completed as f64 / self.total_tasks as f64) * 100.0).min(100.0)
    }

    /// Estimated seconds remaining, from the rolling average duration.
    /// None when no total is known or no samples exist yet.
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.durations.is_empty() || self.total_tasks == 0 {
            return None;
        }
        let remaining = self.total_tasks.saturating_sub(self.completed);
        if remaining == 0 {
            return Some(0.0);
        }
        let avg = self.durations.iter().sum::<f64>() / self.durations.len() as f64;
        Some(avg * remaining as f64)
    }
}
