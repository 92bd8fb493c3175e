//! Injectable randomness for dispatch jitter and retry backoff.

use rand::Rng;

/// Source of uniform random samples.
///
/// Injected wherever the throttle draws jitter, so tests can pin the draw
/// to a fixed fraction of the range.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// Uniform sample in `[lo, hi)`. Returns `lo` when the range is empty.
    fn uniform(&self, lo: f64, hi: f64) -> f64;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRand;

impl RandomSource for ThreadRand {
    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        rand::thread_rng().gen_range(lo..hi)
    }
}

/// Deterministic source for tests: always returns
/// `lo + (hi - lo) * fraction`.
#[derive(Debug)]
pub struct FixedRand {
    fraction: f64,
}

impl FixedRand {
    pub fn new(fraction: f64) -> Self {
        Self { fraction }
    }

    /// Midpoint source, the conventional test default.
    pub fn midpoint() -> Self {
        Self::new(0.5)
    }
}

impl RandomSource for FixedRand {
    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rand_scales_to_range() {
        let rand = FixedRand::new(0.5);
        assert_eq!(rand.uniform(0.0, 10.0), 5.0);
        assert_eq!(rand.uniform(2.0, 4.0), 3.0);
    }

    #[test]
    fn fixed_rand_zero_returns_lower_bound() {
        let rand = FixedRand::new(0.0);
        assert_eq!(rand.uniform(1.0, 9.0), 1.0);
    }

    #[test]
    fn thread_rand_stays_in_range() {
        let rand = ThreadRand;
        for _ in 0..100 {
            let v = rand.uniform(1.0, 2.0);
            assert!((1.0..2.0).contains(&v));
        }
    }

    #[test]
    fn thread_rand_empty_range_returns_lo() {
        let rand = ThreadRand;
        assert_eq!(rand.uniform(3.0, 3.0), 3.0);
    }
}
