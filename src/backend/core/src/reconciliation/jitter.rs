//! Randomized enqueue delay so cadences do not hit the gateway in lockstep.

use rand::Rng;

/// Inclusive delay bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn contains(&self, delay_ms: u64) -> bool {
        (self.min_ms..=self.max_ms).contains(&delay_ms)
    }
}

/// Picks a delay within a range.
pub trait JitterSource: Send + Sync {
    /// Must return a value inside `range`.
    fn sample_ms(&self, range: JitterRange) -> u64;
}

/// Uniform sampling from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample_ms(&self, range: JitterRange) -> u64 {
        if range.max_ms <= range.min_ms {
            return range.min_ms;
        }
        rand::rng().random_range(range.min_ms..=range.max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_rng_stays_in_range() {
        let range = JitterRange::new(60_000, 300_000);
        for _ in 0..1_000 {
            assert!(range.contains(ThreadRngJitter.sample_ms(range)));
        }
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(ThreadRngJitter.sample_ms(JitterRange::new(500, 500)), 500);
    }
}
