//! # Fibonacci Backoff
//!
//! Progressive retry delays: `min * fib(n)` for the n-th retry
//! (1, 1, 2, 3, 5, 8, ... times `min`), capped at `max`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// `max` is raised to `min` if smaller
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let (mut current, mut next) = (1u32, 1u32);
        for _ in 0..attempt {
            if self.min.saturating_mul(current) >= self.max {
                break;
            }
            (current, next) = (next, current.saturating_add(next));
        }
        self.min.saturating_mul(current).min(self.max)
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        use crate::constants::{DEFAULT_RETRY_MAX_MS, DEFAULT_RETRY_MIN_MS};
        Self::new(
            Duration::from_millis(DEFAULT_RETRY_MIN_MS),
            Duration::from_millis(DEFAULT_RETRY_MAX_MS),
        )
    }
}
