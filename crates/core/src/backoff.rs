//! Retry backoff policy engine
//!
//! Computes the delay between repeated connection attempts under a
//! configurable strategy, tracks attempt metrics, and adapts its initial
//! interval across connection lifecycles via [`BackoffPolicy::adaptive_reset`].

use crate::config::{BackoffConfig, BackoffStrategy};
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Fibonacci index cap; beyond this the sequence is far past any sane
/// maximum interval and `u64` math would eventually overflow.
const FIB_MAX_INDEX: usize = 32;

/// Success rate above which the initial interval shrinks
const ADAPTIVE_SHRINK_ABOVE: f64 = 0.8;

/// Success rate below which the initial interval grows
const ADAPTIVE_GROW_BELOW: f64 = 0.3;

/// Snapshot of backoff metrics
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffMetrics {
    /// Total intervals handed out since the last reset
    pub total_attempts: u64,

    /// Sum of all handed-out intervals in milliseconds
    pub total_wait_ms: u64,

    /// Epoch milliseconds of the most recent attempt, if any
    pub last_attempt_ms: Option<u64>,

    /// Attempts in the current unbroken retry sequence
    pub streak: u32,

    /// `total_wait_ms / total_attempts`; the configured initial interval
    /// when no attempts have occurred
    pub average_interval_ms: f64,
}

/// Backoff policy engine
///
/// Owned exclusively by one connection orchestrator instance. Not shared:
/// interior state advances on every [`next_interval`](Self::next_interval)
/// call.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,

    /// Adaptive initial interval; starts at `config.initial_ms` and moves
    /// within `[adaptive_floor_ms, adaptive_ceil_ms]` across lifecycles
    initial_ms: u64,

    /// Current interval for the exponential strategy
    current_ms: u64,

    streak: u32,
    total_attempts: u64,
    total_wait_ms: u64,
    last_attempt_ms: Option<u64>,

    /// Memoized Fibonacci values (1, 1, 2, 3, 5, ...)
    fib_cache: Vec<u64>,
}

impl BackoffPolicy {
    /// Create a policy from its configuration
    pub fn new(config: BackoffConfig) -> Self {
        let initial_ms = config.initial_ms;
        Self {
            config,
            initial_ms,
            current_ms: initial_ms,
            streak: 0,
            total_attempts: 0,
            total_wait_ms: 0,
            last_attempt_ms: None,
            fib_cache: vec![1, 1],
        }
    }

    /// Compute the next retry interval and advance internal state
    ///
    /// The strategy produces an unjittered base, a uniform jitter in
    /// `[0, base * jitter_factor)` is added, and the result is clamped to
    /// the configured maximum. The jittered value never drops below the
    /// unjittered base.
    pub fn next_interval(&mut self) -> Duration {
        let base = match self.config.strategy {
            BackoffStrategy::Exponential => {
                let base = self.current_ms;
                let next = (self.current_ms as f64 * self.config.multiplier) as u64;
                self.current_ms = next.min(self.config.max_ms);
                base
            }
            BackoffStrategy::Linear => {
                (self.initial_ms + self.streak as u64 * 1000).min(self.config.max_ms)
            }
            BackoffStrategy::Fibonacci => {
                (self.fib(self.streak as usize).saturating_mul(1000)).min(self.config.max_ms)
            }
        };

        let jittered = if self.config.jitter_factor > 0.0 {
            let jitter_span = base as f64 * self.config.jitter_factor;
            let jitter = rand::thread_rng().gen_range(0.0..jitter_span.max(f64::MIN_POSITIVE));
            base + jitter as u64
        } else {
            base
        };

        // Clamping to max_ms cannot undercut the base: every strategy caps
        // its base at max_ms first.
        let interval_ms = jittered.min(self.config.max_ms).max(base.min(self.config.max_ms));

        self.streak += 1;
        self.total_attempts += 1;
        self.total_wait_ms += interval_ms;
        self.last_attempt_ms = Some(crate::signaling::protocol::epoch_ms());

        debug!(
            strategy = ?self.config.strategy,
            streak = self.streak,
            interval_ms,
            "Backoff interval computed"
        );

        Duration::from_millis(interval_ms)
    }

    /// Snapshot current metrics
    pub fn metrics(&self) -> BackoffMetrics {
        let average_interval_ms = if self.total_attempts == 0 {
            self.initial_ms as f64
        } else {
            self.total_wait_ms as f64 / self.total_attempts as f64
        };

        BackoffMetrics {
            total_attempts: self.total_attempts,
            total_wait_ms: self.total_wait_ms,
            last_attempt_ms: self.last_attempt_ms,
            streak: self.streak,
            average_interval_ms,
        }
    }

    /// Restore the initial interval and zero all metrics
    ///
    /// Called on every successful connection.
    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
        self.streak = 0;
        self.total_attempts = 0;
        self.total_wait_ms = 0;
        self.last_attempt_ms = None;
    }

    /// Adapt the initial interval to the observed success rate, then reset
    ///
    /// A success rate above 0.8 shrinks the initial interval by 20% (floored
    /// at `adaptive_floor_ms`); below 0.3 grows it by 20% (ceilinged at
    /// `adaptive_ceil_ms`). Rates in between leave it unchanged.
    pub fn adaptive_reset(&mut self, success_rate: f64) {
        if success_rate > ADAPTIVE_SHRINK_ABOVE {
            self.initial_ms =
                ((self.initial_ms as f64 * 0.8) as u64).max(self.config.adaptive_floor_ms);
        } else if success_rate < ADAPTIVE_GROW_BELOW {
            self.initial_ms =
                ((self.initial_ms as f64 * 1.2) as u64).min(self.config.adaptive_ceil_ms);
        }

        debug!(
            success_rate,
            initial_ms = self.initial_ms,
            "Adaptive backoff reset"
        );

        self.reset();
    }

    /// Current initial interval in milliseconds (moves under adaptive resets)
    pub fn initial_ms(&self) -> u64 {
        self.initial_ms
    }

    /// Memoized Fibonacci lookup, capped at [`FIB_MAX_INDEX`]
    fn fib(&mut self, index: usize) -> u64 {
        let index = index.min(FIB_MAX_INDEX);
        while self.fib_cache.len() <= index {
            let n = self.fib_cache.len();
            let next = self.fib_cache[n - 1].saturating_add(self.fib_cache[n - 2]);
            self.fib_cache.push(next);
        }
        self.fib_cache[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, BackoffStrategy};

    fn config(strategy: BackoffStrategy, jitter: f64) -> BackoffConfig {
        BackoffConfig {
            strategy,
            initial_ms: 2000,
            max_ms: 30000,
            multiplier: 2.0,
            jitter_factor: jitter,
            adaptive_floor_ms: 1000,
            adaptive_ceil_ms: 5000,
        }
    }

    #[test]
    fn test_exponential_first_interval_within_jitter_band() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.25));
        let first = policy.next_interval().as_millis() as u64;
        assert!((2000..2500).contains(&first), "got {}", first);
    }

    #[test]
    fn test_exponential_unjittered_doubling_and_clamp() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));

        let expected = [2000, 4000, 8000, 16000, 30000, 30000];
        for (n, want) in expected.iter().enumerate() {
            let got = policy.next_interval().as_millis() as u64;
            assert_eq!(got, *want, "attempt {}", n);
        }
    }

    #[test]
    fn test_linear_growth() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Linear, 0.0));

        assert_eq!(policy.next_interval(), Duration::from_millis(2000));
        assert_eq!(policy.next_interval(), Duration::from_millis(3000));
        assert_eq!(policy.next_interval(), Duration::from_millis(4000));
    }

    #[test]
    fn test_fibonacci_growth_and_clamp() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Fibonacci, 0.0));

        let expected = [1000, 1000, 2000, 3000, 5000, 8000, 13000, 21000, 30000];
        for want in expected {
            assert_eq!(policy.next_interval(), Duration::from_millis(want));
        }
    }

    #[test]
    fn test_jitter_never_undercuts_base() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Linear, 0.9));
        for streak in 0..10u64 {
            let base = 2000 + streak * 1000;
            let got = policy.next_interval().as_millis() as u64;
            assert!(got >= base, "interval {} below base {}", got, base);
            assert!(got <= 30000);
        }
    }

    #[test]
    fn test_metrics_zero_attempts() {
        let policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.25));
        let metrics = policy.metrics();
        assert_eq!(metrics.total_attempts, 0);
        assert_eq!(metrics.average_interval_ms, 2000.0);
        assert!(metrics.last_attempt_ms.is_none());
    }

    #[test]
    fn test_metrics_accumulate() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        policy.next_interval();
        policy.next_interval();

        let metrics = policy.metrics();
        assert_eq!(metrics.total_attempts, 2);
        assert_eq!(metrics.streak, 2);
        assert_eq!(metrics.total_wait_ms, 6000);
        assert_eq!(metrics.average_interval_ms, 3000.0);
        assert!(metrics.last_attempt_ms.is_some());
    }

    #[test]
    fn test_reset_restores_initial_and_zeroes_metrics() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        policy.next_interval();
        policy.next_interval();
        policy.reset();

        let metrics = policy.metrics();
        assert_eq!(metrics.total_attempts, 0);
        assert_eq!(metrics.streak, 0);
        assert_eq!(policy.next_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_adaptive_reset_shrinks_on_high_success() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        policy.adaptive_reset(0.9);
        assert_eq!(policy.initial_ms(), 1600);
        assert_eq!(policy.next_interval(), Duration::from_millis(1600));
    }

    #[test]
    fn test_adaptive_reset_grows_on_low_success() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        policy.adaptive_reset(0.1);
        assert_eq!(policy.initial_ms(), 2400);
    }

    #[test]
    fn test_adaptive_reset_unchanged_in_midband() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        policy.adaptive_reset(0.5);
        assert_eq!(policy.initial_ms(), 2000);
    }

    #[test]
    fn test_adaptive_reset_floor_and_ceiling() {
        let mut policy = BackoffPolicy::new(config(BackoffStrategy::Exponential, 0.0));
        for _ in 0..10 {
            policy.adaptive_reset(0.95);
        }
        assert_eq!(policy.initial_ms(), 1000);

        for _ in 0..10 {
            policy.adaptive_reset(0.05);
        }
        assert_eq!(policy.initial_ms(), 5000);
    }

    #[test]
    fn test_fibonacci_index_cap_is_finite() {
        let mut policy = BackoffPolicy::new(BackoffConfig {
            strategy: BackoffStrategy::Fibonacci,
            max_ms: u64::MAX,
            jitter_factor: 0.0,
            ..config(BackoffStrategy::Fibonacci, 0.0)
        });

        // Way past the cap; must neither overflow nor grow without bound.
        let mut last = Duration::ZERO;
        for _ in 0..100 {
            last = policy.next_interval();
        }
        assert_eq!(last, policy.next_interval());
    }
}
