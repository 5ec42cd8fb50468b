//! Exponential backoff retry policy for stage execution (§4.E).
//!
//! `maxAttempts = (node.maxRetries OR graph.defaultMaxRetry OR 0) + 1`.
//! Between attempts the engine sleeps
//! `delay(attempt) = min(initial * factor^(attempt-1), maxDelay) * (0.5 + U[0,1])`,
//! with `initial = 200ms`, `factor = 2.0`, `maxDelay = 60s`. `attempt` is
//! 1-indexed to match this formula directly.

use rand::Rng;
use std::time::Duration;

/// Tunable backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `maxAttempts = (nodeMaxRetries OR graphDefaultMaxRetry OR 0) + 1`.
    pub fn max_attempts(node_max_retries: Option<u32>, graph_default_max_retry: Option<u32>) -> u32 {
        node_max_retries.or(graph_default_max_retry).unwrap_or(0) + 1
    }

    /// Delay before the given 1-indexed attempt number, with jitter drawn
    /// fresh each call (`0.5 + U[0,1]`, i.e. a factor in `[0.5, 1.5)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter = 0.5 + rng.gen::<f64>();
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic variant for tests: caller supplies the jitter factor.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial.as_secs_f64() * self.factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_attempts_prefers_node_over_graph_default() {
        assert_eq!(RetryPolicy::max_attempts(Some(2), Some(5)), 3);
        assert_eq!(RetryPolicy::max_attempts(None, Some(5)), 6);
        assert_eq!(RetryPolicy::max_attempts(None, None), 1);
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_with_jitter(1, 1.0),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.delay_with_jitter(2, 1.0),
            Duration::from_millis(400)
        );
        assert_eq!(
            policy.delay_with_jitter(3, 1.0),
            Duration::from_millis(800)
        );
        // At large attempt numbers the delay is capped at max_delay.
        let huge = policy.delay_with_jitter(40, 1.0);
        assert_eq!(huge, Duration::from_secs(60));
    }

    #[test]
    fn jitter_scales_the_capped_delay() {
        let policy = RetryPolicy::default();
        let half = policy.delay_with_jitter(1, 0.5);
        let full = policy.delay_with_jitter(1, 1.5);
        assert_eq!(half, Duration::from_millis(100));
        assert_eq!(full, Duration::from_millis(300));
    }
}
