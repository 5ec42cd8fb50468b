//! Retry utilities for async operations
//!
//! Provides configurable retry policies with exponential backoff and jitter
//! for handling transient failures in async operations.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Configuration for retrying failed operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum number of attempts (including first)
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagegraph_toolkit::async_utils::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed)
    ///
    /// Uses exponential backoff: initial_interval * (backoff_factor ^ attempt)
    /// Capped at max_interval, with optional jitter.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }

        // Calculate base delay with exponential backoff
        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);

        // Cap at max_interval
        let capped_delay = base_delay.min(self.max_interval);

        // Add jitter if enabled (random factor between 0.5 and 1.5)
        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Retry state for tracking retry attempts
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Number of attempts made so far
    pub attempts: usize,

    /// Last error message
    pub last_error: Option<String>,
}

impl RetryState {
    /// Create a new retry state
    pub fn new() -> Self {
        Self {
            attempts: 0,
            last_error: None,
        }
    }

    /// Record an attempt
    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    /// Reset the retry state
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute an async operation with retry logic
///
/// # Arguments
///
/// * `policy` - Retry policy to use
/// * `operation` - Async operation to execute (must be retryable/idempotent)
///
/// # Returns
///
/// Result of the operation after all retries
///
/// # Example
///
/// ```rust,ignore
/// use stagegraph_toolkit::async_utils::retry::{RetryPolicy, with_retry};
///
/// async fn call_api() -> Result<String, String> {
///     // API call that may fail
///     Ok("success".to_string())
/// }
///
/// let policy = RetryPolicy::new(3);
/// let result = with_retry(&policy, || call_api()).await?;
/// ```
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                tracing::debug!(
                    "Attempt {} failed: {}. Retrying...",
                    attempt + 1,
                    error
                );

                last_error = Some(error);

                // Check if we should retry
                if !policy.should_retry(attempt + 1) {
                    break;
                }

                // Calculate and sleep for the delay
                let delay = policy.calculate_delay(attempt);
                tracing::debug!("Waiting {:?} before retry", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    // All retries exhausted, return last error
    Err(last_error.expect("Should have error after exhausting retries"))
}

/// Check if an error message indicates a transient error that should be retried
///
/// Recognizes common transient error patterns:
/// - Connection errors
/// - Timeouts
/// - Rate limits
/// - 5xx HTTP status codes
/// - Service unavailable
///
/// # Arguments
///
/// * `error_msg` - Error message to check
///
/// # Returns
///
/// `true` if the error appears to be transient
///
/// # Example
///
/// ```rust
/// use stagegraph_toolkit::async_utils::retry::is_retryable_error;
///
/// assert!(is_retryable_error("Connection timeout"));
/// assert!(is_retryable_error("503 Service Unavailable"));
/// assert!(!is_retryable_error("404 Not Found"));
/// ```
pub fn is_retryable_error(error_msg: &str) -> bool {
    let lower = error_msg.to_lowercase();

    lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("rate limit")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("502")
        || lower.contains("500")
        || lower.contains("unavailable")
        || lower.contains("too many requests")
        || lower.contains("retry")
}

/// Extract retry-after duration from error message or headers
///
/// Looks for common patterns like:
/// - "Retry after 30 seconds"
/// - "retry-after: 60"
/// - "Rate limit reset in 120s"
///
/// # Arguments
///
/// * `error_msg` - Error message or header value
///
/// # Returns
///
/// Parsed duration if found, None otherwise
///
/// # Example
///
/// ```rust
/// use stagegraph_toolkit::async_utils::retry::extract_retry_after;
/// use std::time::Duration;
///
/// let duration = extract_retry_after("Retry after 30 seconds");
/// assert_eq!(duration, Some(Duration::from_secs(30)));
///
/// let duration = extract_retry_after("retry-after: 60");
/// assert_eq!(duration, Some(Duration::from_secs(60)));
/// ```
pub fn extract_retry_after(error_msg: &str) -> Option<Duration> {
    let lower = error_msg.to_lowercase();

    // Try to find patterns like "retry after 30" or "retry-after: 30"
    if let Some(pos) = lower.find("retry") {
        if let Some(after_pos) = lower[pos..].find("after") {
            let rest = &lower[pos + after_pos + 5..];

            // Extract first number we find
            let num_str: String = rest
                .chars()
                .skip_while(|c| !c.is_numeric())
                .take_while(|c| c.is_numeric())
                .collect();

            if let Ok(seconds) = num_str.parse::<u64>() {
                return Some(Duration::from_secs(seconds));
            }
        }
    }

    // Try pattern like "reset in 120s"
    if let Some(pos) = lower.find("reset in") {
        let rest = &lower[pos + 8..];
        let num_str: String = rest
            .chars()
            .skip_while(|c| !c.is_numeric())
            .take_while(|c| c.is_numeric())
            .collect();

        if let Ok(seconds) = num_str.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
    }

    None
}
