//! Exponential backoff retry policy for transient failures.
//!
//! Implements the retry schedule from the concurrency and resource model:
//! initial delay 1s, factor 2, cap 10s, up to 3 retries. Non-transient
//! failures are never retried.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Implemented by error types that know whether they are worth retrying.
pub trait Retryable {
    /// Whether this error represents a transient condition.
    fn is_recoverable(&self) -> bool;
}

impl Retryable for crate::error::Error {
    fn is_recoverable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Counters tracking how often retries were attempted and whether they
/// eventually succeeded.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl RetryMetrics {
    /// Creates an empty metrics counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one retried call.
    pub fn record_retry(&self, succeeded: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Total retried calls observed.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Retried calls that eventually succeeded.
    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    /// Retried calls that exhausted all attempts.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::SeqCst)
    }
}

/// Backoff schedule and retry budget.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Fraction of the computed delay to randomize (0.0 disables jitter).
    pub jitter_factor: f64,
    /// Optional cap on total retries across the policy's lifetime.
    pub max_retry_budget: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            max_retry_budget: None,
        }
    }
}

impl RetryConfig {
    /// Creates a config using the default engine-wide backoff schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the initial backoff delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Overrides the maximum backoff delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Overrides the jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Caps the total number of retries this policy instance will spend.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.max_retry_budget = Some(budget);
        self
    }
}

struct NonZeroBudget {
    remaining: u32,
}

/// Drives a fallible async operation through the configured backoff
/// schedule, stopping as soon as the error is non-recoverable or the
/// retry budget is exhausted.
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<RetryMetrics>,
    retry_budget: Option<NonZeroBudget>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Creates a policy using [`RetryConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
            metrics: None,
            retry_budget: None,
        }
    }

    /// Creates a policy from an explicit config.
    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        let retry_budget = config
            .max_retry_budget
            .map(|remaining| NonZeroBudget { remaining });

        Self {
            config,
            metrics: None,
            retry_budget,
        }
    }

    /// Attaches a metrics counter this policy will update.
    #[must_use]
    pub fn with_metrics(mut self, metrics: RetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay * 2u32.pow(attempt.saturating_sub(1));
        let delay = std::cmp::min(exp_delay, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted_ms as u64)
        } else {
            delay
        }
    }

    fn can_retry(&mut self) -> bool {
        if let Some(budget) = &mut self.retry_budget {
            if budget.remaining == 0 {
                return false;
            }
            budget.remaining -= 1;
        }
        true
    }

    fn record_success(&self, attempt: u32) {
        if attempt > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(true);
            }
        }
    }

    fn record_failure(&self, attempt: u32) {
        if attempt > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(false);
            }
        }
    }

    /// Runs `operation` until it succeeds, its error is non-recoverable, or
    /// the retry budget is exhausted.
    pub async fn execute<F, T, E, Fut>(&mut self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Debug,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    self.record_success(attempt);
                    return Ok(result);
                }
                Err(e) => {
                    let recoverable = e.is_recoverable();

                    if !recoverable || !self.can_retry() || attempt >= self.config.max_retries {
                        self.record_failure(attempt);
                        return Err(e);
                    }

                    attempt += 1;
                    let delay = self.calculate_delay(attempt);
                    warn!(?delay, attempt, "retrying after transient failure: {e:?}");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky {
        recoverable: bool,
    }

    impl Retryable for Flaky {
        fn is_recoverable(&self) -> bool {
            self.recoverable
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let mut policy = RetryPolicy::with_config(
            RetryConfig::new()
                .with_max_retries(5)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        );
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result = policy
            .execute(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Flaky { recoverable: true })
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_immediately_on_non_recoverable() {
        let mut policy = RetryPolicy::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), Flaky> = policy
            .execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Flaky { recoverable: false })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_after_max_retries() {
        let mut policy = RetryPolicy::with_config(
            RetryConfig::new()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        );
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), Flaky> = policy
            .execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Flaky { recoverable: true })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
