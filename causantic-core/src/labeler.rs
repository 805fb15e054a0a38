//! The `Labeler` trait: the external LLM-backed cluster-labeling
//! collaborator. Only the trait boundary and a rate limiter live in the
//! core; the implementation lives outside this crate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// A generated label for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLabel {
    /// Short human-readable name.
    pub name: String,
    /// Longer description.
    pub description: String,
}

/// External LLM-backed cluster labeler. Failures are non-fatal: the
/// cluster simply remains without a label.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Requests a label for a cluster given its exemplar texts and a
    /// soft token budget.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::External`] on failure; callers
    /// treat this as non-fatal and leave the cluster unlabeled.
    async fn label(&self, cluster_id: Uuid, exemplar_texts: &[String], budget: u32) -> Result<ClusterLabel>;
}

/// Fixed-window rate limiter guarding calls to the labeler, defaulting to
/// a 30 requests/minute ceiling for the `refresh-labels` task.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    /// Builds a limiter allowing `max_per_window` calls per `window`.
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Builds a limiter using the default 30 requests/minute policy.
    #[must_use]
    pub fn default_refresh_labels_limit() -> Self {
        Self::new(30, Duration::from_secs(60))
    }

    /// Whether a call is currently permitted; if so, counts it against
    /// the current window.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let (window_start, count) = &mut *state;
        if window_start.elapsed() >= self.window {
            *window_start = Instant::now();
            *count = 0;
        }
        if *count < self.max_per_window {
            *count += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_up_to_the_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn resets_after_the_window_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.try_acquire());
    }
}
