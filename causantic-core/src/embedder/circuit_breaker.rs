//! Circuit breaker guarding calls to external collaborators (embedder,
//! labeler), preventing cascading retries once a provider is clearly
//! down.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open state before the circuit
    /// closes again.
    pub success_threshold: u32,
    /// How long to wait before probing recovery.
    pub timeout_seconds: u64,
    /// Maximum probe attempts allowed in half-open state before
    /// reopening.
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 30,
            half_open_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32, consecutive_successes: u32 },
}

/// Externally observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected without attempting the operation.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

/// Returned by [`CircuitBreaker::guard`] when the circuit is open.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker is open, external collaborator unavailable")]
pub struct CircuitOpenError;

/// Tracks consecutive failures/successes for one external collaborator
/// and decides when to fail fast.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(State::Closed { consecutive_failures: 0 }),
            config,
        }
    }

    /// Current externally observable state, resolving an open breaker
    /// past its timeout into half-open.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let State::Open { opened_at } = *guard {
            if opened_at.elapsed() >= Duration::from_secs(self.config.timeout_seconds) {
                *guard = State::HalfOpen { attempts: 0, consecutive_successes: 0 };
            }
        }
        match *guard {
            State::Closed { .. } => CircuitBreakerState::Closed,
            State::Open { .. } => CircuitBreakerState::Open,
            State::HalfOpen { .. } => CircuitBreakerState::HalfOpen,
        }
    }

    /// Whether a call should be attempted right now.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        // Resolve a timed-out Open breaker into HalfOpen first.
        let _ = self.state();
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *guard {
            State::Open { .. } => false,
            State::Closed { .. } => true,
            State::HalfOpen { attempts, .. } => {
                if *attempts >= self.config.half_open_max_attempts {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = match *guard {
            State::Closed { .. } => State::Closed { consecutive_failures: 0 },
            State::HalfOpen { consecutive_successes, .. } => {
                let successes = consecutive_successes + 1;
                if successes >= self.config.success_threshold {
                    State::Closed { consecutive_failures: 0 }
                } else {
                    State::HalfOpen { attempts: 0, consecutive_successes: successes }
                }
            }
            State::Open { opened_at } => State::Open { opened_at },
        };
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = match *guard {
            State::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    State::Open { opened_at: Instant::now() }
                } else {
                    State::Closed { consecutive_failures: failures }
                }
            }
            State::HalfOpen { .. } => State::Open { opened_at: Instant::now() },
            State::Open { opened_at } => State::Open { opened_at },
        };
    }

    /// Runs `operation` if the circuit allows it, updating state from the
    /// outcome.
    pub async fn guard<F, T, E, Fut>(&self, operation: F) -> std::result::Result<T, CircuitOpenError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitOpenError);
        }
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(_) => {
                self.record_failure();
                Err(CircuitOpenError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn closes_after_success_threshold_in_half_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout_seconds: 0,
            half_open_max_attempts: 5,
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }
}
