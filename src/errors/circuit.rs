//! Circuit Breaker
//!
//! Per-operation failure guard, independent of the retry budget: once an
//! operation fails `threshold` consecutive times its circuit opens and
//! callers fail fast until the cooldown elapses. The first probe after the
//! cooldown runs half-open; its outcome decides the next state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ErrorHandlingConfig;

/// Circuit state for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Failing; callers must not attempt the operation
    Open,

    /// Cooldown elapsed; a single probe decides open vs. closed
    HalfOpen,
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

/// Per-operation circuit breaker table.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    circuits: Arc<RwLock<HashMap<String, CircuitEntry>>>,
}

impl CircuitBreaker {
    /// Create a breaker from error-handling configuration.
    pub fn new(config: &ErrorHandlingConfig) -> Self {
        Self {
            threshold: config.circuit_breaker_threshold,
            cooldown: Duration::from_millis(config.circuit_breaker_timeout_ms),
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether callers must skip `operation` right now.
    ///
    /// Transitions Open to HalfOpen when the cooldown has elapsed, in which
    /// case the caller is allowed through as the probe.
    pub async fn is_open(&self, operation: &str) -> bool {
        let mut circuits = self.circuits.write().await;
        let Some(entry) = circuits.get_mut(operation) else {
            return false;
        };

        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    info!(operation, "Circuit cooldown elapsed, transitioning to half-open");
                    entry.state = CircuitState::HalfOpen;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record the outcome of an attempt. Any success closes the circuit;
    /// failures accumulate toward the threshold, and a half-open failure
    /// reopens immediately.
    pub async fn record(&self, operation: &str, success: bool) {
        let mut circuits = self.circuits.write().await;
        let entry = circuits.entry(operation.to_string()).or_default();

        if success {
            if entry.state != CircuitState::Closed {
                info!(operation, "Circuit closed after successful attempt");
            }
            *entry = CircuitEntry::default();
            return;
        }

        entry.failure_count = entry.failure_count.saturating_add(1);
        match entry.state {
            CircuitState::HalfOpen => {
                warn!(operation, "Half-open probe failed, reopening circuit");
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
            }
            CircuitState::Closed if entry.failure_count >= self.threshold => {
                warn!(
                    operation,
                    failures = entry.failure_count,
                    "Failure threshold reached, opening circuit"
                );
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// Current state for an operation.
    pub async fn state(&self, operation: &str) -> CircuitState {
        let circuits = self.circuits.read().await;
        circuits
            .get(operation)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failure count for an operation.
    pub async fn failure_count(&self, operation: &str) -> u32 {
        let circuits = self.circuits.read().await;
        circuits.get(operation).map(|e| e.failure_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, timeout_ms: u64) -> ErrorHandlingConfig {
        ErrorHandlingConfig {
            circuit_breaker_threshold: threshold,
            circuit_breaker_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(&config(3, 60_000));

        for _ in 0..2 {
            breaker.record("spawn", false).await;
            assert!(!breaker.is_open("spawn").await);
        }

        breaker.record("spawn", false).await;
        assert!(breaker.is_open("spawn").await);
        assert_eq!(breaker.state("spawn").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets() {
        let breaker = CircuitBreaker::new(&config(3, 60_000));

        breaker.record("spawn", false).await;
        breaker.record("spawn", false).await;
        breaker.record("spawn", true).await;
        assert_eq!(breaker.failure_count("spawn").await, 0);

        // Threshold counts consecutive failures only
        breaker.record("spawn", false).await;
        breaker.record("spawn", false).await;
        assert!(!breaker.is_open("spawn").await);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(&config(1, 20));

        breaker.record("spawn", false).await;
        assert!(breaker.is_open("spawn").await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Cooldown elapsed: the next check lets a probe through
        assert!(!breaker.is_open("spawn").await);
        assert_eq!(breaker.state("spawn").await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(&config(1, 20));

        breaker.record("spawn", false).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!breaker.is_open("spawn").await);

        breaker.record("spawn", false).await;
        assert!(breaker.is_open("spawn").await);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(&config(1, 20));

        breaker.record("spawn", false).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!breaker.is_open("spawn").await);

        breaker.record("spawn", true).await;
        assert_eq!(breaker.state("spawn").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_operations_are_independent() {
        let breaker = CircuitBreaker::new(&config(1, 60_000));

        breaker.record("spawn", false).await;
        assert!(breaker.is_open("spawn").await);
        assert!(!breaker.is_open("verify").await);
    }
}
