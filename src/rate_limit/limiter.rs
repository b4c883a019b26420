//! Rate Limiter
//!
//! Per-client throttling evaluated in a fixed order: active block, anomaly
//! thresholds, burst window, sustained window. A request passing all four
//! is recorded and granted its remaining quota.
//!
//! Two concurrent requests from the same client may race benignly on that
//! client's window: rate limiting is best-effort DoS mitigation, not a
//! strict consistency boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::anomaly::AnomalyKind;
use super::config::RateLimitConfig;
use super::window::{BlockRecord, ClientState};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenialReason {
    #[error("client is blocked: {reason}")]
    ClientBlocked { reason: String },

    #[error("anomaly detected: {kind}")]
    AnomalyDetected { kind: AnomalyKind },

    #[error("burst limit exceeded")]
    BurstLimitExceeded,

    #[error("rate limit exceeded")]
    RateLimitExceeded,
}

impl DenialReason {
    /// Stable machine-readable code for audit entries and callers.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::ClientBlocked { .. } => "CLIENT_BLOCKED",
            DenialReason::AnomalyDetected { .. } => "ANOMALY_DETECTED",
            DenialReason::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
            DenialReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Remaining sustained-window quota after this request
    pub remaining: u32,

    /// Time until quota frees up or a block expires (if denied)
    pub retry_after: Option<Duration>,

    /// Reason for denial (if denied)
    pub denial: Option<DenialReason>,
}

impl RateLimitDecision {
    fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            denial: None,
        }
    }

    fn denied(denial: DenialReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
            denial: Some(denial),
        }
    }
}

/// Sliding-window rate limiter with anomaly blocking.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Arc<RwLock<HashMap<String, ClientState>>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a limiter that allows everything (for testing).
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Evaluate a request from `client_id` for the given command line.
    ///
    /// Checks run in order: hard block, anomaly thresholds, burst window,
    /// sustained window. The attempt is observed by the anomaly tracker
    /// even when a later window check denies it.
    pub async fn check(&self, client_id: &str, command_line: &str) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::allowed(u32::MAX);
        }

        let now = Instant::now();
        let command_type = command_line.split_whitespace().next().unwrap_or("");

        let mut clients = self.clients.write().await;
        let state = clients.entry(client_id.to_string()).or_default();

        // 1. Active block pre-empts everything.
        if let Some(block) = &state.block {
            if !block.is_expired(now) {
                let remaining = block.remaining(now);
                debug!(
                    client_id,
                    remaining_secs = remaining.as_secs(),
                    "Request from blocked client denied"
                );
                return RateLimitDecision::denied(
                    DenialReason::ClientBlocked {
                        reason: block.reason.clone(),
                    },
                    remaining,
                );
            }
            info!(client_id, "Block expired, unblocking client");
            state.block = None;
            state.anomaly.reset();
        }

        // 2. Anomaly thresholds. The current attempt counts.
        state.anomaly.prune(now, &self.config);
        state.anomaly.observe(now, command_line, command_type);
        if let Some(kind) = state.anomaly.detect(now, &self.config) {
            let until = now + self.config.block_duration();
            warn!(client_id, %kind, "Anomaly threshold crossed, blocking client");
            state.block = Some(BlockRecord {
                until,
                reason: format!("anomaly: {kind}"),
            });
            return RateLimitDecision::denied(
                DenialReason::AnomalyDetected { kind },
                self.config.block_duration(),
            );
        }

        // 3. Burst window.
        state.window.prune(now, self.config.window());
        let burst_count = state.window.count_within(now, self.config.burst_window());
        if burst_count >= self.config.burst_limit {
            let retry = state.window.retry_after(now, self.config.burst_window());
            debug!(client_id, burst_count, "Burst limit exceeded");
            return RateLimitDecision::denied(DenialReason::BurstLimitExceeded, retry);
        }

        // 4. Sustained window.
        let sustained_count = state.window.count_within(now, self.config.window());
        if sustained_count >= self.config.max_requests {
            let retry = state.window.retry_after(now, self.config.window());
            debug!(client_id, sustained_count, "Sustained rate limit exceeded");
            return RateLimitDecision::denied(DenialReason::RateLimitExceeded, retry);
        }

        state.window.record(now);
        let remaining = self.config.max_requests - sustained_count - 1;
        RateLimitDecision::allowed(remaining)
    }

    /// Attribute an execution error to a client for error-rate detection.
    pub async fn record_error(&self, client_id: &str) {
        if !self.config.enabled {
            return;
        }
        let mut clients = self.clients.write().await;
        if let Some(state) = clients.get_mut(client_id) {
            state.anomaly.record_error();
        }
    }

    /// Whether a client is currently blocked.
    pub async fn is_blocked(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let clients = self.clients.read().await;
        clients
            .get(client_id)
            .and_then(|s| s.block.as_ref())
            .map(|b| !b.is_expired(now))
            .unwrap_or(false)
    }

    /// One cleanup pass: prune windows, expire blocks, drop idle clients.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window();
        let ttl = Duration::from_millis(self.config.inactive_ttl_ms);

        let mut clients = self.clients.write().await;
        for state in clients.values_mut() {
            state.window.prune(now, window);
            state.anomaly.prune(now, &self.config);
            if let Some(block) = &state.block {
                if block.is_expired(now) {
                    state.block = None;
                    state.anomaly.reset();
                }
            }
        }
        let before = clients.len();
        clients.retain(|_, state| !state.is_inactive(now, ttl));
        let dropped = before - clients.len();
        if dropped > 0 {
            debug!(dropped, "Dropped inactive rate-limit clients");
        }
    }

    /// Spawn a background task running [`cleanup`](Self::cleanup) on the
    /// configured interval. The task runs until aborted.
    pub fn start_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        let interval = Duration::from_millis(self.config.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.cleanup().await;
            }
        })
    }

    /// Number of tracked clients.
    pub async fn tracked_clients(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Current configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
