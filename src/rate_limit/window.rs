//! Sliding Request Windows
//!
//! Per-client timestamped request log, filtered against the burst and
//! sustained windows. State is created lazily per client and pruned by the
//! limiter's cleanup pass.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::anomaly::AnomalyTracker;

/// A block placed on a client after an anomaly or operator action.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    /// When the block expires
    pub until: Instant,

    /// Why the client was blocked
    pub reason: String,
}

impl BlockRecord {
    /// Remaining block time, zero if expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.until.saturating_duration_since(now)
    }

    /// Whether the block has expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.until
    }
}

/// Timestamped log of a client's recent requests.
#[derive(Debug, Default)]
pub struct RequestWindow {
    timestamps: VecDeque<Instant>,
}

impl RequestWindow {
    /// Record a request at `now`.
    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Number of requests within `window` of `now`.
    pub fn count_within(&self, now: Instant, window: Duration) -> u32 {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.timestamps.iter().filter(|&&t| t >= cutoff).count() as u32
    }

    /// Time until the oldest request inside `window` falls out of it.
    ///
    /// This is the earliest moment a denied request could succeed.
    pub fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.timestamps
            .iter()
            .find(|&&t| t >= cutoff)
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop timestamps older than `window` relative to `now`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        while let Some(&front) = self.timestamps.front() {
            if front < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Timestamp of the most recent request.
    pub fn last_activity(&self) -> Option<Instant> {
        self.timestamps.back().copied()
    }

    /// Total retained timestamps (pruned and unpruned).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the window holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// All rate-limit state for one client.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Request timestamps for window checks
    pub window: RequestWindow,

    /// Anomaly counters
    pub anomaly: AnomalyTracker,

    /// Active block, if any
    pub block: Option<BlockRecord>,
}

impl ClientState {
    /// Whether the client has been idle longer than `ttl` and carries no
    /// active block.
    pub fn is_inactive(&self, now: Instant, ttl: Duration) -> bool {
        if let Some(block) = &self.block {
            if !block.is_expired(now) {
                return false;
            }
        }
        match self.window.last_activity() {
            Some(last) => now.saturating_duration_since(last) > ttl,
            None => true,
        }
    }
}
