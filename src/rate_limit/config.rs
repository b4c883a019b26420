//! Rate Limit Configuration
//!
//! Limits for the sliding windows and the anomaly detector. The anomaly
//! thresholds default to conservative values and are deliberately exposed
//! as configuration: they have not been empirically tuned.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,

    /// Maximum requests per client within the sustained window
    pub max_requests: u32,

    /// Sustained window length in milliseconds
    pub window_ms: u64,

    /// Maximum requests per client within the burst window
    pub burst_limit: u32,

    /// Burst window length in milliseconds
    pub burst_window_ms: u64,

    /// How long an anomaly block lasts, in milliseconds
    pub block_duration_ms: u64,

    /// Attempts within the rapid-fire window that trigger a block
    pub rapid_fire_threshold: u32,

    /// Rapid-fire window length in milliseconds
    pub rapid_fire_window_ms: u64,

    /// Identical command lines within the sustained window that trigger a block
    pub identical_command_threshold: u32,

    /// Recorded errors that trigger a block
    pub error_threshold: u32,

    /// Requests of a single command type within the sustained window that
    /// trigger a block
    pub per_type_threshold: u32,

    /// Interval between cleanup passes, in milliseconds
    pub cleanup_interval_ms: u64,

    /// Idle time after which a client's state is dropped, in milliseconds
    pub inactive_ttl_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_ms: 60_000,
            burst_limit: 10,
            burst_window_ms: 10_000,
            block_duration_ms: 300_000,
            rapid_fire_threshold: 15,
            rapid_fire_window_ms: 2_000,
            identical_command_threshold: 20,
            error_threshold: 10,
            per_type_threshold: 50,
            cleanup_interval_ms: 60_000,
            inactive_ttl_ms: 600_000,
        }
    }
}

impl RateLimitConfig {
    /// Configuration with rate limiting turned off (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Sustained window as a [`Duration`]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Burst window as a [`Duration`]
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    /// Block duration as a [`Duration`]
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    /// Rapid-fire window as a [`Duration`]
    pub fn rapid_fire_window(&self) -> Duration {
        Duration::from_millis(self.rapid_fire_window_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 || self.burst_limit == 0 {
            anyhow::bail!("rate_limit request limits must be greater than zero");
        }
        if self.burst_window_ms > self.window_ms {
            anyhow::bail!("rate_limit.burst_window_ms must not exceed window_ms");
        }
        if self.burst_limit > self.max_requests {
            anyhow::bail!("rate_limit.burst_limit must not exceed max_requests");
        }
        if self.block_duration_ms == 0 {
            anyhow::bail!("rate_limit.block_duration_ms must be greater than zero");
        }
        Ok(())
    }
}
