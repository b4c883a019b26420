//! Rate Limiting
//!
//! Sliding-window throttling (burst + sustained) with anomaly-based client
//! blocking. Per-client state is created lazily, pruned on a timer, and
//! blocks expire on their own.

pub mod anomaly;
pub mod config;
pub mod limiter;
pub mod window;

pub use anomaly::AnomalyKind;
pub use config::RateLimitConfig;
pub use limiter::{DenialReason, RateLimitDecision, RateLimiter};
pub use window::BlockRecord;
