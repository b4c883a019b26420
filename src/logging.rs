//! Logging Initialization
//!
//! Sets up the tracing subscriber from [`LoggingConfig`]. Called once by
//! the embedding service at startup; a second call is a no-op error from
//! the subscriber, which is surfaced rather than swallowed.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// The configured level is the default directive; `RUST_LOG` still takes
/// precedence for targeted overrides.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            config
                .level
                .parse()
                .with_context(|| format!("Invalid log level '{}'", config.level))?,
        )
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "shouting".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_init_is_single_shot() {
        let config = LoggingConfig::default();
        // First call may succeed or fail depending on test ordering; the
        // second must fail because the global subscriber is already set.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
