// Configuration File Support
//
// This module provides configuration file parsing for the toolguard policy
// core. Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory:
// ~/.config/toolguard/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::rate_limit::RateLimitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Policy engine configuration
    pub policy: PolicyConfig,

    /// Input validation limits
    pub validation: ValidationConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Command execution configuration
    pub execution: ExecutionConfig,

    /// Error handling and retry configuration
    pub error_handling: ErrorHandlingConfig,

    /// Trusted tool verification configuration
    pub trust: TrustConfig,

    /// Audit log configuration
    pub audit: AuditConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Log file path (if log_to_file is true)
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_to_file: false,
            log_file: None,
        }
    }
}

/// Enforcement mode for the policy engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Non-enforcing shadow mode: would-be Block/Consent decisions are
    /// returned as Allow with a warning attached
    Monitor,

    /// Block decisions are enforced; Consent decisions are downgraded to
    /// Allow with a warning
    Warn,

    /// Full enforcement
    Block,
}

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Enforcement mode
    pub mode: PolicyMode,

    /// Maximum number of cached Allow decisions
    pub cache_capacity: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Block,
            cache_capacity: 256,
        }
    }
}

/// Input validation limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum command length in bytes
    pub max_command_length: usize,

    /// Maximum length of a single argument in bytes
    pub max_arg_length: usize,

    /// Maximum number of arguments
    pub max_total_args: usize,

    /// Maximum number of path components in a path argument
    pub max_path_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_command_length: 256,
            max_arg_length: 1024,
            max_total_args: 64,
            max_path_depth: 16,
        }
    }
}

/// How aggressively the executor gates destructive operations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Consent required for any command that can modify the filesystem
    Strict,

    /// Consent required for destructive and network-fetching commands
    Balanced,

    /// Consent required only for commands the table flags explicitly
    Permissive,
}

/// Command execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Directory all resolved paths must stay within
    pub workspace_root: String,

    /// Hard cap on captured output in bytes; exceeding it kills the process
    pub max_output_size: usize,

    /// Wall-clock timeout in milliseconds; exceeding it kills the process
    pub timeout_ms: u64,

    /// Consent gating aggressiveness
    pub security_level: SecurityLevel,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workspace_root: ".".to_string(),
            max_output_size: 1024 * 1024,
            timeout_ms: 30_000,
            security_level: SecurityLevel::Balanced,
        }
    }
}

/// Error handling and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// Maximum retry attempts per (operation, error type)
    pub max_retry_attempts: u32,

    /// Base retry delay in milliseconds (doubled per attempt)
    pub retry_delay_ms: u64,

    /// Consecutive failures before the circuit opens
    pub circuit_breaker_threshold: u32,

    /// Cooldown before an open circuit transitions to half-open, in ms
    pub circuit_breaker_timeout_ms: u64,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_delay_ms: 100,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 30_000,
        }
    }
}

/// Trusted tool verification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrustConfig {
    /// Verification cache TTL in milliseconds
    pub cache_ttl_ms: u64,

    /// Accept tools found outside their registered paths
    pub allow_self_signed: bool,

    /// Optional TOML registry file merged over built-in entries at startup
    pub registry_path: Option<String>,

    /// Optional JSON file persisting learned fingerprints
    pub learned_store_path: Option<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            allow_self_signed: false,
            registry_path: None,
            learned_store_path: None,
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum retained entries; oldest are dropped first
    pub capacity: usize,

    /// Optional JSON export path
    pub export_path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            export_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/toolguard/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "toolguard", "toolguard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("toolguard")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TOOLGUARD_LOG_LEVEL
    /// - TOOLGUARD_LOG_FORMAT
    /// - TOOLGUARD_MODE
    /// - TOOLGUARD_SECURITY_LEVEL
    /// - TOOLGUARD_WORKSPACE_ROOT
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("TOOLGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TOOLGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(mode) = std::env::var("TOOLGUARD_MODE") {
            match mode.to_lowercase().as_str() {
                "monitor" => self.policy.mode = PolicyMode::Monitor,
                "warn" => self.policy.mode = PolicyMode::Warn,
                "block" => self.policy.mode = PolicyMode::Block,
                other => tracing::warn!("Ignoring unknown TOOLGUARD_MODE '{}'", other),
            }
        }

        if let Ok(level) = std::env::var("TOOLGUARD_SECURITY_LEVEL") {
            match level.to_lowercase().as_str() {
                "strict" => self.execution.security_level = SecurityLevel::Strict,
                "balanced" => self.execution.security_level = SecurityLevel::Balanced,
                "permissive" => self.execution.security_level = SecurityLevel::Permissive,
                other => tracing::warn!("Ignoring unknown TOOLGUARD_SECURITY_LEVEL '{}'", other),
            }
        }

        if let Ok(root) = std::env::var("TOOLGUARD_WORKSPACE_ROOT") {
            self.execution.workspace_root = root;
        }

        self
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistent value found.
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout_ms == 0 {
            anyhow::bail!("execution.timeout_ms must be greater than zero");
        }
        if self.execution.max_output_size == 0 {
            anyhow::bail!("execution.max_output_size must be greater than zero");
        }
        if self.validation.max_command_length == 0 || self.validation.max_arg_length == 0 {
            anyhow::bail!("validation length limits must be greater than zero");
        }
        if self.error_handling.circuit_breaker_threshold == 0 {
            anyhow::bail!("error_handling.circuit_breaker_threshold must be at least 1");
        }
        if self.error_handling.max_retry_attempts > 10 {
            anyhow::bail!("error_handling.max_retry_attempts must be at most 10");
        }
        self.rate_limit.validate()?;
        Ok(())
    }

    /// Save configuration to a file in TOML format
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file to {:?}", path))?;

        Ok(())
    }
}
