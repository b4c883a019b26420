//! Error Taxonomy
//!
//! Every fault in the pipeline is categorized before anything reacts to it:
//! the category decides retry, circuit-breaking, structured rejection, or
//! immediate propagation. Block/Consent policy decisions are values, never
//! errors; only internal faults and critical violations surface here.

pub mod circuit;
pub mod handler;

pub use circuit::{CircuitBreaker, CircuitState};
pub use handler::{Disposition, ErrorContext, ErrorHandler, ErrorRecord};

use serde::Serialize;
use std::time::Duration;

/// Crate error type for the execution pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// A security invariant was violated (injection, escape attempt)
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Injection pattern found in supposedly-validated input
    #[error("injection detected: {0}")]
    InjectionDetected(String),

    /// A resolved path escaped the workspace root
    #[error("path containment violation: {0}")]
    Containment(String),

    /// A tool artifact failed trust verification
    #[error("trust verification failed: {0}")]
    TrustViolation(String),

    /// Malformed command, argument, path, or option
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Request throttled; the caller may retry after a delay
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Operation exceeded its wall-clock budget
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Transient network failure
    #[error("network failure: {0}")]
    Network(String),

    /// Captured output exceeded the hard cap
    #[error("output limit exceeded ({0} bytes)")]
    OutputLimitExceeded(usize),

    /// Process spawn or wait failure
    #[error("process error: {0}")]
    Process(String),

    /// Underlying IO failure
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Operator-facing configuration problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Fail-fast because the operation's circuit is open
    #[error("circuit open for operation '{0}'")]
    CircuitOpen(String),

    /// Retry budget exhausted
    #[error("maximum retries exceeded for operation '{0}'")]
    MaxRetriesExceeded(String),

    /// Anything that resists classification
    #[error("{0}")]
    Other(String),
}

/// Category taxonomy driving the handler's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Critical,
    Recoverable,
    InputError,
    SystemError,
    ConfigError,
    Unknown,
}

/// Severity attached to error records and audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl GuardError {
    /// Classify the error by variant, falling back to message-pattern
    /// inference for the opaque variants.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GuardError::SecurityViolation(_)
            | GuardError::InjectionDetected(_)
            | GuardError::Containment(_)
            | GuardError::TrustViolation(_) => ErrorCategory::Critical,

            GuardError::RateLimited(_) | GuardError::Timeout(_) | GuardError::Network(_) => {
                ErrorCategory::Recoverable
            }

            GuardError::InvalidInput(_) => ErrorCategory::InputError,

            GuardError::OutputLimitExceeded(_)
            | GuardError::CircuitOpen(_)
            | GuardError::MaxRetriesExceeded(_) => ErrorCategory::SystemError,

            GuardError::Config(_) => ErrorCategory::ConfigError,

            GuardError::Process(msg) => infer_category(msg, ErrorCategory::SystemError),
            GuardError::Io { source } => {
                infer_category(&source.to_string(), ErrorCategory::SystemError)
            }
            GuardError::Other(msg) => infer_category(msg, ErrorCategory::Unknown),
        }
    }

    /// Whether the handler may retry this error.
    ///
    /// System errors with transient-looking messages are promoted to
    /// Recoverable during classification, so retryability reduces to the
    /// category.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }

    /// Severity used for records and audit entries.
    pub fn severity(&self) -> Severity {
        match self.category() {
            ErrorCategory::Critical => Severity::Critical,
            ErrorCategory::ConfigError => Severity::High,
            ErrorCategory::SystemError | ErrorCategory::Unknown => Severity::Medium,
            ErrorCategory::Recoverable | ErrorCategory::InputError => Severity::Low,
        }
    }
}

/// Message-pattern inference for errors whose variant alone is ambiguous.
fn infer_category(message: &str, fallback: ErrorCategory) -> ErrorCategory {
    let msg = message.to_lowercase();

    if is_transient(&msg) {
        return ErrorCategory::Recoverable;
    }
    if msg.contains("permission denied")
        || msg.contains("not found")
        || msg.contains("no such file")
        || msg.contains("out of memory")
        || msg.contains("broken pipe")
    {
        return ErrorCategory::SystemError;
    }
    if msg.contains("invalid") || msg.contains("malformed") || msg.contains("unexpected argument") {
        return ErrorCategory::InputError;
    }

    fallback
}

/// Whether a message describes a transient condition worth retrying.
fn is_transient(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("network")
        || msg.contains("temporarily")
        || msg.contains("resource busy")
        || msg.contains("try again")
        || msg.contains("rate limit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_variants() {
        assert_eq!(
            GuardError::InjectionDetected("`id`".into()).category(),
            ErrorCategory::Critical
        );
        assert_eq!(
            GuardError::Containment("/etc".into()).category(),
            ErrorCategory::Critical
        );
        assert_eq!(
            GuardError::TrustViolation("mismatch".into()).category(),
            ErrorCategory::Critical
        );
        assert!(!GuardError::InjectionDetected("x".into()).is_retryable());
    }

    #[test]
    fn test_recoverable_variants() {
        let err = GuardError::Timeout(Duration::from_secs(30));
        assert_eq!(err.category(), ErrorCategory::Recoverable);
        assert!(err.is_retryable());

        assert!(GuardError::Network("connection refused".into()).is_retryable());
        assert!(GuardError::RateLimited("burst".into()).is_retryable());
    }

    #[test]
    fn test_input_errors_not_retryable() {
        let err = GuardError::InvalidInput("bad flag".into());
        assert_eq!(err.category(), ErrorCategory::InputError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_message_inference_for_process_errors() {
        // Transient-looking process errors are promoted to Recoverable
        let err = GuardError::Process("connection reset by peer".into());
        assert_eq!(err.category(), ErrorCategory::Recoverable);

        let err = GuardError::Process("permission denied".into());
        assert_eq!(err.category(), ErrorCategory::SystemError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_is_conservative() {
        let err = GuardError::Other("something odd happened".into());
        assert_eq!(err.category(), ErrorCategory::Unknown);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            GuardError::SecurityViolation("x".into()).severity(),
            Severity::Critical
        );
        assert_eq!(GuardError::Config("x".into()).severity(), Severity::High);
        assert_eq!(
            GuardError::InvalidInput("x".into()).severity(),
            Severity::Low
        );
    }
}
