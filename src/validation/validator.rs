//! Structural Command Validation
//!
//! First gate of the execution pipeline: validates the raw command, every
//! argument, path-like inputs, and execution options. Produces a sanitized
//! copy of the request alongside errors and warnings.
//!
//! # Contract
//!
//! Validation never panics and never returns `Err`: every outcome, including
//! hostile input, is reported through [`ValidationReport`]. Warnings never
//! block; errors always do.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path};

use super::patterns::{find_injection, looks_like_path, BLOCKED_EXTENSIONS};
use crate::config::ValidationConfig;

/// Directory prefixes that arguments may never reference.
const SENSITIVE_PREFIXES: &[&str] = &[
    "/etc", "/root", "/sys", "/proc", "/dev", "/boot", "/var/run",
];

/// Home-relative fragments that indicate credential material.
const SENSITIVE_FRAGMENTS: &[&str] = &[".ssh", ".aws", ".gnupg", ".kube", ".docker"];

/// Option keys recognized by the executor.
const RECOGNIZED_OPTIONS: &[&str] = &["timeout_ms", "max_output_size", "cwd", "env_clear"];

/// Bounds on a caller-supplied timeout override, in milliseconds.
const TIMEOUT_RANGE_MS: (u64, u64) = (100, 600_000);

/// Commands that must receive at least one non-flag argument.
const SEARCH_COMMANDS: &[&str] = &["grep", "rg", "find", "fd", "ag"];

/// A single command request as received from the calling layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// The command to execute
    pub command: String,

    /// Ordered arguments
    pub args: Vec<String>,

    /// Raw execution options (validated against a key whitelist)
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,

    /// Identifier of the requesting client (rate-limit key)
    #[serde(default)]
    pub client_id: String,
}

/// A structural violation found during validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("command is empty")]
    EmptyCommand,

    #[error("command length {len} exceeds maximum {max}")]
    CommandTooLong { len: usize, max: usize },

    #[error("command '{0}' contains characters outside [a-zA-Z0-9._-]")]
    InvalidCommandCharset(String),

    #[error("injection pattern '{pattern}' detected in {context}")]
    Injection {
        context: String,
        pattern: &'static str,
    },

    #[error("argument count {count} exceeds maximum {max}")]
    TooManyArgs { count: usize, max: usize },

    #[error("argument {index} length {len} exceeds maximum {max}")]
    ArgTooLong {
        index: usize,
        len: usize,
        max: usize,
    },

    #[error("path '{0}' contains a traversal segment")]
    PathTraversal(String),

    #[error("path '{0}' references a sensitive location")]
    SensitivePath(String),

    #[error("path '{0}' has a disallowed extension")]
    DisallowedExtension(String),

    #[error("path depth {depth} exceeds maximum {max}")]
    PathTooDeep { depth: usize, max: usize },

    #[error("unrecognized option key '{0}'")]
    UnknownOption(String),

    #[error("timeout {value}ms outside allowed range {min}..={max}ms")]
    TimeoutOutOfRange { value: u64, min: u64, max: u64 },

    #[error("'{0}' requires at least one non-flag argument")]
    MissingSearchTarget(String),
}

/// Outcome of validating a command request.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// True when no errors were found; warnings alone never block
    pub is_valid: bool,

    /// Blocking violations
    pub errors: Vec<Violation>,

    /// Non-blocking observations
    pub warnings: Vec<String>,

    /// Trimmed copy of the request with unrecognized options dropped
    pub sanitized: CommandRequest,
}

/// Structural validator for commands, arguments, paths, and options.
#[derive(Debug, Clone)]
pub struct InputValidator {
    config: ValidationConfig,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl InputValidator {
    /// Create a validator with the given limits.
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate an entire command request.
    ///
    /// Composes command, argument, path, and option validation, then applies
    /// command-specific cross-checks (e.g. a search command must receive a
    /// search target).
    pub fn validate_command_execution(&self, request: &CommandRequest) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let command = request.command.trim().to_string();
        let args: Vec<String> = request.args.iter().map(|a| a.trim().to_string()).collect();

        self.validate_command(&command, &mut errors);
        self.validate_args(&args, &mut errors, &mut warnings);
        let options = self.validate_options(&request.options, &mut errors);

        // Cross-validation: search tools with nothing to search for are
        // either misuse or an attempt to smuggle everything into flags.
        if SEARCH_COMMANDS.contains(&command.as_str()) {
            let has_target = args.iter().any(|a| !a.starts_with('-'));
            if !has_target {
                errors.push(Violation::MissingSearchTarget(command.clone()));
            }
        }

        if args.len() > self.config.max_total_args / 2 {
            warnings.push(format!(
                "argument count {} is unusually high",
                args.len()
            ));
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            sanitized: CommandRequest {
                command,
                args,
                options,
                client_id: request.client_id.trim().to_string(),
            },
        }
    }

    /// Validate the command word itself: charset, length, injection scan.
    fn validate_command(&self, command: &str, errors: &mut Vec<Violation>) {
        if command.is_empty() {
            errors.push(Violation::EmptyCommand);
            return;
        }

        if command.len() > self.config.max_command_length {
            errors.push(Violation::CommandTooLong {
                len: command.len(),
                max: self.config.max_command_length,
            });
        }

        if let Some(pattern) = find_injection(command) {
            errors.push(Violation::Injection {
                context: "command".to_string(),
                pattern,
            });
        }

        // The command word is a bare program name; paths to programs are
        // resolved by the executor, not accepted from callers.
        if !command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            errors.push(Violation::InvalidCommandCharset(command.to_string()));
        }
    }

    /// Validate every argument: length, injection scan, traversal checks for
    /// path-like values.
    fn validate_args(
        &self,
        args: &[String],
        errors: &mut Vec<Violation>,
        warnings: &mut Vec<String>,
    ) {
        if args.len() > self.config.max_total_args {
            errors.push(Violation::TooManyArgs {
                count: args.len(),
                max: self.config.max_total_args,
            });
        }

        for (index, arg) in args.iter().enumerate() {
            if arg.len() > self.config.max_arg_length {
                errors.push(Violation::ArgTooLong {
                    index,
                    len: arg.len(),
                    max: self.config.max_arg_length,
                });
                continue;
            }

            if let Some(pattern) = find_injection(arg) {
                errors.push(Violation::Injection {
                    context: format!("argument {index}"),
                    pattern,
                });
                continue;
            }

            if looks_like_path(arg) {
                self.validate_path(arg, errors);
                if Path::new(arg).is_absolute() {
                    warnings.push(format!("argument {index} is an absolute path: {arg}"));
                }
            }
        }
    }

    /// Validate a path-like value without touching the filesystem.
    ///
    /// Purely lexical: traversal segments, sensitive prefixes, blocked
    /// extensions, and depth are all decidable from the string. Containment
    /// under the workspace root is the executor's job and is re-checked
    /// there against the resolved path.
    pub fn validate_path(&self, path: &str, errors: &mut Vec<Violation>) {
        let p = Path::new(path);

        if p.components().any(|c| matches!(c, Component::ParentDir)) {
            errors.push(Violation::PathTraversal(path.to_string()));
            return;
        }

        for prefix in SENSITIVE_PREFIXES {
            if path == *prefix || path.starts_with(&format!("{prefix}/")) {
                errors.push(Violation::SensitivePath(path.to_string()));
                return;
            }
        }

        for fragment in SENSITIVE_FRAGMENTS {
            if p.components().any(|c| c.as_os_str() == *fragment) {
                errors.push(Violation::SensitivePath(path.to_string()));
                return;
            }
        }

        if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
            if BLOCKED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                errors.push(Violation::DisallowedExtension(path.to_string()));
                return;
            }
        }

        let depth = p.components().count();
        if depth > self.config.max_path_depth {
            errors.push(Violation::PathTooDeep {
                depth,
                max: self.config.max_path_depth,
            });
        }
    }

    /// Validate options against the recognized-key whitelist.
    ///
    /// Returns the sanitized option map containing only recognized keys.
    fn validate_options(
        &self,
        options: &serde_json::Map<String, Value>,
        errors: &mut Vec<Violation>,
    ) -> serde_json::Map<String, Value> {
        let mut sanitized = serde_json::Map::new();

        for (key, value) in options {
            if !RECOGNIZED_OPTIONS.contains(&key.as_str()) {
                errors.push(Violation::UnknownOption(key.clone()));
                continue;
            }

            if key == "timeout_ms" {
                let (min, max) = TIMEOUT_RANGE_MS;
                match value.as_u64() {
                    Some(v) if (min..=max).contains(&v) => {}
                    Some(v) => {
                        errors.push(Violation::TimeoutOutOfRange { value: v, min, max });
                        continue;
                    }
                    None => {
                        errors.push(Violation::TimeoutOutOfRange { value: 0, min, max });
                        continue;
                    }
                }
            }

            sanitized.insert(key.clone(), value.clone());
        }

        sanitized
    }
}
