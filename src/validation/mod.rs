//! Input Validation
//!
//! Structural validation and sanitization of raw commands, arguments,
//! paths, and options. The compiled injection pattern set lives in
//! [`patterns`]; the validator itself in [`validator`].

pub mod patterns;
pub mod validator;

pub use patterns::{find_injection, looks_like_path, BLOCKED_EXTENSIONS};
pub use validator::{CommandRequest, InputValidator, ValidationReport, Violation};
