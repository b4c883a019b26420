//! Trusted Tool Verification
//!
//! Trust-on-first-use fingerprinting of executable artifacts. The seed
//! registry (built-ins + optional file) is immutable; learned fingerprints
//! live in a separately persisted store.

pub mod registry;
pub mod verifier;

pub use registry::{LearnedFingerprint, LearnedStore, ToolKind, ToolRecord, ToolRegistry};
pub use verifier::{ToolVerifier, Verification, VerifyOptions, VerifyStatus};
