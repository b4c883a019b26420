//! Policy Decisions
//!
//! The authoritative command table ([`categories`]) and the decision
//! pipeline orchestrator ([`engine`]). The engine is the sole entry point
//! for callers; everything else in the crate serves it.

pub mod categories;
pub mod engine;

pub use categories::{CommandCategory, CommandTable};
pub use engine::{
    CallerToken, DecisionMetadata, ExecutionDecision, PolicyAction, PolicyDecision, PolicyEngine,
    SecurityMetrics,
};
