//! Policy Engine
//!
//! The single entry point for policy decisions. Composes the rate limiter,
//! dangerous-pattern scan, category table, input validator, and trusted
//! tool verifier into one pipeline:
//!
//! rate-limit gate → dangerous-pattern scan → category lookup →
//! {Allow (cached) | Validate (validator, then verifier) | Consent | Block}
//!
//! Block and Consent are ordinary return values so callers can react;
//! only internal faults and critical violations surface as errors.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::categories::{CommandCategory, CommandTable};
use crate::assertions::{AssertionEngine, ComplianceReport};
use crate::audit::{AuditEntry, AuditLog};
use crate::config::{Config, PolicyMode};
use crate::errors::{ErrorContext, ErrorHandler, Severity};
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::trust::{ToolVerifier, VerifyOptions};
use crate::validation::{CommandRequest, InputValidator};

/// Decision verdict for a command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Validate,
    Consent,
    Block,
    Error,
}

impl PolicyAction {
    /// Stable label for audit entries and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Validate => "validate",
            PolicyAction::Consent => "consent",
            PolicyAction::Block => "block",
            PolicyAction::Error => "error",
        }
    }
}

/// Supporting detail attached to a decision.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionMetadata {
    /// Category the command fell into
    pub category: Option<CommandCategory>,

    /// Non-blocking observations, including mode downgrades
    pub warnings: Vec<String>,

    /// Whether the decision came from the Allow cache
    pub cached: bool,

    /// Whether a trusted caller token bypassed validation
    pub caller_bypass: bool,

    /// Dangerous pattern that matched, if any
    pub matched_pattern: Option<String>,

    /// Validation violations, when validation ran and failed
    pub validation_errors: Vec<String>,
}

/// A policy decision: computed once per request, immutable.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    /// The verdict
    pub action: PolicyAction,

    /// Human-readable explanation
    pub reason: String,

    /// Supporting detail
    pub metadata: DecisionMetadata,
}

impl PolicyDecision {
    fn new(action: PolicyAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            metadata: DecisionMetadata::default(),
        }
    }
}

/// Full validation outcome for a command execution request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDecision {
    /// Whether the request may proceed to execution
    pub success: bool,

    /// The verdict
    pub action: PolicyAction,

    /// Human-readable explanation
    pub reason: String,

    /// Supporting detail
    pub metadata: DecisionMetadata,
}

/// Opaque capability identifying a trusted internal caller.
///
/// Issued by [`PolicyEngine::issue_caller_token`] and compared by value;
/// never inferred from runtime introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerToken(Uuid);

/// Aggregated security counters, cheap to snapshot.
#[derive(Debug, Default)]
struct EngineCounters {
    total_requests: AtomicU64,
    allowed: AtomicU64,
    consent_required: AtomicU64,
    blocked: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    rate_limit_denials: AtomicU64,
}

/// Snapshot of the engine's aggregated metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityMetrics {
    pub total_requests: u64,
    pub allowed: u64,
    pub consent_required: u64,
    pub blocked: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub rate_limit_denials: u64,
    pub audit_entries: usize,
    pub compliance: ComplianceReport,
}

/// The decision pipeline orchestrator.
pub struct PolicyEngine {
    mode: PolicyMode,
    cache_capacity: usize,
    table: Arc<CommandTable>,
    validator: InputValidator,
    limiter: RateLimiter,
    verifier: ToolVerifier,
    handler: ErrorHandler,
    audit: AuditLog,
    assertions: Arc<AssertionEngine>,
    allow_cache: Arc<RwLock<HashMap<String, PolicyDecision>>>,
    trusted_callers: Arc<RwLock<HashSet<Uuid>>>,
    counters: EngineCounters,
}

impl PolicyEngine {
    /// Build an engine and all its components from configuration.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        Ok(Self {
            mode: config.policy.mode,
            cache_capacity: config.policy.cache_capacity.max(1),
            table: Arc::new(CommandTable::new()),
            validator: InputValidator::new(config.validation.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            verifier: ToolVerifier::new(config.trust.clone())?,
            handler: ErrorHandler::new(config.error_handling.clone()),
            audit: AuditLog::new(&config.audit),
            assertions: Arc::new(AssertionEngine::new()),
            allow_cache: Arc::new(RwLock::new(HashMap::new())),
            trusted_callers: Arc::new(RwLock::new(HashSet::new())),
            counters: EngineCounters::default(),
        })
    }

    /// Issue a capability token marking its holder as a trusted internal
    /// caller. Holders bypass the Validate step; their requests are still
    /// rate-limited, pattern-scanned, and audited.
    pub async fn issue_caller_token(&self) -> CallerToken {
        let id = Uuid::new_v4();
        self.trusted_callers.write().await.insert(id);
        info!(token = %id, "Issued trusted caller token");
        CallerToken(id)
    }

    /// Category-and-pattern policy decision for (command, args), without
    /// rate limiting or structural validation. Idempotent for identical
    /// inputs absent state change; Allow decisions are cached.
    pub async fn check_command_policy(&self, command: &str, args: &[String]) -> PolicyDecision {
        let line = reconstruct(command, args);
        let key = cache_key(&line);

        {
            let cache = self.allow_cache.read().await;
            if let Some(cached) = cache.get(&key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                metrics::POLICY_CACHE_HITS_TOTAL.inc();
                let mut decision = cached.clone();
                decision.metadata.cached = true;
                return decision;
            }
        }

        let mut decision = self.decide(command, &line);
        decision = self.apply_mode(decision);

        // Only clean Allow decisions are cached; downgraded or warned
        // decisions must be recomputed so mode changes take effect.
        if decision.action == PolicyAction::Allow && decision.metadata.warnings.is_empty() {
            let mut cache = self.allow_cache.write().await;
            if cache.len() >= self.cache_capacity {
                cache.clear();
            }
            cache.insert(key, decision.clone());
        }

        decision
    }

    /// The full decision pipeline for a command execution request.
    ///
    /// Order: rate-limit gate (pre-empts everything) → dangerous-pattern
    /// scan → caller-token fast path → category decision → validation →
    /// trusted-tool verification. Every outcome is audited and counted.
    pub async fn validate_command_execution(
        &self,
        request: &CommandRequest,
        caller: Option<&CallerToken>,
    ) -> ExecutionDecision {
        self.assertions.enter_function("validate_command_execution");
        let decision = self.validate_inner(request, caller).await;
        self.assertions.exit_function("validate_command_execution");

        self.record_decision(&request.command, &request.args, &decision)
            .await;
        decision
    }

    async fn validate_inner(
        &self,
        request: &CommandRequest,
        caller: Option<&CallerToken>,
    ) -> ExecutionDecision {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let line = reconstruct(&request.command, &request.args);

        // 1. Rate limit gate.
        let client_id = if request.client_id.is_empty() {
            "anonymous"
        } else {
            request.client_id.as_str()
        };
        let rate = self.limiter.check(client_id, &line).await;
        if !rate.allowed {
            let denial = rate.denial.as_ref().map(|d| d.code()).unwrap_or("DENIED");
            self.counters
                .rate_limit_denials
                .fetch_add(1, Ordering::Relaxed);
            metrics::RATE_LIMIT_DENIALS_TOTAL
                .with_label_values(&[denial])
                .inc();
            debug!(client_id, denial, "Request denied by rate limiter");
            return ExecutionDecision {
                success: false,
                action: PolicyAction::Block,
                reason: format!(
                    "{denial}: {}",
                    rate.denial.map(|d| d.to_string()).unwrap_or_default()
                ),
                metadata: DecisionMetadata::default(),
            };
        }

        // 2. Dangerous patterns block before any bypass applies.
        if let Some(pattern) = self.table.scan_dangerous(&line) {
            metrics::DANGEROUS_PATTERN_HITS_TOTAL
                .with_label_values(&[pattern])
                .inc();
            let decision = self.apply_mode(PolicyDecision {
                action: PolicyAction::Block,
                reason: format!("dangerous pattern '{pattern}' matched"),
                metadata: DecisionMetadata {
                    matched_pattern: Some(pattern.to_string()),
                    ..Default::default()
                },
            });
            return self.into_execution_decision(decision);
        }

        // 3. Trusted caller fast path: skip Validate, keep everything else.
        if let Some(token) = caller {
            if self.trusted_callers.read().await.contains(&token.0) {
                self.assertions.check(
                    !line.is_empty(),
                    "caller fast path requires a command line",
                    "validate_command_execution",
                );
                return ExecutionDecision {
                    success: true,
                    action: PolicyAction::Allow,
                    reason: "trusted caller token".to_string(),
                    metadata: DecisionMetadata {
                        caller_bypass: true,
                        ..Default::default()
                    },
                };
            }
            warn!("Unrecognized caller token presented");
        }

        // 4. Category decision.
        let policy = self.check_command_policy(&request.command, &request.args).await;
        match policy.action {
            PolicyAction::Allow => {
                // Trusted tools bypass structural validation but never the
                // fingerprint check.
                if policy.metadata.category == Some(CommandCategory::TrustedTool) {
                    if let Some(blocked) = self.verify_tool_for(&request.command).await {
                        return self.into_execution_decision(blocked);
                    }
                }
                return self.into_execution_decision(policy);
            }
            PolicyAction::Block | PolicyAction::Consent | PolicyAction::Error => {
                return self.into_execution_decision(policy);
            }
            PolicyAction::Validate => {}
        }

        // 5. Structural validation.
        let report = self.validator.validate_command_execution(request);
        if !report.is_valid {
            let errors: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
            let decision = self.apply_mode(PolicyDecision {
                action: PolicyAction::Block,
                reason: format!("validation failed: {}", errors.join("; ")),
                metadata: DecisionMetadata {
                    category: policy.metadata.category,
                    validation_errors: errors,
                    ..Default::default()
                },
            });
            return self.into_execution_decision(decision);
        }

        // 6. Trusted-tool verification, where applicable.
        if self.table.is_trusted_tool(&request.command) || self.verifier.is_registered(&request.command)
        {
            if let Some(decision) = self.verify_tool_for(&request.command).await {
                return self.into_execution_decision(decision);
            }
        }

        let mut metadata = DecisionMetadata {
            category: policy.metadata.category,
            ..Default::default()
        };
        metadata.warnings.extend(report.warnings);

        ExecutionDecision {
            success: true,
            action: PolicyAction::Allow,
            reason: "validation passed".to_string(),
            metadata,
        }
    }

    /// Verify a registered tool at its first existing registered path.
    /// Returns a blocking decision on mismatch, `None` when trusted or when
    /// no registered artifact exists to check.
    async fn verify_tool_for(&self, command: &str) -> Option<PolicyDecision> {
        let record = self.verifier.registry().get(command)?;
        let artifact = record.allowed_paths.iter().find(|p| p.exists())?.clone();

        match self
            .verifier
            .verify_tool(Path::new(&artifact), VerifyOptions::default())
            .await
        {
            Ok(verification) => {
                metrics::TRUST_VERIFICATIONS_TOTAL
                    .with_label_values(&[verification.status.as_str()])
                    .inc();
                if verification.trusted {
                    None
                } else {
                    warn!(
                        tool = command,
                        status = verification.status.as_str(),
                        "Trusted tool failed verification"
                    );
                    Some(self.apply_mode(PolicyDecision {
                        action: PolicyAction::Block,
                        reason: format!(
                            "tool '{command}' failed verification ({})",
                            verification.status.as_str()
                        ),
                        metadata: DecisionMetadata {
                            category: Some(CommandCategory::TrustedTool),
                            ..Default::default()
                        },
                    }))
                }
            }
            Err(e) => {
                let context = ErrorContext::operation(format!("verify:{command}"));
                let error = crate::errors::GuardError::Process(e.to_string());
                let _ = self.handler.handle(&error, &context).await;
                metrics::ERRORS_TOTAL
                    .with_label_values(&["system_error"])
                    .inc();
                Some(PolicyDecision {
                    action: PolicyAction::Error,
                    reason: format!("verification error for '{command}'"),
                    metadata: DecisionMetadata::default(),
                })
            }
        }
    }

    /// The raw category decision for a command line, before mode handling.
    fn decide(&self, command: &str, line: &str) -> PolicyDecision {
        if let Some(pattern) = self.table.scan_dangerous(line) {
            metrics::DANGEROUS_PATTERN_HITS_TOTAL
                .with_label_values(&[pattern])
                .inc();
            let mut decision = PolicyDecision::new(
                PolicyAction::Block,
                format!("dangerous pattern '{pattern}' matched"),
            );
            decision.metadata.matched_pattern = Some(pattern.to_string());
            return decision;
        }

        let category = self.table.category(command);
        let mut decision = match category {
            CommandCategory::NeverAllow => PolicyDecision::new(
                PolicyAction::Block,
                format!("'{command}' is never allowed"),
            ),
            CommandCategory::AlwaysAllow => PolicyDecision::new(
                PolicyAction::Allow,
                format!("'{command}' is always allowed"),
            ),
            CommandCategory::ValidateRequired | CommandCategory::Default => PolicyDecision::new(
                PolicyAction::Validate,
                format!("'{command}' requires validation"),
            ),
            CommandCategory::RequireConsent => PolicyDecision::new(
                PolicyAction::Consent,
                format!("'{command}' requires explicit consent"),
            ),
            CommandCategory::TrustedTool => PolicyDecision::new(
                PolicyAction::Allow,
                format!("'{command}' is a trusted tool"),
            ),
        };
        decision.metadata.category = Some(category);
        decision
    }

    /// Apply the enforcement mode: Monitor downgrades Block and Consent to
    /// Allow-with-warning; Warn downgrades only Consent; Block enforces.
    fn apply_mode(&self, decision: PolicyDecision) -> PolicyDecision {
        let downgrade = match (self.mode, decision.action) {
            (PolicyMode::Monitor, PolicyAction::Block | PolicyAction::Consent) => true,
            (PolicyMode::Warn, PolicyAction::Consent) => true,
            _ => false,
        };

        if !downgrade {
            return decision;
        }

        let mut downgraded = decision;
        let warning = format!(
            "would {} in enforcing mode: {}",
            downgraded.action.as_str(),
            downgraded.reason
        );
        warn!(mode = ?self.mode, "{warning}");
        downgraded.metadata.warnings.push(warning);
        downgraded.action = PolicyAction::Allow;
        downgraded.reason = format!("{} (downgraded by mode)", downgraded.reason);
        downgraded
    }

    fn into_execution_decision(&self, decision: PolicyDecision) -> ExecutionDecision {
        ExecutionDecision {
            success: decision.action == PolicyAction::Allow,
            action: decision.action,
            reason: decision.reason,
            metadata: decision.metadata,
        }
    }

    async fn record_decision(&self, command: &str, args: &[String], decision: &ExecutionDecision) {
        match decision.action {
            PolicyAction::Allow | PolicyAction::Validate => {
                self.counters.allowed.fetch_add(1, Ordering::Relaxed);
            }
            PolicyAction::Consent => {
                self.counters
                    .consent_required
                    .fetch_add(1, Ordering::Relaxed);
            }
            PolicyAction::Block => {
                self.counters.blocked.fetch_add(1, Ordering::Relaxed);
            }
            PolicyAction::Error => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::POLICY_DECISIONS_TOTAL
            .with_label_values(&[decision.action.as_str()])
            .inc();

        let severity = match decision.action {
            PolicyAction::Block => Severity::High,
            PolicyAction::Consent | PolicyAction::Error => Severity::Medium,
            _ => Severity::Low,
        };
        self.audit
            .append(AuditEntry::new(
                command,
                args,
                "policy_engine",
                decision.action.as_str(),
                severity,
            ))
            .await;
    }

    /// Spawn the background cleanup tasks: rate-limit window pruning and
    /// trust-cache expiry. Returns the task handles so the embedding
    /// service can abort them on shutdown.
    pub fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.limiter.start_cleanup_task(),
            self.verifier.start_cache_cleanup_task(),
        ]
    }

    /// Export the audit log to its configured path, if any.
    pub async fn export_audit(&self) -> anyhow::Result<()> {
        self.audit.export().await
    }

    /// Snapshot of aggregated security metrics.
    pub async fn security_metrics(&self) -> SecurityMetrics {
        SecurityMetrics {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            consent_required: self.counters.consent_required.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            rate_limit_denials: self.counters.rate_limit_denials.load(Ordering::Relaxed),
            audit_entries: self.audit.len().await,
            compliance: self.assertions.compliance_report(),
        }
    }

    /// The most recent audit entries, oldest first.
    pub async fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit).await
    }

    /// The shared command table.
    pub fn table(&self) -> Arc<CommandTable> {
        Arc::clone(&self.table)
    }

    /// The shared audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The shared error handler.
    pub fn handler(&self) -> &ErrorHandler {
        &self.handler
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The shared assertion engine.
    pub fn assertions(&self) -> Arc<AssertionEngine> {
        Arc::clone(&self.assertions)
    }

    /// The trusted tool verifier.
    pub fn verifier(&self) -> &ToolVerifier {
        &self.verifier
    }

    /// The configured enforcement mode.
    pub fn mode(&self) -> PolicyMode {
        self.mode
    }
}

/// Reconstruct the full command line for pattern scanning and cache keys.
fn reconstruct(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Cache key: hex SHA-256 of the reconstructed command line.
fn cache_key(line: &str) -> String {
    crate::trust::verifier::hash_bytes(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rate_limit::RateLimitConfig;

    fn engine() -> PolicyEngine {
        let mut config = Config::default();
        // Generous limits so policy tests are not throttled
        config.rate_limit = RateLimitConfig {
            max_requests: 10_000,
            burst_limit: 10_000,
            rapid_fire_threshold: 100_000,
            identical_command_threshold: 100_000,
            per_type_threshold: 100_000,
            ..Default::default()
        };
        PolicyEngine::new(&config).unwrap()
    }

    fn engine_with_mode(mode: PolicyMode) -> PolicyEngine {
        let mut config = Config::default();
        config.policy.mode = mode;
        config.rate_limit = RateLimitConfig::disabled();
        PolicyEngine::new(&config).unwrap()
    }

    fn request(command: &str, args: &[&str]) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            options: serde_json::Map::new(),
            client_id: "test-client".to_string(),
        }
    }

    #[tokio::test]
    async fn test_never_allow_blocks() {
        let engine = engine();
        let decision = engine.check_command_policy("sudo", &["ls".to_string()]).await;
        assert_eq!(decision.action, PolicyAction::Block);
    }

    #[tokio::test]
    async fn test_always_allow_allows_and_caches() {
        let engine = engine();
        let first = engine.check_command_policy("ls", &["-la".to_string()]).await;
        assert_eq!(first.action, PolicyAction::Allow);
        assert!(!first.metadata.cached);

        let second = engine.check_command_policy("ls", &["-la".to_string()]).await;
        assert_eq!(second.action, PolicyAction::Allow);
        assert!(second.metadata.cached);
    }

    #[tokio::test]
    async fn test_decisions_are_idempotent() {
        let engine = engine();
        let a = engine.check_command_policy("cat", &["x.txt".to_string()]).await;
        let b = engine.check_command_policy("cat", &["x.txt".to_string()]).await;
        assert_eq!(a.action, b.action);
        assert_eq!(a.action, PolicyAction::Validate);
    }

    #[tokio::test]
    async fn test_consent_category() {
        let engine = engine();
        let decision = engine.check_command_policy("rm", &["test.txt".to_string()]).await;
        assert_eq!(decision.action, PolicyAction::Consent);
    }

    #[tokio::test]
    async fn test_dangerous_pattern_blocks_in_validate_flow() {
        let engine = engine();
        let decision = engine
            .validate_command_execution(
                &request("rm", &["-rf", "/"]),
                None,
            )
            .await;
        assert!(!decision.success);
        assert_eq!(decision.action, PolicyAction::Block);
        assert!(decision.metadata.matched_pattern.is_some());
    }

    #[tokio::test]
    async fn test_sudo_blocked_via_both_category_and_pattern() {
        let engine = engine();
        let decision = engine
            .validate_command_execution(&request("sudo", &["rm", "-rf", "/"]), None)
            .await;
        assert!(!decision.success);
        assert_eq!(decision.action, PolicyAction::Block);
    }

    #[tokio::test]
    async fn test_validation_failure_blocks() {
        let engine = engine();
        let decision = engine
            .validate_command_execution(&request("cat", &["$(whoami)"]), None)
            .await;
        assert!(!decision.success);
        assert!(!decision.metadata.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_validation_pass_allows() {
        let engine = engine();
        let decision = engine
            .validate_command_execution(&request("cat", &["README.md"]), None)
            .await;
        assert!(decision.success, "reason: {}", decision.reason);
        assert_eq!(decision.action, PolicyAction::Allow);
    }

    #[tokio::test]
    async fn test_rate_limit_gate_preempts_policy() {
        let mut config = Config::default();
        config.rate_limit = RateLimitConfig {
            max_requests: 2,
            burst_limit: 2,
            rapid_fire_threshold: 100_000,
            identical_command_threshold: 100_000,
            per_type_threshold: 100_000,
            ..Default::default()
        };
        let engine = PolicyEngine::new(&config).unwrap();

        // Even an always-allowed command is throttled
        for _ in 0..2 {
            let d = engine
                .validate_command_execution(&request("ls", &[]), None)
                .await;
            assert!(d.success);
        }
        let denied = engine
            .validate_command_execution(&request("ls", &[]), None)
            .await;
        assert!(!denied.success);
        assert!(denied.reason.contains("BURST") || denied.reason.contains("RATE"));
    }

    #[tokio::test]
    async fn test_caller_token_bypasses_validation() {
        let engine = engine();
        let token = engine.issue_caller_token().await;

        // An argument that would fail validation passes on the fast path
        let decision = engine
            .validate_command_execution(&request("cat", &["weird&&arg"]), Some(&token))
            .await;
        assert!(decision.success);
        assert!(decision.metadata.caller_bypass);

        // A forged token does not
        let forged = CallerToken(Uuid::new_v4());
        let decision = engine
            .validate_command_execution(&request("cat", &["weird&&arg"]), Some(&forged))
            .await;
        assert!(!decision.success);
    }

    #[tokio::test]
    async fn test_caller_token_does_not_bypass_dangerous_patterns() {
        let engine = engine();
        let token = engine.issue_caller_token().await;

        let decision = engine
            .validate_command_execution(&request("rm", &["-rf", "/"]), Some(&token))
            .await;
        assert!(!decision.success);
        assert_eq!(decision.action, PolicyAction::Block);
    }

    #[tokio::test]
    async fn test_monitor_mode_downgrades_block_and_consent() {
        let engine = engine_with_mode(PolicyMode::Monitor);

        let blocked = engine.check_command_policy("sudo", &[]).await;
        assert_eq!(blocked.action, PolicyAction::Allow);
        assert!(!blocked.metadata.warnings.is_empty());

        let consent = engine.check_command_policy("rm", &["x.txt".to_string()]).await;
        assert_eq!(consent.action, PolicyAction::Allow);
        assert!(!consent.metadata.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_warn_mode_downgrades_only_consent() {
        let engine = engine_with_mode(PolicyMode::Warn);

        let blocked = engine.check_command_policy("sudo", &[]).await;
        assert_eq!(blocked.action, PolicyAction::Block);

        let consent = engine.check_command_policy("rm", &["x.txt".to_string()]).await;
        assert_eq!(consent.action, PolicyAction::Allow);
        assert!(!consent.metadata.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_downgraded_decisions_are_not_cached() {
        let engine = engine_with_mode(PolicyMode::Monitor);

        let first = engine.check_command_policy("rm", &["x.txt".to_string()]).await;
        assert_eq!(first.action, PolicyAction::Allow);

        let second = engine.check_command_policy("rm", &["x.txt".to_string()]).await;
        assert!(!second.metadata.cached);
    }

    #[tokio::test]
    async fn test_decisions_audited_and_counted() {
        let engine = engine();

        engine
            .validate_command_execution(&request("ls", &[]), None)
            .await;
        engine
            .validate_command_execution(&request("sudo", &[]), None)
            .await;

        let metrics = engine.security_metrics().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.blocked, 1);
        assert!(metrics.audit_entries >= 2);

        let log = engine.audit_log(10).await;
        assert!(log.iter().any(|e| e.action == "block"));
    }
}
