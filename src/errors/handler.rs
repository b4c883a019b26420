//! Error Handler
//!
//! Categorizes faults, redacts their messages, and decides what the caller
//! does next: retry with backoff, reject with a structured failure, or
//! propagate. Recoverable errors get a bounded per-(operation, category)
//! retry budget with exponential backoff; exhausting it trips the circuit
//! breaker for that operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use super::circuit::CircuitBreaker;
use super::{ErrorCategory, GuardError, Severity};
use crate::config::ErrorHandlingConfig;
use crate::redact;

/// Retained error records, oldest dropped first.
const ERROR_HISTORY_CAPACITY: usize = 200;

/// A categorized, redacted record of one fault.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Unique record id
    pub id: Uuid,

    /// When the fault was handled
    pub timestamp: DateTime<Utc>,

    /// Taxonomy category
    pub category: ErrorCategory,

    /// Redacted message
    pub message: String,

    /// Severity derived from the category
    pub severity: Severity,

    /// The operation that faulted
    pub operation: String,

    /// Whether the handler considered the fault retryable
    pub retryable: bool,
}

/// Where a fault occurred.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation name, also the circuit-breaker and retry-budget key
    pub operation: String,

    /// Requesting client, when known
    pub client_id: Option<String>,
}

impl ErrorContext {
    /// Context for an operation with no attributable client.
    pub fn operation(name: impl Into<String>) -> Self {
        Self {
            operation: name.into(),
            client_id: None,
        }
    }
}

/// What the caller must do with a handled fault.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Sleep `delay`, then retry the operation (attempt is 1-based)
    Retry { attempt: u32, delay: Duration },

    /// Structured failure for the caller to surface; never propagated
    Reject {
        record: ErrorRecord,
        suggestions: Vec<String>,
    },

    /// Propagate; the operation must not be retried
    Fatal { record: ErrorRecord },
}

impl Disposition {
    /// Whether this disposition asks the caller to retry.
    pub fn should_retry(&self) -> bool {
        matches!(self, Disposition::Retry { .. })
    }
}

/// Optional hook invoked for critical faults.
pub type AlertHook = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// Central fault handler with retry budgets and a circuit breaker.
#[derive(Clone)]
pub struct ErrorHandler {
    config: ErrorHandlingConfig,
    circuit: CircuitBreaker,
    retry_counts: Arc<RwLock<HashMap<(String, ErrorCategory), u32>>>,
    history: Arc<RwLock<VecDeque<ErrorRecord>>>,
    alert_hook: Option<AlertHook>,
}

impl ErrorHandler {
    /// Create a handler from configuration.
    pub fn new(config: ErrorHandlingConfig) -> Self {
        let circuit = CircuitBreaker::new(&config);
        Self {
            config,
            circuit,
            retry_counts: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            alert_hook: None,
        }
    }

    /// Install a hook invoked for every critical fault.
    pub fn with_alert_hook(mut self, hook: AlertHook) -> Self {
        self.alert_hook = Some(hook);
        self
    }

    /// Handle a fault and decide the caller's next step.
    pub async fn handle(&self, error: &GuardError, context: &ErrorContext) -> Disposition {
        let category = error.category();
        let record = self.make_record(error, category, &context.operation);
        self.remember(record.clone()).await;

        match category {
            ErrorCategory::Critical => {
                error!(
                    operation = %context.operation,
                    category = ?category,
                    "Critical fault: {}",
                    record.message
                );
                if let Some(hook) = &self.alert_hook {
                    hook(&record);
                }
                Disposition::Fatal { record }
            }

            ErrorCategory::Recoverable => self.retry_or_trip(record, context).await,

            ErrorCategory::InputError => {
                let suggestions = suggest(&record.message);
                Disposition::Reject {
                    record,
                    suggestions,
                }
            }

            ErrorCategory::SystemError => {
                if error.is_retryable() {
                    self.retry_or_trip(record, context).await
                } else {
                    Disposition::Fatal { record }
                }
            }

            ErrorCategory::ConfigError => Disposition::Fatal { record },

            ErrorCategory::Unknown => {
                warn!(
                    operation = %context.operation,
                    "Unclassified fault flagged for investigation: {}",
                    record.message
                );
                Disposition::Fatal { record }
            }
        }
    }

    /// Must be checked by callers before attempting an operation.
    pub async fn is_circuit_open(&self, operation: &str) -> bool {
        self.circuit.is_open(operation).await
    }

    /// Record an attempt outcome with the circuit breaker. A success also
    /// clears the operation's retry budget.
    pub async fn record_outcome(&self, operation: &str, success: bool) {
        self.circuit.record(operation, success).await;
        if success {
            let mut counts = self.retry_counts.write().await;
            counts.retain(|(op, _), _| op != operation);
        }
    }

    /// Recent error records, newest last.
    pub async fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// The shared circuit breaker.
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Backoff delay for a 0-based attempt index: `base * 2^attempt` plus
    /// up to 10% jitter, so synchronized callers spread out.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.retry_delay_ms);
        let exponential = base * 2_u32.saturating_pow(attempt);
        let jitter = exponential.mul_f64(rand::random::<f64>() * 0.1);
        exponential + jitter
    }

    async fn retry_or_trip(&self, record: ErrorRecord, context: &ErrorContext) -> Disposition {
        let key = (context.operation.clone(), record.category);
        let mut counts = self.retry_counts.write().await;
        let attempts = counts.entry(key).or_insert(0);

        if *attempts < self.config.max_retry_attempts {
            let delay = self.backoff_delay(*attempts);
            *attempts += 1;
            warn!(
                operation = %context.operation,
                attempt = *attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling retry: {}",
                record.message
            );
            Disposition::Retry {
                attempt: *attempts,
                delay,
            }
        } else {
            drop(counts);
            self.circuit.record(&context.operation, false).await;
            let exhausted = GuardError::MaxRetriesExceeded(context.operation.clone());
            let record = self.make_record(&exhausted, ErrorCategory::SystemError, &context.operation);
            self.remember(record.clone()).await;
            error!(
                operation = %context.operation,
                max = self.config.max_retry_attempts,
                "Retry budget exhausted"
            );
            Disposition::Fatal { record }
        }
    }

    fn make_record(
        &self,
        error: &GuardError,
        category: ErrorCategory,
        operation: &str,
    ) -> ErrorRecord {
        ErrorRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category,
            message: redact::redact(&error.to_string()),
            severity: error.severity(),
            operation: operation.to_string(),
            retryable: error.is_retryable(),
        }
    }

    async fn remember(&self, record: ErrorRecord) {
        let mut history = self.history.write().await;
        if history.len() >= ERROR_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);
    }
}

/// Remediation hints for input errors, keyed off the redacted message.
fn suggest(message: &str) -> Vec<String> {
    let msg = message.to_lowercase();
    let mut suggestions = Vec::new();

    if msg.contains("injection") || msg.contains("metacharacter") {
        suggestions.push("remove shell metacharacters from the command and arguments".to_string());
    }
    if msg.contains("traversal") || msg.contains("containment") {
        suggestions.push("use a path inside the workspace root".to_string());
    }
    if msg.contains("length") || msg.contains("exceeds maximum") {
        suggestions.push("shorten the command or split it into smaller invocations".to_string());
    }
    if msg.contains("option") {
        suggestions.push("only pass recognized option keys".to_string());
    }
    if suggestions.is_empty() {
        suggestions.push("check the command spelling and argument format".to_string());
    }

    suggestions
}
