// Prometheus metrics for the command-execution security pipeline
//
// Gathered in-process via gather_metrics():
// - Policy decisions (counter by action)
// - Rate limit denials (counter by reason)
// - Command executions (counter by status, duration histogram)
// - Trust verifications (counter by status)
// - Redactions applied (counter)
// - Circuit breaker transitions (counter)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Policy metrics
    pub static ref POLICY_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("policy_decisions_total", "Policy decisions by action"),
        &["action"]
    ).expect("Failed to create policy decisions metric");

    pub static ref POLICY_CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "policy_cache_hits_total",
        "Allow decisions served from the decision cache"
    ).expect("Failed to create policy cache hits metric");

    pub static ref DANGEROUS_PATTERN_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("dangerous_pattern_hits_total", "Dangerous pattern matches by pattern"),
        &["pattern"]
    ).expect("Failed to create dangerous pattern metric");

    // Rate limiting metrics
    pub static ref RATE_LIMIT_DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("rate_limit_denials_total", "Rate limit denials by reason"),
        &["reason"]
    ).expect("Failed to create rate limit denials metric");

    // Execution metrics
    pub static ref EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("executions_total", "Command executions by status"),
        &["status"]
    ).expect("Failed to create executions metric");

    pub static ref EXECUTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("execution_duration_seconds", "Command execution duration"),
    ).expect("Failed to create execution duration metric");

    // Trust metrics
    pub static ref TRUST_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("trust_verifications_total", "Tool verifications by status"),
        &["status"]
    ).expect("Failed to create trust verifications metric");

    // Redaction metrics
    pub static ref REDACTIONS_TOTAL: IntCounter = IntCounter::new(
        "redactions_total",
        "Outputs that contained redacted secrets"
    ).expect("Failed to create redactions metric");

    // Error handling metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("errors_total", "Handled errors by category"),
        &["category"]
    ).expect("Failed to create errors metric");

    pub static ref CIRCUIT_OPENS_TOTAL: IntCounter = IntCounter::new(
        "circuit_opens_total",
        "Circuit breaker open transitions"
    ).expect("Failed to create circuit opens metric");
}

/// Initialize metrics registry - must be called once at service startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(POLICY_DECISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLICY_CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DANGEROUS_PATTERN_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMIT_DENIALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXECUTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXECUTION_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(TRUST_VERIFICATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REDACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CIRCUIT_OPENS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // May fail if already registered by another test; init is once-per-process
        let _ = init();
    }

    #[test]
    fn test_decision_counters() {
        POLICY_DECISIONS_TOTAL.with_label_values(&["allow"]).inc();
        POLICY_DECISIONS_TOTAL.with_label_values(&["block"]).inc();
        assert!(POLICY_DECISIONS_TOTAL.with_label_values(&["allow"]).get() >= 1);
    }

    #[test]
    fn test_gather_metrics() {
        let _ = init();
        EXECUTIONS_TOTAL.with_label_values(&["success"]).inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("executions_total"));
    }
}
