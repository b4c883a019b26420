//! Runtime Assertion Engine
//!
//! Rule-of-thumb self-checking in the style of the JPL coding standard:
//! components register function entry/exit, assert invariants, declare loop
//! bounds, and track large allocations. The engine aggregates everything
//! into a compliance report. This is internal self-verification, not an
//! end-user feature.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, warn};

use crate::errors::GuardError;

/// Functions should carry at least this many assertions to count as
/// compliant in the report.
const MIN_ASSERTIONS_PER_FUNCTION: usize = 2;

/// Tracked allocation volume above which a warning is logged, in bytes.
const ALLOCATION_WARN_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Default, Clone)]
struct FunctionStats {
    assertions: usize,
    failures: usize,
}

#[derive(Debug)]
struct LoopState {
    max_iterations: u64,
    iterations: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    call_stack: Vec<String>,
    functions: HashMap<String, FunctionStats>,
    loops: HashMap<String, LoopState>,
    allocations: HashMap<String, usize>,
    allocated_bytes: usize,
    total_assertions: usize,
    total_failures: usize,
}

/// Aggregated self-check results.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// Functions that registered at least one entry
    pub total_functions: usize,

    /// Functions meeting the minimum assertion count
    pub compliant_functions: usize,

    /// Percentage of compliant functions (100 when none registered)
    pub compliance_percent: f64,

    /// Loops currently active (entered, not yet exited)
    pub active_loops: usize,

    /// Total assertions evaluated
    pub total_assertions: usize,

    /// Assertions that failed
    pub assertion_failures: usize,

    /// Currently tracked allocation volume in bytes
    pub allocated_bytes: usize,

    /// Overall verdict: no failures and compliance at or above 80%
    pub passing: bool,
}

/// Cross-cutting runtime assertion tracker.
///
/// Interior mutability behind a plain mutex so both sync and async call
/// sites can use it without awaiting.
#[derive(Debug, Default)]
pub struct AssertionEngine {
    state: Mutex<EngineState>,
}

impl AssertionEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register entry into a named function.
    pub fn enter_function(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.call_stack.push(name.to_string());
        state.functions.entry(name.to_string()).or_default();
    }

    /// Register exit from a named function. Exits are expected in LIFO
    /// order; a mismatch is logged and the stack unwinds to the match.
    pub fn exit_function(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.call_stack.is_empty() {
            warn!(function = name, "Function exit with empty call stack");
            return;
        }

        let matches_top = state.call_stack.last().map(|t| t == name).unwrap_or(false);
        if matches_top {
            state.call_stack.pop();
        } else {
            let top = state.call_stack.last().cloned().unwrap_or_default();
            warn!(expected = %top, got = name, "Unbalanced function exit");
            if let Some(pos) = state.call_stack.iter().rposition(|f| f == name) {
                state.call_stack.truncate(pos);
            }
        }
    }

    /// Evaluate an assertion, attributing it to the innermost entered
    /// function. Returns the condition so call sites can branch on it.
    pub fn check(&self, condition: bool, message: &str, context: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.total_assertions += 1;

        let function = state.call_stack.last().cloned().unwrap_or_default();
        {
            let stats = state.functions.entry(function.clone()).or_default();
            stats.assertions += 1;
            if !condition {
                stats.failures += 1;
            }
        }

        if !condition {
            state.total_failures += 1;
            error!(
                function = %function,
                context,
                "Assertion failed: {message}"
            );
        }
        condition
    }

    /// Like [`check`](Self::check), but failure becomes an error the caller
    /// must propagate.
    pub fn require(&self, condition: bool, message: &str, context: &str) -> Result<(), GuardError> {
        if self.check(condition, message, context) {
            Ok(())
        } else {
            Err(GuardError::SecurityViolation(format!(
                "assertion failed in {context}: {message}"
            )))
        }
    }

    /// Declare a named loop with a maximum iteration count.
    pub fn enter_loop(&self, name: &str, max_iterations: u64) {
        let mut state = self.state.lock().unwrap();
        state.loops.insert(
            name.to_string(),
            LoopState {
                max_iterations,
                iterations: 0,
            },
        );
    }

    /// Count one iteration. Returns false once the declared bound is
    /// exceeded; the loop must terminate.
    pub fn check_loop(&self, name: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.loops.get_mut(name) {
            Some(entry) => {
                entry.iterations += 1;
                if entry.iterations > entry.max_iterations {
                    error!(
                        loop_name = name,
                        max = entry.max_iterations,
                        "Loop exceeded its declared bound"
                    );
                    false
                } else {
                    true
                }
            }
            None => {
                warn!(loop_name = name, "check_loop on undeclared loop");
                false
            }
        }
    }

    /// Close out a named loop.
    pub fn exit_loop(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.loops.remove(name).is_none() {
            warn!(loop_name = name, "exit_loop on undeclared loop");
        }
    }

    /// Track an allocation by id.
    pub fn record_alloc(&self, id: &str, size: usize) {
        let mut state = self.state.lock().unwrap();
        state.allocations.insert(id.to_string(), size);
        state.allocated_bytes = state.allocated_bytes.saturating_add(size);
        if state.allocated_bytes > ALLOCATION_WARN_BYTES {
            warn!(
                bytes = state.allocated_bytes,
                "Tracked allocations above warning threshold"
            );
        }
    }

    /// Release a tracked allocation.
    pub fn record_dealloc(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(size) = state.allocations.remove(id) {
            state.allocated_bytes = state.allocated_bytes.saturating_sub(size);
        } else {
            debug!(id, "Deallocation for untracked id");
        }
    }

    /// Produce the aggregated compliance report.
    pub fn compliance_report(&self) -> ComplianceReport {
        let state = self.state.lock().unwrap();

        let total_functions = state.functions.len();
        let compliant_functions = state
            .functions
            .values()
            .filter(|s| s.assertions >= MIN_ASSERTIONS_PER_FUNCTION)
            .count();
        let compliance_percent = if total_functions == 0 {
            100.0
        } else {
            compliant_functions as f64 / total_functions as f64 * 100.0
        };

        ComplianceReport {
            total_functions,
            compliant_functions,
            compliance_percent,
            active_loops: state.loops.len(),
            total_assertions: state.total_assertions,
            assertion_failures: state.total_failures,
            allocated_bytes: state.allocated_bytes,
            passing: state.total_failures == 0 && compliance_percent >= 80.0,
        }
    }

    /// Current call-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state.lock().unwrap().call_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_tracking_and_stack() {
        let engine = AssertionEngine::new();
        engine.enter_function("outer");
        engine.enter_function("inner");
        assert_eq!(engine.stack_depth(), 2);

        engine.exit_function("inner");
        engine.exit_function("outer");
        assert_eq!(engine.stack_depth(), 0);
    }

    #[test]
    fn test_unbalanced_exit_unwinds() {
        let engine = AssertionEngine::new();
        engine.enter_function("outer");
        engine.enter_function("inner");

        // Exiting the outer frame unwinds past the inner one
        engine.exit_function("outer");
        assert_eq!(engine.stack_depth(), 0);
    }

    #[test]
    fn test_check_counts_per_function() {
        let engine = AssertionEngine::new();
        engine.enter_function("validate");
        assert!(engine.check(true, "always holds", "test"));
        assert!(!engine.check(false, "never holds", "test"));
        engine.exit_function("validate");

        let report = engine.compliance_report();
        assert_eq!(report.total_assertions, 2);
        assert_eq!(report.assertion_failures, 1);
        assert!(!report.passing);
    }

    #[test]
    fn test_require_propagates_failure() {
        let engine = AssertionEngine::new();
        assert!(engine.require(true, "ok", "test").is_ok());
        assert!(engine.require(false, "bad", "test").is_err());
    }

    #[test]
    fn test_loop_bounds() {
        let engine = AssertionEngine::new();
        engine.enter_loop("scan", 3);

        assert!(engine.check_loop("scan"));
        assert!(engine.check_loop("scan"));
        assert!(engine.check_loop("scan"));
        assert!(!engine.check_loop("scan"), "fourth iteration exceeds bound");

        engine.exit_loop("scan");
        assert_eq!(engine.compliance_report().active_loops, 0);
    }

    #[test]
    fn test_undeclared_loop_fails_closed() {
        let engine = AssertionEngine::new();
        assert!(!engine.check_loop("phantom"));
    }

    #[test]
    fn test_allocation_tracking() {
        let engine = AssertionEngine::new();
        engine.record_alloc("buffer-1", 4096);
        engine.record_alloc("buffer-2", 1024);
        assert_eq!(engine.compliance_report().allocated_bytes, 5120);

        engine.record_dealloc("buffer-1");
        assert_eq!(engine.compliance_report().allocated_bytes, 1024);

        // Unknown id is ignored
        engine.record_dealloc("buffer-9");
        assert_eq!(engine.compliance_report().allocated_bytes, 1024);
    }

    #[test]
    fn test_compliance_percentage() {
        let engine = AssertionEngine::new();

        engine.enter_function("thorough");
        engine.check(true, "a", "t");
        engine.check(true, "b", "t");
        engine.exit_function("thorough");

        engine.enter_function("sparse");
        engine.check(true, "a", "t");
        engine.exit_function("sparse");

        let report = engine.compliance_report();
        assert_eq!(report.total_functions, 2);
        assert_eq!(report.compliant_functions, 1);
        assert!((report.compliance_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_engine_passes() {
        let report = AssertionEngine::new().compliance_report();
        assert!(report.passing);
        assert_eq!(report.compliance_percent, 100.0);
    }
}
