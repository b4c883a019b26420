//! Anomaly Detection
//!
//! Per-client counters over recent attempts: rapid-fire bursts, identical
//! command repetition, error rate, and skew toward a single command type.
//! Crossing any threshold blocks the client for the configured duration.
//! Attempts are observed whether or not the window checks later deny them.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::Serialize;

use super::config::RateLimitConfig;

/// Which anomaly threshold was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Too many attempts inside the rapid-fire window
    RapidFire,

    /// The same command line repeated too many times
    IdenticalRepetition,

    /// Too many recorded errors
    ErrorRate,

    /// Too many requests of one command type
    TypeFlood,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnomalyKind::RapidFire => "rapid-fire",
            AnomalyKind::IdenticalRepetition => "identical-repetition",
            AnomalyKind::ErrorRate => "error-rate",
            AnomalyKind::TypeFlood => "type-flood",
        };
        f.write_str(name)
    }
}

/// Rolling anomaly counters for one client.
#[derive(Debug, Default)]
pub struct AnomalyTracker {
    /// Recent attempts: (timestamp, full command line)
    attempts: VecDeque<(Instant, String)>,

    /// Errors recorded against this client
    error_count: u32,

    /// Attempts per command type within the retained history
    type_counts: HashMap<String, u32>,
}

impl AnomalyTracker {
    /// Observe an attempt. Called for every request before window checks,
    /// so denied attempts still count toward anomaly thresholds.
    pub fn observe(&mut self, now: Instant, command_line: &str, command_type: &str) {
        self.attempts.push_back((now, command_line.to_string()));
        *self.type_counts.entry(command_type.to_string()).or_insert(0) += 1;
    }

    /// Record an execution error attributed to this client.
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    /// Check all thresholds against the retained history.
    pub fn detect(&self, now: Instant, config: &RateLimitConfig) -> Option<AnomalyKind> {
        let rapid_cutoff = now
            .checked_sub(config.rapid_fire_window())
            .unwrap_or(now);
        let rapid = self
            .attempts
            .iter()
            .filter(|(t, _)| *t >= rapid_cutoff)
            .count() as u32;
        if rapid >= config.rapid_fire_threshold {
            return Some(AnomalyKind::RapidFire);
        }

        if let Some((_, latest)) = self.attempts.back() {
            let identical = self
                .attempts
                .iter()
                .filter(|(_, line)| line == latest)
                .count() as u32;
            if identical >= config.identical_command_threshold {
                return Some(AnomalyKind::IdenticalRepetition);
            }
        }

        if self.error_count >= config.error_threshold {
            return Some(AnomalyKind::ErrorRate);
        }

        if self
            .type_counts
            .values()
            .any(|&count| count >= config.per_type_threshold)
        {
            return Some(AnomalyKind::TypeFlood);
        }

        None
    }

    /// Drop attempts older than the sustained window and rebuild the type
    /// counts from what remains. Error counts decay fully once the history
    /// empties.
    pub fn prune(&mut self, now: Instant, config: &RateLimitConfig) {
        let cutoff = now.checked_sub(config.window()).unwrap_or(now);
        let mut changed = false;
        while let Some((t, _)) = self.attempts.front() {
            if *t < cutoff {
                self.attempts.pop_front();
                changed = true;
            } else {
                break;
            }
        }

        if changed {
            self.type_counts.clear();
            for (_, line) in &self.attempts {
                let ty = line.split_whitespace().next().unwrap_or("").to_string();
                *self.type_counts.entry(ty).or_insert(0) += 1;
            }
            if self.attempts.is_empty() {
                self.error_count = 0;
            }
        }
    }

    /// Reset all counters. Used after a block expires so one bad episode
    /// does not immediately re-trigger.
    pub fn reset(&mut self) {
        self.attempts.clear();
        self.type_counts.clear();
        self.error_count = 0;
    }

    /// Retained attempt count.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether no attempts are retained.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> RateLimitConfig {
        RateLimitConfig::default()
    }

    #[test]
    fn test_rapid_fire_detection() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();

        for i in 0..15 {
            tracker.observe(now + Duration::from_millis(i * 10), "ls -la", "ls");
        }
        let check_at = now + Duration::from_millis(200);
        assert_eq!(tracker.detect(check_at, &config()), Some(AnomalyKind::RapidFire));
    }

    #[test]
    fn test_identical_repetition_detection() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();

        // Spread out beyond the rapid-fire window so only repetition triggers
        for i in 0..20 {
            tracker.observe(now + Duration::from_secs(i), "grep foo src", "grep");
        }
        let check_at = now + Duration::from_secs(25);
        assert_eq!(
            tracker.detect(check_at, &config()),
            Some(AnomalyKind::IdenticalRepetition)
        );
    }

    #[test]
    fn test_error_rate_detection() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();
        tracker.observe(now, "ls", "ls");

        for _ in 0..10 {
            tracker.record_error();
        }
        assert_eq!(tracker.detect(now, &config()), Some(AnomalyKind::ErrorRate));
    }

    #[test]
    fn test_type_flood_detection() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();

        // Varying arguments defeat the identical-repetition counter; the
        // per-type counter still sees one command type flooding.
        let cfg = RateLimitConfig {
            rapid_fire_threshold: 1000,
            identical_command_threshold: 1000,
            ..Default::default()
        };
        for i in 0..50 {
            tracker.observe(now + Duration::from_millis(i), &format!("find dir{i}"), "find");
        }
        assert_eq!(tracker.detect(now, &cfg), Some(AnomalyKind::TypeFlood));
    }

    #[test]
    fn test_below_thresholds_is_clean() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();

        tracker.observe(now, "ls -la", "ls");
        tracker.observe(now + Duration::from_secs(1), "pwd", "pwd");
        tracker.record_error();

        assert_eq!(tracker.detect(now + Duration::from_secs(2), &config()), None);
    }

    #[test]
    fn test_prune_decays_history() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();

        for i in 0..30 {
            tracker.observe(now + Duration::from_millis(i), "ls", "ls");
        }
        tracker.record_error();

        // Everything falls outside the sustained window
        let later = now + Duration::from_secs(120);
        tracker.prune(later, &config());
        assert!(tracker.is_empty());
        assert_eq!(tracker.detect(later, &config()), None);
    }

    #[test]
    fn test_reset_clears_all() {
        let mut tracker = AnomalyTracker::default();
        let now = Instant::now();
        for _ in 0..40 {
            tracker.observe(now, "ls", "ls");
            tracker.record_error();
        }
        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.detect(now, &config()), None);
    }
}
