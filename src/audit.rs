//! Audit Log
//!
//! Append-only, size-bounded record of every policy decision and execution.
//! Oldest entries are dropped first. Entries are redacted on the way in so
//! no secret survives in the log, and the log can be exported as JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AuditConfig;
use crate::errors::Severity;
use crate::redact;

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the event happened
    pub timestamp: DateTime<Utc>,

    /// Command word
    pub command: String,

    /// Arguments (redacted)
    pub args: Vec<String>,

    /// Component that produced the entry
    pub source: String,

    /// Decision or outcome label (e.g. "allow", "block", "executed")
    pub action: String,

    /// Event severity
    pub severity: Severity,
}

impl AuditEntry {
    /// Build an entry stamped now, redacting command and arguments.
    pub fn new(
        command: &str,
        args: &[String],
        source: &str,
        action: &str,
        severity: Severity,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            command: redact::redact(command),
            args: args.iter().map(|a| redact::redact(a)).collect(),
            source: source.to_string(),
            action: action.to_string(),
            severity,
        }
    }
}

/// Bounded append-only audit log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    capacity: usize,
    export_path: Option<String>,
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
}

impl AuditLog {
    /// Create a log from configuration.
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            export_path: config.export_path.clone(),
            entries: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Export to the configured path, a no-op when none is configured.
    pub async fn export(&self) -> Result<()> {
        if let Some(path) = self.export_path.clone() {
            self.export_json(&path).await?;
        }
        Ok(())
    }

    /// Append an entry, evicting the oldest when full.
    pub async fn append(&self, entry: AuditEntry) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        debug!(
            command = %entry.command,
            action = %entry.action,
            source = %entry.source,
            "Audit"
        );
        entries.push_back(entry);
    }

    /// The most recent `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Export all retained entries to a JSON file.
    pub async fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let entries = self.entries.read().await;
        let snapshot: Vec<&AuditEntry> = entries.iter().collect();

        let content =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize audit log")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit export directory {:?}", parent))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write audit export to {:?}", path))?;

        Ok(())
    }
}
