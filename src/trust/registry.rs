//! Tool Registry and Learned-Trust Store
//!
//! The registry is split in two, with different mutability:
//!
//! - the **seed registry**: built-in entries merged with an optional TOML
//!   file at startup, immutable afterwards. It says *which* tools exist and
//!   *where* they are allowed to live.
//! - the **learned store**: fingerprints recorded on first verification
//!   (trust-on-first-use), persisted as JSON. Verification reads both but
//!   writes only the learned store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Broad classification of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Content/file search (rg, fd)
    Search,

    /// Version control (git)
    Vcs,

    /// Data processing utilities (jq)
    Utility,
}

/// A seed registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool kind
    pub kind: ToolKind,

    /// Filesystem locations the tool is allowed to resolve to
    pub allowed_paths: Vec<PathBuf>,

    /// Capability labels granted to the tool
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Whether invoking the tool needs explicit consent
    #[serde(default)]
    pub requires_consent: bool,
}

/// Immutable registry of known tools, keyed by basename.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolRecord>,
}

/// On-disk shape of a registry file.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tools: HashMap<String, ToolRecord>,
}

impl ToolRegistry {
    /// Registry containing only the built-in entries.
    pub fn builtin() -> Self {
        let mut tools = HashMap::new();

        let search_paths = |name: &str| -> Vec<PathBuf> {
            vec![
                PathBuf::from(format!("/usr/bin/{name}")),
                PathBuf::from(format!("/usr/local/bin/{name}")),
                PathBuf::from(format!("/opt/homebrew/bin/{name}")),
            ]
        };

        tools.insert(
            "rg".to_string(),
            ToolRecord {
                kind: ToolKind::Search,
                allowed_paths: search_paths("rg"),
                permissions: vec!["read".to_string()],
                requires_consent: false,
            },
        );
        tools.insert(
            "fd".to_string(),
            ToolRecord {
                kind: ToolKind::Search,
                allowed_paths: search_paths("fd"),
                permissions: vec!["read".to_string()],
                requires_consent: false,
            },
        );
        tools.insert(
            "git".to_string(),
            ToolRecord {
                kind: ToolKind::Vcs,
                allowed_paths: search_paths("git"),
                permissions: vec!["read".to_string(), "write".to_string()],
                requires_consent: false,
            },
        );
        tools.insert(
            "jq".to_string(),
            ToolRecord {
                kind: ToolKind::Utility,
                allowed_paths: search_paths("jq"),
                permissions: vec!["read".to_string()],
                requires_consent: false,
            },
        );

        Self { tools }
    }

    /// Built-in entries merged with an optional registry file.
    ///
    /// File entries take precedence over built-ins with the same name.
    pub fn load(registry_path: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin();

        if let Some(path) = registry_path {
            if path.exists() {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read tool registry {:?}", path))?;
                let file: RegistryFile = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse tool registry {:?}", path))?;
                let loaded = file.tools.len();
                registry.tools.extend(file.tools);
                tracing::info!(loaded, "Merged tool registry from {:?}", path);
            } else {
                tracing::debug!("Tool registry {:?} not found, using built-ins", path);
            }
        }

        Ok(registry)
    }

    /// Registry built from explicit entries (for testing and embedding).
    pub fn from_tools(tools: HashMap<String, ToolRecord>) -> Self {
        Self { tools }
    }

    /// Look up a tool by basename.
    pub fn get(&self, name: &str) -> Option<&ToolRecord> {
        self.tools.get(name)
    }

    /// Whether a basename is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

/// A fingerprint learned on first verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedFingerprint {
    /// Hex-encoded SHA-256 of the tool binary
    pub checksum: String,

    /// Hex-encoded HMAC-SHA256 signature, if signatures are in use
    pub signature: Option<String>,

    /// When the fingerprint was first recorded
    pub first_seen: DateTime<Utc>,

    /// When the fingerprint last matched
    pub last_verified: DateTime<Utc>,
}

/// Persisted trust-on-first-use store, keyed by tool name.
#[derive(Debug, Default)]
pub struct LearnedStore {
    path: Option<PathBuf>,
    entries: HashMap<String, LearnedFingerprint>,
}

impl LearnedStore {
    /// In-memory store without persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`, starting empty if the file is absent.
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read learned-trust store {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse learned-trust store {:?}", path))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Look up a learned fingerprint.
    pub fn get(&self, name: &str) -> Option<&LearnedFingerprint> {
        self.entries.get(name)
    }

    /// Record or refresh a fingerprint and persist the store.
    pub fn record(&mut self, name: &str, fingerprint: LearnedFingerprint) -> Result<()> {
        self.entries.insert(name.to_string(), fingerprint);
        self.persist()
    }

    /// Refresh the last-verified timestamp for an existing entry.
    pub fn touch(&mut self, name: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.last_verified = at;
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create learned-trust directory {:?}", parent)
                })?;
            }
            let content = serde_json::to_string_pretty(&self.entries)
                .context("Failed to serialize learned-trust store")?;
            fs::write(path, content)
                .with_context(|| format!("Failed to write learned-trust store {:?}", path))?;
        }
        Ok(())
    }

    /// Number of learned fingerprints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_registry() {
        let registry = ToolRegistry::builtin();
        assert!(registry.contains("rg"));
        assert!(registry.contains("git"));
        assert!(!registry.contains("nc"));

        let rg = registry.get("rg").unwrap();
        assert_eq!(rg.kind, ToolKind::Search);
        assert!(!rg.requires_consent);
    }

    #[test]
    fn test_registry_file_merges_over_builtins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            r#"
[tools.ast-grep]
kind = "search"
allowed_paths = ["/usr/local/bin/ast-grep"]
permissions = ["read"]

[tools.git]
kind = "vcs"
allowed_paths = ["/custom/bin/git"]
requires_consent = true
"#,
        )
        .unwrap();

        let registry = ToolRegistry::load(Some(path.as_path())).unwrap();
        assert!(registry.contains("ast-grep"));
        // File entry replaced the built-in
        let git = registry.get("git").unwrap();
        assert!(git.requires_consent);
        assert_eq!(git.allowed_paths, vec![PathBuf::from("/custom/bin/git")]);
        // Untouched built-ins survive
        assert!(registry.contains("rg"));
    }

    #[test]
    fn test_missing_registry_file_uses_builtins() {
        let registry = ToolRegistry::load(Some(Path::new("/nonexistent/registry.toml"))).unwrap();
        assert!(registry.contains("rg"));
    }

    #[test]
    fn test_learned_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learned.json");

        let mut store = LearnedStore::load(path.clone()).unwrap();
        assert!(store.is_empty());

        let now = Utc::now();
        store
            .record(
                "rg",
                LearnedFingerprint {
                    checksum: "ab".repeat(32),
                    signature: None,
                    first_seen: now,
                    last_verified: now,
                },
            )
            .unwrap();

        let reloaded = LearnedStore::load(path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("rg").unwrap().checksum, "ab".repeat(32));
    }

    #[test]
    fn test_in_memory_store_does_not_persist() {
        let mut store = LearnedStore::in_memory();
        let now = Utc::now();
        store
            .record(
                "fd",
                LearnedFingerprint {
                    checksum: "cd".repeat(32),
                    signature: None,
                    first_seen: now,
                    last_verified: now,
                },
            )
            .unwrap();
        assert_eq!(store.len(), 1);
    }
}
