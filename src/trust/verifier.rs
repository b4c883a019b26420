//! Trusted Tool Verification
//!
//! Cryptographic identity checks for executable artifacts. A tool seen for
//! the first time has its fingerprint recorded (trust-on-first-use); any
//! later mismatch marks it untrusted. Results are cached by (resolved path,
//! options) with a TTL.

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::registry::{LearnedFingerprint, LearnedStore, ToolRegistry};
use crate::config::TrustConfig;

type HmacSha256 = Hmac<Sha256>;

/// Outcome classification of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    /// First sighting; fingerprint recorded
    Learned,

    /// Fingerprint matched the learned record
    Verified,

    /// Fingerprint differs from the learned record
    Mismatch,

    /// Basename not present in the registry
    Unregistered,

    /// File does not exist
    Missing,

    /// File exists but not at a registered path
    UntrustedPath,
}

impl VerifyStatus {
    /// Stable lowercase code for audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStatus::Learned => "learned",
            VerifyStatus::Verified => "verified",
            VerifyStatus::Mismatch => "mismatch",
            VerifyStatus::Unregistered => "unregistered",
            VerifyStatus::Missing => "missing",
            VerifyStatus::UntrustedPath => "untrusted_path",
        }
    }
}

/// Verification options, part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifyOptions {
    /// Also compute and compare an HMAC-SHA256 signature
    pub check_signature: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_signature: true,
        }
    }
}

/// Result of verifying one tool artifact.
#[derive(Debug, Clone)]
pub struct Verification {
    /// Whether the artifact may be executed
    pub trusted: bool,

    /// Outcome classification
    pub status: VerifyStatus,

    /// Human-readable explanation
    pub reason: String,

    /// Hex-encoded SHA-256 of the artifact, when it was computed
    pub checksum: Option<String>,
}

impl Verification {
    fn untrusted(status: VerifyStatus, reason: impl Into<String>) -> Self {
        Self {
            trusted: false,
            status,
            reason: reason.into(),
            checksum: None,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedVerification {
    verification: Verification,
    at: Instant,
}

/// Verifier for registered tool artifacts.
///
/// The HMAC secret is generated once per process: signatures bind learned
/// fingerprints to this process lifetime and are not portable across
/// restarts unless the learned store is re-learned.
pub struct ToolVerifier {
    config: TrustConfig,
    registry: ToolRegistry,
    learned: Arc<RwLock<LearnedStore>>,
    cache: Arc<RwLock<HashMap<(PathBuf, VerifyOptions), CachedVerification>>>,
    secret: [u8; 32],
}

impl ToolVerifier {
    /// Create a verifier from configuration, loading the seed registry and
    /// the learned store.
    pub fn new(config: TrustConfig) -> Result<Self> {
        let registry = ToolRegistry::load(config.registry_path.as_deref().map(Path::new))?;
        let learned = match &config.learned_store_path {
            Some(path) => LearnedStore::load(PathBuf::from(path))?,
            None => LearnedStore::in_memory(),
        };

        Ok(Self {
            config,
            registry,
            learned: Arc::new(RwLock::new(learned)),
            cache: Arc::new(RwLock::new(HashMap::new())),
            secret: rand::random(),
        })
    }

    /// Create a verifier with an explicit registry (for testing).
    pub fn with_registry(config: TrustConfig, registry: ToolRegistry) -> Result<Self> {
        let learned = match &config.learned_store_path {
            Some(path) => LearnedStore::load(PathBuf::from(path))?,
            None => LearnedStore::in_memory(),
        };
        Ok(Self {
            config,
            registry,
            learned: Arc::new(RwLock::new(learned)),
            cache: Arc::new(RwLock::new(HashMap::new())),
            secret: rand::random(),
        })
    }

    /// Verify a tool artifact at `path`.
    ///
    /// The cache is consulted first; a fresh result is computed and cached
    /// on miss or expiry.
    pub async fn verify_tool(&self, path: &Path, options: VerifyOptions) -> Result<Verification> {
        let resolved = self.resolve(path);
        let cache_key = (resolved.clone(), options);
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                if cached.at.elapsed() < ttl {
                    debug!(path = %resolved.display(), "Verification cache hit");
                    return Ok(cached.verification.clone());
                }
            }
        }

        let verification = self.verify_uncached(&resolved, options).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            cache_key,
            CachedVerification {
                verification: verification.clone(),
                at: Instant::now(),
            },
        );

        Ok(verification)
    }

    async fn verify_uncached(
        &self,
        resolved: &Path,
        options: VerifyOptions,
    ) -> Result<Verification> {
        let name = match resolved.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                return Ok(Verification::untrusted(
                    VerifyStatus::Unregistered,
                    "path has no basename",
                ))
            }
        };

        let Some(record) = self.registry.get(&name) else {
            debug!(tool = %name, "Tool not in registry");
            return Ok(Verification::untrusted(
                VerifyStatus::Unregistered,
                format!("'{name}' is not a registered tool"),
            ));
        };

        if !resolved.exists() {
            return Ok(Verification::untrusted(
                VerifyStatus::Missing,
                format!("tool file {:?} does not exist", resolved),
            ));
        }

        let path_registered = record.allowed_paths.iter().any(|p| p == resolved);
        if !path_registered && !self.config.allow_self_signed {
            warn!(tool = %name, path = %resolved.display(), "Tool found outside registered paths");
            return Ok(Verification::untrusted(
                VerifyStatus::UntrustedPath,
                format!("{:?} is not a registered location for '{name}'", resolved),
            ));
        }

        let data = fs::read(resolved)
            .with_context(|| format!("Failed to read tool artifact {:?}", resolved))?;
        let checksum = hash_bytes(&data);
        let signature = options
            .check_signature
            .then(|| self.sign_bytes(&data));

        let now = Utc::now();
        let mut learned = self.learned.write().await;
        match learned.get(&name) {
            None => {
                info!(tool = %name, "Learning fingerprint on first verification");
                learned.record(
                    &name,
                    LearnedFingerprint {
                        checksum: checksum.clone(),
                        signature,
                        first_seen: now,
                        last_verified: now,
                    },
                )?;
                Ok(Verification {
                    trusted: true,
                    status: VerifyStatus::Learned,
                    reason: format!("fingerprint for '{name}' recorded"),
                    checksum: Some(checksum),
                })
            }
            Some(prior) => {
                let checksum_matches = prior.checksum == checksum;
                let signature_matches = match (options.check_signature, &prior.signature) {
                    (true, Some(stored)) => signature.as_deref() == Some(stored.as_str()),
                    // No stored signature to compare against
                    _ => true,
                };

                if checksum_matches && signature_matches {
                    learned.touch(&name, now)?;
                    Ok(Verification {
                        trusted: true,
                        status: VerifyStatus::Verified,
                        reason: format!("fingerprint for '{name}' matches"),
                        checksum: Some(checksum),
                    })
                } else {
                    warn!(tool = %name, "Fingerprint mismatch, marking untrusted");
                    Ok(Verification {
                        trusted: false,
                        status: VerifyStatus::Mismatch,
                        reason: format!("fingerprint for '{name}' does not match learned record"),
                        checksum: Some(checksum),
                    })
                }
            }
        }
    }

    /// Drop expired cache entries.
    pub async fn prune_cache(&self) {
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.at.elapsed() < ttl);
    }

    /// Spawn a background task pruning the verification cache once per TTL
    /// interval. Runs until aborted.
    pub fn start_cache_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        let interval = ttl.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut cache = cache.write().await;
                cache.retain(|_, cached| cached.at.elapsed() < ttl);
            }
        })
    }

    /// Whether a basename is a registered tool.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// The seed registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn sign_bytes(&self, data: &[u8]) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Hash bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::registry::{ToolKind, ToolRecord};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn registry_for(dir: &Path, name: &str) -> ToolRegistry {
        let mut tools = HashMap::new();
        tools.insert(
            name.to_string(),
            ToolRecord {
                kind: ToolKind::Search,
                allowed_paths: vec![dir.join(name)],
                permissions: vec!["read".to_string()],
                requires_consent: false,
            },
        );
        ToolRegistry::from_tools(tools)
    }

    fn verifier(dir: &Path, name: &str, config: TrustConfig) -> ToolVerifier {
        ToolVerifier::with_registry(config, registry_for(dir, name)).unwrap()
    }

    #[tokio::test]
    async fn test_trust_on_first_use_then_verified() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("rg");
        let canonical_dir = dir.path().canonicalize().unwrap();
        std::fs::write(&tool, b"binary-v1").unwrap();

        let verifier = verifier(&canonical_dir, "rg", TrustConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        });

        let first = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert!(first.trusted);
        assert_eq!(first.status, VerifyStatus::Learned);

        let second = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert!(second.trusted);
        assert_eq!(second.status, VerifyStatus::Verified);
    }

    #[tokio::test]
    async fn test_mutation_yields_mismatch() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();
        let tool = canonical_dir.join("rg");
        std::fs::write(&tool, b"binary-v1").unwrap();

        let verifier = verifier(&canonical_dir, "rg", TrustConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        });

        verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();

        std::fs::write(&tool, b"binary-v2-tampered").unwrap();
        let result = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert!(!result.trusted);
        assert_eq!(result.status, VerifyStatus::Mismatch);
    }

    #[tokio::test]
    async fn test_unregistered_tool() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();
        let tool = canonical_dir.join("netcat");
        std::fs::write(&tool, b"whatever").unwrap();

        let verifier = verifier(&canonical_dir, "rg", TrustConfig::default());
        let result = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert!(!result.trusted);
        assert_eq!(result.status, VerifyStatus::Unregistered);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();

        let verifier = verifier(&canonical_dir, "rg", TrustConfig::default());
        let result = verifier
            .verify_tool(&canonical_dir.join("rg"), VerifyOptions::default())
            .await
            .unwrap();
        assert!(!result.trusted);
        assert_eq!(result.status, VerifyStatus::Missing);
    }

    #[tokio::test]
    async fn test_unregistered_location_rejected_unless_self_signed() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();
        let elsewhere = canonical_dir.join("sub");
        std::fs::create_dir_all(&elsewhere).unwrap();
        let tool = elsewhere.join("rg");
        std::fs::write(&tool, b"binary").unwrap();

        let strict = verifier(&canonical_dir, "rg", TrustConfig::default());
        let result = strict
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, VerifyStatus::UntrustedPath);

        let lenient = verifier(&canonical_dir, "rg", TrustConfig {
            allow_self_signed: true,
            ..Default::default()
        });
        let result = lenient
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert!(result.trusted);
        assert_eq!(result.status, VerifyStatus::Learned);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_lookups() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();
        let tool = canonical_dir.join("rg");
        std::fs::write(&tool, b"binary-v1").unwrap();

        let verifier = verifier(&canonical_dir, "rg", TrustConfig::default());

        let first = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert_eq!(first.status, VerifyStatus::Learned);

        // Mutate the file; the cached Learned result is still served within
        // the TTL, so the mutation is not yet visible.
        std::fs::write(&tool, b"binary-v2").unwrap();
        let cached = verifier
            .verify_tool(&tool, VerifyOptions::default())
            .await
            .unwrap();
        assert_eq!(cached.status, VerifyStatus::Learned);
    }

    #[tokio::test]
    async fn test_learned_store_persists_across_verifiers() {
        let dir = TempDir::new().unwrap();
        let canonical_dir = dir.path().canonicalize().unwrap();
        let tool = canonical_dir.join("rg");
        std::fs::write(&tool, b"binary-v1").unwrap();
        let store_path = canonical_dir.join("learned.json");

        let config = TrustConfig {
            cache_ttl_ms: 0,
            learned_store_path: Some(store_path.to_string_lossy().into_owned()),
            ..Default::default()
        };

        // Signatures are keyed by a per-process secret, so only checksums
        // carry across verifier instances.
        let options = VerifyOptions {
            check_signature: false,
        };

        let v1 = verifier(&canonical_dir, "rg", config.clone());
        let first = v1.verify_tool(&tool, options).await.unwrap();
        assert_eq!(first.status, VerifyStatus::Learned);

        let v2 = verifier(&canonical_dir, "rg", config);
        let second = v2.verify_tool(&tool, options).await.unwrap();
        assert_eq!(second.status, VerifyStatus::Verified);
    }

    #[test]
    fn test_hash_bytes_known_value() {
        // SHA-256("") is the canonical empty digest
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_bytes(b"a").len(), 64);
    }
}
