//! Workspace Path Containment
//!
//! Every path-like argument is resolved against the workspace root and must
//! stay inside it. Resolution follows symlinks for the existing part of the
//! path, so a link pointing outside the workspace cannot smuggle a
//! contained-looking argument out.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::errors::GuardError;
use crate::policy::CommandTable;
use crate::validation::{looks_like_path, BLOCKED_EXTENSIONS};

/// Path components that reference credential material or VCS internals.
const BLOCKED_FRAGMENTS: &[&str] = &[
    ".env", ".git", ".ssh", ".aws", ".gnupg", ".kube", ".docker", "id_rsa", "id_ed25519",
    "credentials", ".netrc", ".npmrc", ".htpasswd",
];

/// Containment policy anchored at a workspace root.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
}

impl PathPolicy {
    /// Anchor the policy at `workspace_root`, which must exist.
    pub fn new(workspace_root: &str) -> Result<Self, GuardError> {
        let root = fs::canonicalize(workspace_root).map_err(|e| {
            GuardError::Config(format!(
                "workspace root '{workspace_root}' is not usable: {e}"
            ))
        })?;
        Ok(Self { root })
    }

    /// The canonicalized workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve one path argument and enforce containment.
    ///
    /// Rejects traversal segments, blocked fragments, and blocked
    /// extensions before resolution; rejects anything resolving outside
    /// the root after.
    pub fn resolve(&self, arg: &str) -> Result<PathBuf, GuardError> {
        let raw = Path::new(arg);

        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(GuardError::Containment(format!(
                "'{arg}' contains a traversal segment"
            )));
        }

        for component in raw.components() {
            if let Component::Normal(name) = component {
                if let Some(name) = name.to_str() {
                    if BLOCKED_FRAGMENTS.contains(&name) {
                        return Err(GuardError::SecurityViolation(format!(
                            "'{arg}' references blocked path fragment '{name}'"
                        )));
                    }
                }
            }
        }

        if let Some(ext) = raw.extension().and_then(|e| e.to_str()) {
            if BLOCKED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return Err(GuardError::SecurityViolation(format!(
                    "'{arg}' has a blocked extension"
                )));
            }
        }

        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let resolved = canonicalize_lenient(&candidate);

        if !resolved.starts_with(&self.root) {
            return Err(GuardError::Containment(format!(
                "'{arg}' resolves outside the workspace root"
            )));
        }

        Ok(resolved)
    }

    /// Resolve every path-like argument of a command.
    ///
    /// For file commands every non-flag argument is a path; for everything
    /// else only arguments that look like paths are resolved.
    pub fn extract_paths(
        &self,
        command: &str,
        args: &[String],
        table: &CommandTable,
    ) -> Result<Vec<PathBuf>, GuardError> {
        let all_args_are_paths = table.is_file_command(command);
        let mut paths = Vec::new();

        for arg in args {
            if arg.starts_with('-') {
                continue;
            }
            if all_args_are_paths || looks_like_path(arg) {
                paths.push(self.resolve(arg)?);
            }
        }

        Ok(paths)
    }
}

/// Canonicalize the deepest existing ancestor, then re-append the
/// not-yet-existing tail. Keeps containment checks meaningful for paths
/// that will be created by the command.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }

    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut base = fs::canonicalize(&existing).unwrap_or(existing);
    for segment in tail.iter().rev() {
        base.push(segment);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(dir: &TempDir) -> PathPolicy {
        PathPolicy::new(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_relative_path_resolves_under_root() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        let resolved = policy.resolve("src/main.rs").unwrap();
        assert!(resolved.starts_with(policy.root()));
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        let err = policy.resolve("../outside.txt").unwrap_err();
        assert!(matches!(err, GuardError::Containment(_)));
    }

    #[test]
    fn test_absolute_path_outside_root_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        let err = policy.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, GuardError::Containment(_)));
    }

    #[test]
    fn test_absolute_path_inside_root_accepted() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);
        let inside = policy.root().join("notes.txt");

        let resolved = policy.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_blocked_fragments_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        for arg in [".env", ".git/config", "home/.ssh/id_rsa", "creds/.aws/config"] {
            let err = policy.resolve(arg).unwrap_err();
            assert!(
                matches!(err, GuardError::SecurityViolation(_)),
                "expected rejection for {arg:?}"
            );
        }
    }

    #[test]
    fn test_blocked_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        let err = policy.resolve("certs/server.pem").unwrap_err();
        assert!(matches!(err, GuardError::SecurityViolation(_)));
    }

    #[test]
    fn test_symlink_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let policy = policy(&dir);

        let link = dir.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let err = policy.resolve("escape/secret.txt").unwrap_err();
        assert!(matches!(err, GuardError::Containment(_)));
    }

    #[test]
    fn test_nonexistent_tail_is_contained() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);

        let resolved = policy.resolve("new_dir/new_file.txt").unwrap();
        assert!(resolved.starts_with(policy.root()));
    }

    #[test]
    fn test_extract_paths_file_command() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);
        let table = CommandTable::new();

        let args = vec!["-f".to_string(), "a.txt".to_string(), "b.txt".to_string()];
        let paths = policy.extract_paths("rm", &args, &table).unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_extract_paths_search_command() {
        let dir = TempDir::new().unwrap();
        let policy = policy(&dir);
        let table = CommandTable::new();

        // The pattern is not a path; the directory argument is
        let args = vec!["-n".to_string(), "pattern".to_string(), "src/".to_string()];
        let paths = policy.extract_paths("grep", &args, &table).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_missing_root_rejected() {
        assert!(matches!(
            PathPolicy::new("/nonexistent/workspace"),
            Err(GuardError::Config(_))
        ));
    }
}
