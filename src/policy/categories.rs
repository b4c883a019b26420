//! Command Categorization
//!
//! The single authoritative table for command categories, per-command flag
//! whitelists, and the dangerous-pattern scan. Both the policy engine and
//! the executor read this table, so a command is never classified one way
//! at decision time and another way at execution time.
//!
//! Unknown commands default to Validate: they are neither trusted nor
//! rejected outright, but must pass structural validation first.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Category verdict for a command word, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    /// Refused unconditionally
    NeverAllow,

    /// Safe read-only commands allowed without validation
    AlwaysAllow,

    /// Must pass input validation before execution
    ValidateRequired,

    /// Returned to the caller for explicit confirmation
    RequireConsent,

    /// Registered tools verified by fingerprint instead of validation
    TrustedTool,

    /// Anything unlisted: validate
    Default,
}

/// Commands that are refused no matter what: privilege escalation, shells
/// (we never execute through one), machine state, and raw-device tools.
const NEVER_ALLOW: &[&str] = &[
    "sudo", "su", "doas", "sh", "bash", "zsh", "fish", "ksh", "dash", "eval", "exec", "shutdown",
    "reboot", "halt", "poweroff", "init", "mkfs", "dd", "fdisk", "mount", "umount", "chown",
    "modprobe", "insmod", "iptables", "nc", "netcat", "ncat",
];

/// Read-only commands with no file arguments worth gating.
const ALWAYS_ALLOW: &[&str] = &[
    "ls", "pwd", "echo", "whoami", "date", "which", "uname", "hostname", "true", "false",
];

/// Commands that read or transform files and must be validated.
const VALIDATE_REQUIRED: &[&str] = &[
    "cat", "head", "tail", "wc", "sort", "uniq", "cut", "diff", "du", "df", "ps", "stat", "file",
    "tree", "grep", "find", "node", "python", "python3", "cargo", "npm", "pip", "pip3", "make",
];

/// Destructive or outbound commands gated behind consent.
const REQUIRE_CONSENT: &[&str] = &[
    "rm", "rmdir", "mv", "cp", "chmod", "kill", "pkill", "curl", "wget", "ln", "touch", "tar",
];

/// Registered tools verified cryptographically.
const TRUSTED_TOOLS: &[&str] = &["rg", "fd", "git", "jq"];

/// Commands whose non-flag arguments are all filesystem paths.
const FILE_COMMANDS: &[&str] = &[
    "cat", "head", "tail", "rm", "rmdir", "mv", "cp", "chmod", "stat", "wc", "diff", "ln",
    "touch", "file", "du",
];

/// A named dangerous-command pattern.
pub struct DangerousPattern {
    /// Stable name used in block reasons
    pub name: &'static str,
    regex: Regex,
}

impl DangerousPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid dangerous pattern"),
        }
    }
}

/// Patterns scanned over the reconstructed command line. These catch
/// dangerous compositions that category lookup alone cannot: a permitted
/// command word with catastrophic arguments.
static DANGEROUS_PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    vec![
        DangerousPattern::new("recursive_root_delete", r"rm\s+(-[a-zA-Z]+\s+)*/\s*(\*)?\s*$"),
        DangerousPattern::new("no_preserve_root", r"--no-preserve-root"),
        DangerousPattern::new("fork_bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;"),
        DangerousPattern::new("pipe_to_shell", r"(curl|wget)[^|]*\|\s*(ba|z|fi)?sh"),
        DangerousPattern::new("raw_device_write", r"\bdd\b[^|]*\bof=/dev/"),
        DangerousPattern::new("device_redirect", r">\s*/dev/(sd|hd|nvme|mmcblk)"),
        DangerousPattern::new("filesystem_format", r"\bmkfs(\.[a-z0-9]+)?\b"),
        DangerousPattern::new("world_writable_root", r"chmod\s+(-[a-zA-Z]+\s+)*777\s+/\s*$"),
        DangerousPattern::new("privilege_escalation", r"\bsudo\b|\bsu\s+-"),
        DangerousPattern::new("machine_state", r"\b(shutdown|reboot|poweroff|halt)\b"),
        DangerousPattern::new("reverse_shell", r"\b(nc|netcat|ncat)\b.*\s-e\b"),
    ]
});

/// The authoritative command table.
#[derive(Debug)]
pub struct CommandTable {
    never_allow: HashSet<&'static str>,
    always_allow: HashSet<&'static str>,
    validate_required: HashSet<&'static str>,
    require_consent: HashSet<&'static str>,
    trusted_tools: HashSet<&'static str>,
    file_commands: HashSet<&'static str>,
    allowed_flags: HashMap<&'static str, &'static [&'static str]>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Build the built-in table.
    pub fn new() -> Self {
        let mut allowed_flags: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        allowed_flags.insert(
            "ls",
            &["-l", "-a", "-la", "-al", "-lh", "-lah", "-h", "-R", "-1", "-t", "-r", "--all"][..],
        );
        allowed_flags.insert("cat", &["-n", "-b"][..]);
        allowed_flags.insert("head", &["-n", "-c"][..]);
        allowed_flags.insert("tail", &["-n", "-c"][..]);
        allowed_flags.insert(
            "grep",
            &["-r", "-R", "-n", "-i", "-l", "-c", "-v", "-w", "-x", "-E", "-F", "-e", "--include",
                "--exclude"][..],
        );
        allowed_flags.insert(
            "rg",
            &["-n", "-i", "-l", "-c", "-w", "-e", "-t", "-g", "-A", "-B", "-C", "--glob",
                "--type"][..],
        );
        allowed_flags.insert(
            "find",
            &["-name", "-iname", "-type", "-maxdepth", "-mindepth", "-size", "-newer"][..],
        );
        allowed_flags.insert("fd", &["-e", "-t", "-H", "-d"][..]);
        allowed_flags.insert("rm", &["-r", "-R", "-f", "-rf", "-fr"][..]);
        allowed_flags.insert("rmdir", &[][..]);
        allowed_flags.insert("mv", &["-f", "-n", "-v"][..]);
        allowed_flags.insert("cp", &["-r", "-R", "-f", "-n", "-v"][..]);
        allowed_flags.insert("chmod", &["-R"][..]);
        allowed_flags.insert("git", &["--version", "--no-pager", "-C"][..]);
        allowed_flags.insert(
            "curl",
            &["-o", "-O", "-L", "-s", "-S", "--output", "--silent", "--location"][..],
        );
        allowed_flags.insert("wget", &["-O", "-q", "--output-document", "--quiet"][..]);
        allowed_flags.insert("jq", &["-r", "-c", "-s", "-n"][..]);
        allowed_flags.insert("echo", &["-n", "-e"][..]);
        allowed_flags.insert("wc", &["-l", "-w", "-c", "-m"][..]);
        allowed_flags.insert("sort", &["-r", "-n", "-u", "-k"][..]);
        allowed_flags.insert("uniq", &["-c", "-d"][..]);
        allowed_flags.insert("du", &["-h", "-s", "-a"][..]);
        allowed_flags.insert("df", &["-h"][..]);
        allowed_flags.insert("ps", &["-e", "-f"][..]);
        allowed_flags.insert("diff", &["-u", "-r", "-q"][..]);
        allowed_flags.insert("stat", &["-c"][..]);
        allowed_flags.insert("tree", &["-L", "-a", "-d"][..]);
        allowed_flags.insert("which", &["-a"][..]);
        allowed_flags.insert("uname", &["-a", "-r"][..]);
        allowed_flags.insert("node", &["--version", "-v"][..]);
        allowed_flags.insert("python", &["--version", "-V", "-m"][..]);
        allowed_flags.insert("python3", &["--version", "-V", "-m"][..]);
        allowed_flags.insert("make", &["-j", "-B", "-n"][..]);
        allowed_flags.insert("kill", &["-9", "-15", "-TERM", "-KILL"][..]);
        allowed_flags.insert("pkill", &["-f"][..]);
        allowed_flags.insert("tar", &["-c", "-x", "-t", "-z", "-f", "-v", "-C"][..]);

        Self {
            never_allow: NEVER_ALLOW.iter().copied().collect(),
            always_allow: ALWAYS_ALLOW.iter().copied().collect(),
            validate_required: VALIDATE_REQUIRED.iter().copied().collect(),
            require_consent: REQUIRE_CONSENT.iter().copied().collect(),
            trusted_tools: TRUSTED_TOOLS.iter().copied().collect(),
            file_commands: FILE_COMMANDS.iter().copied().collect(),
            allowed_flags,
        }
    }

    /// Category of a command word, applying precedence:
    /// NeverAllow > AlwaysAllow > ValidateRequired > RequireConsent >
    /// TrustedTool > Default.
    pub fn category(&self, command: &str) -> CommandCategory {
        if self.never_allow.contains(command) {
            CommandCategory::NeverAllow
        } else if self.always_allow.contains(command) {
            CommandCategory::AlwaysAllow
        } else if self.validate_required.contains(command) {
            CommandCategory::ValidateRequired
        } else if self.require_consent.contains(command) {
            CommandCategory::RequireConsent
        } else if self.trusted_tools.contains(command) {
            CommandCategory::TrustedTool
        } else {
            CommandCategory::Default
        }
    }

    /// Scan a reconstructed command line for dangerous compositions.
    pub fn scan_dangerous(&self, command_line: &str) -> Option<&'static str> {
        DANGEROUS_PATTERNS
            .iter()
            .find(|p| p.regex.is_match(command_line))
            .map(|p| p.name)
    }

    /// Flags permitted for a command. `None` means the command has no flag
    /// entry and any flag must be rejected.
    pub fn allowed_flags(&self, command: &str) -> Option<&[&str]> {
        self.allowed_flags.get(command).copied()
    }

    /// Whether every non-flag argument of this command is a filesystem path.
    pub fn is_file_command(&self, command: &str) -> bool {
        self.file_commands.contains(command)
    }

    /// Whether the command is in the trusted-tool set.
    pub fn is_trusted_tool(&self, command: &str) -> bool {
        self.trusted_tools.contains(command)
    }
}
