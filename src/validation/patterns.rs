//! Compiled Injection Pattern Set
//!
//! Shell-injection detection patterns, compiled once and shared by the
//! validator and the policy engine. Each pattern is named so rejections can
//! say *which* construct was found, and so the set can be tested as data.

use regex::Regex;
use std::sync::LazyLock;

/// A named injection pattern.
pub struct InjectionPattern {
    /// Stable name used in rejection reasons (e.g. "command_substitution").
    pub name: &'static str,
    /// Compiled regex.
    pub regex: Regex,
}

impl InjectionPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid injection pattern"),
        }
    }
}

/// Patterns that indicate shell injection in a command or argument.
///
/// Ordered from most to least specific so the first match produces the most
/// useful rejection reason.
pub static INJECTION_PATTERNS: LazyLock<Vec<InjectionPattern>> = LazyLock::new(|| {
    vec![
        InjectionPattern::new("command_substitution", r"\$\([^)]*\)"),
        // A lone backtick or dollar is already enough to reject: partial
        // constructs must not survive to a downstream shell.
        InjectionPattern::new("backtick_substitution", r"`"),
        InjectionPattern::new("variable_expansion", r"\$"),
        InjectionPattern::new("command_chaining", r"[;&|]"),
        InjectionPattern::new("redirection", r"[<>]"),
        InjectionPattern::new("null_byte", r"\x00"),
        InjectionPattern::new("ansi_escape", r"\x1b\[[0-9;]*[A-Za-z]"),
        InjectionPattern::new("newline_separator", r"[\r\n]"),
        InjectionPattern::new("subshell", r"[()]"),
        InjectionPattern::new("glob_home_expansion", r"(^|\s)~(/|\s|$)"),
    ]
});

/// Scan an input for injection constructs.
///
/// Returns the name of the first matching pattern, or `None` if the input
/// is clean.
pub fn find_injection(input: &str) -> Option<&'static str> {
    INJECTION_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(input))
        .map(|p| p.name)
}

/// File extensions never accepted as command inputs: key material and
/// credential stores.
pub const BLOCKED_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx", "der", "keystore"];

/// Whether an argument looks like a filesystem path.
///
/// Used to decide when to apply traversal checks to arguments: flags and
/// bare words are not paths, anything with a separator or a leading dot is.
pub fn looks_like_path(arg: &str) -> bool {
    if arg.starts_with('-') {
        return false;
    }
    arg.contains('/') || arg.starts_with('.') || arg.starts_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_command_substitution() {
        assert_eq!(find_injection("$(whoami)"), Some("command_substitution"));
        assert_eq!(find_injection("`id`"), Some("backtick_substitution"));
    }

    #[test]
    fn test_detects_chaining_and_redirection() {
        assert_eq!(find_injection("a; rm -rf"), Some("command_chaining"));
        assert_eq!(find_injection("a | b"), Some("command_chaining"));
        assert_eq!(find_injection("a && b"), Some("command_chaining"));
        assert_eq!(find_injection("a > /etc/passwd"), Some("redirection"));
        assert_eq!(find_injection("a < input"), Some("redirection"));
    }

    #[test]
    fn test_detects_control_bytes() {
        assert_eq!(find_injection("arg\0"), Some("null_byte"));
        assert_eq!(find_injection("x\x1b[31mred"), Some("ansi_escape"));
        assert_eq!(find_injection("line1\nline2"), Some("newline_separator"));
    }

    #[test]
    fn test_detects_variable_expansion() {
        assert_eq!(find_injection("$HOME"), Some("variable_expansion"));
        assert_eq!(find_injection("${PATH}"), Some("variable_expansion"));
    }

    #[test]
    fn test_clean_inputs_pass() {
        for input in [
            "ls",
            "-la",
            "src/main.rs",
            "file_name-with.dots",
            "CamelCase",
            "--max-depth=3",
        ] {
            assert_eq!(find_injection(input), None, "false positive on {input:?}");
        }
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("src/lib.rs"));
        assert!(looks_like_path("./local"));
        assert!(looks_like_path("../parent"));
        assert!(looks_like_path("~/secrets"));
        assert!(!looks_like_path("-r"));
        assert!(!looks_like_path("--flag"));
        assert!(!looks_like_path("pattern"));
    }
}
