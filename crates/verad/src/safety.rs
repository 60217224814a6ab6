//! Command safety validator.
//!
//! A deny-list checked before every execution. Matching is pattern-based,
//! not semantic: this is a first line of defense against the oracle
//! planning something catastrophic, NOT a sandbox. A hostile or
//! sufficiently creative command line can evade literal patterns; any
//! production deployment should pair this with process-level isolation.
//!
//! Blocked commands are recorded by the executor and never reach a shell.

use regex::Regex;
use std::sync::LazyLock;

/// Deny rules: pattern plus the reason reported for the block
static DENY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Recursive deletion of the filesystem root
        (
            Regex::new(r"(?i)\brm\s+(-[a-z]+\s+)*-[a-z]*r[a-z]*\s+(-[a-z]+\s+)*/(\s|$)").unwrap(),
            "recursive deletion of filesystem root",
        ),
        (
            Regex::new(r"(?i)\brm\s+--recursive(\s+--force)?\s+/(\s|$)").unwrap(),
            "recursive deletion of filesystem root",
        ),
        // Classic fork bomb and close variants
        (
            Regex::new(r":\s*\(\s*\)\s*\{.*\|.*&.*\}\s*;\s*:").unwrap(),
            "fork bomb",
        ),
        // Filesystem creation wipes the target device
        (
            Regex::new(r"(?i)\bmk(fs(\.[a-z0-9]+)?|swap)\b").unwrap(),
            "disk format command",
        ),
        (Regex::new(r"(?i)\bwipefs\b").unwrap(), "disk format command"),
        // Raw writes to block devices
        (
            Regex::new(r"(?i)\bdd\b[^|;]*\bof=/dev/(sd|hd|vd|nvme|mmcblk|loop)").unwrap(),
            "raw write to block device",
        ),
        (
            Regex::new(r">\s*/dev/(sd|hd|vd|nvme|mmcblk)").unwrap(),
            "raw write to block device",
        ),
    ]
});

/// Validator verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Verdict {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn blocked(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Pattern-based deny-list guard
#[derive(Debug, Default)]
pub struct CommandGuard;

impl CommandGuard {
    pub fn new() -> Self {
        Self
    }

    /// Check one command line against the deny-list.
    pub fn validate(&self, command: &str) -> Verdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Verdict::blocked("empty command");
        }
        for (pattern, reason) in DENY_RULES.iter() {
            if pattern.is_match(trimmed) {
                return Verdict::blocked(reason);
            }
        }
        Verdict::allowed()
    }
}
