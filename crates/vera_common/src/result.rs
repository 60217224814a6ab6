//! Command results and the run hand-off object.
//!
//! `CommandResult` is immutable once created: the orchestration loop
//! appends one per attempted command (executed, failed or skipped) and
//! never edits them afterwards. `RunResult` is the contract handed to any
//! UI or history collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one command attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Served from the result cache instead of the session
    pub from_cache: bool,
    /// Output was clipped to the configured maximum
    pub truncated: bool,
    /// Set when the safety validator refused the command; such a result
    /// never touched the session
    pub skipped_reason: Option<String>,
    pub timing_ms: u64,
}

impl CommandResult {
    /// Result for a command the validator refused to run.
    pub fn skipped(command: &str, reason: &str) -> Self {
        Self {
            command: command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            from_cache: false,
            truncated: false,
            skipped_reason: Some(reason.to_string()),
            timing_ms: 0,
        }
    }

    /// Result for a command that failed before producing output
    /// (timeout, dead session).
    pub fn failed(command: &str, error: &str, timing_ms: u64) -> Self {
        Self {
            command: command.to_string(),
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: -1,
            from_cache: false,
            truncated: false,
            skipped_reason: None,
            timing_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.skipped_reason.is_none()
    }

    /// Stdout and stderr interleaved the way a terminal would show them.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub ai_calls: u32,
    pub cache_hits: u32,
    pub blocked_commands: Vec<String>,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The evaluator (or pattern plan) declared the question answered
    Complete,
    /// Hit the iteration budget; answer synthesized from partial data
    IterationLimit,
    /// Hit the wall-clock budget; answer synthesized from partial data
    TimeBudget,
    /// The loop could not make further progress (evaluation failed or
    /// produced no new commands); answer synthesized from partial data
    Stalled,
    /// Planning produced no usable command list; nothing was executed
    PlanningFailed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::IterationLimit => "iteration_limit",
            RunStatus::TimeBudget => "time_budget",
            RunStatus::Stalled => "stalled",
            RunStatus::PlanningFailed => "planning_failed",
        }
    }
}

/// Final result of one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
    pub success: bool,
    pub question: String,
    pub direct_answer: Option<String>,
    pub executed_commands: Vec<String>,
    pub results: Vec<CommandResult>,
    pub iterations: usize,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub metadata: RunMetadata,
    pub completed_at: DateTime<Utc>,
}
