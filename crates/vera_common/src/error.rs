//! Typed engine failures.
//!
//! The orchestration loop distinguishes failures that abort a run
//! (planning) from failures that degrade it (a single command timing out,
//! an evaluation that did not parse). Callers match on the variant; the
//! display text is what lands in logs and result objects.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The oracle produced no usable plan. The run aborts without
    /// executing anything.
    #[error("planning failed: {0}")]
    PlanningFailed(String),

    /// A progress evaluation could not be parsed or validated. The run
    /// falls back to deterministic synthesis instead of aborting.
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    /// One command exceeded the configured timeout. Recorded against that
    /// command only; the loop continues.
    #[error("command timed out after {0}s")]
    CommandTimeout(u64),

    /// The shell session is not in a runnable state. Subsequent commands
    /// fail fast until the session is explicitly restarted.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The reasoning oracle could not be reached or returned a transport
    /// error. Only the step that asked fails, not the whole run.
    #[error("reasoning oracle unavailable: {0}")]
    OracleUnavailable(String),
}
