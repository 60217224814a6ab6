//! Command execution backends.
//!
//! The engine treats "run one command, get stdout/stderr/exit code" as an
//! abstract capability. `ShellSession` (session.rs) is the default,
//! stateful implementation; `OneShotBackend` spawns a fresh shell per
//! command and is interchangeable where shell-state persistence is not
//! needed. `FakeBackend` provides pre-configured outputs for deterministic
//! tests without touching a real shell.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use vera_common::EngineError;

use crate::redact;

/// Raw outcome of one command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub truncated: bool,
}

impl ExecOutput {
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

/// Clip output to `max_bytes` on a character boundary, appending the
/// truncation indicator when anything was dropped.
pub fn clip_output(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}\n... (truncated)", &text[..end]), true)
}

/// Abstract command runner
#[async_trait]
pub trait CommandBackend: Send {
    /// Run one command and return its sanitized output.
    async fn run(&mut self, command: &str) -> Result<ExecOutput, EngineError>;

    /// Discard accumulated backend state. A no-op for stateless backends.
    async fn restart(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Spawn-per-command backend: `shell -c <command>` with timeout,
/// truncation and redaction. No state survives between commands.
pub struct OneShotBackend {
    shell: String,
    timeout: Duration,
    max_output: usize,
    working_dir: Option<PathBuf>,
}

impl OneShotBackend {
    pub fn new(shell: &str, timeout: Duration, max_output: usize) -> Self {
        Self {
            shell: shell.to_string(),
            timeout,
            max_output,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait]
impl CommandBackend for OneShotBackend {
    async fn run(&mut self, command: &str) -> Result<ExecOutput, EngineError> {
        info!("Executing (one-shot): {}", command);

        let mut cmd = Command::new(&self.shell);
        cmd.args(["-c", command]);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("Command timed out: {}", command);
                EngineError::CommandTimeout(self.timeout.as_secs())
            })?
            .map_err(|e| EngineError::SessionUnavailable(format!("spawn failed: {}", e)))?;

        let (stdout, out_truncated) =
            clip_output(&String::from_utf8_lossy(&output.stdout), self.max_output);
        let (stderr, err_truncated) =
            clip_output(&String::from_utf8_lossy(&output.stderr), self.max_output);
        let (stdout, stderr) = redact::redact_streams(&stdout, &stderr);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
            truncated: out_truncated || err_truncated,
        })
    }
}

/// Pre-configured response for `FakeBackend`
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl FakeResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn error(stderr: &str, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }
}

/// Deterministic backend for tests: pre-configured responses, a shared
/// call log for assertions, and an optional artificial latency for
/// budget tests.
pub struct FakeBackend {
    responses: HashMap<String, FakeResponse>,
    default_response: FakeResponse,
    calls: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: FakeResponse::error("command not configured", 127),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: None,
        }
    }

    pub fn with_response(mut self, command: &str, response: FakeResponse) -> Self {
        self.responses.insert(command.to_string(), response);
        self
    }

    pub fn with_output(self, command: &str, stdout: &str) -> Self {
        self.with_response(command, FakeResponse::ok(stdout))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Shared handle to the call log; clone before moving the backend
    /// into an orchestrator.
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandBackend for FakeBackend {
    async fn run(&mut self, command: &str) -> Result<ExecOutput, EngineError> {
        self.calls.lock().unwrap().push(command.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let response = self
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone());
        Ok(ExecOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
            truncated: false,
        })
    }
}
