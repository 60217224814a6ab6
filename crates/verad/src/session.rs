//! Persistent shell session.
//!
//! Owns one long-lived shell process and serializes command execution over
//! its stdin. Completion is detected by appending a unique marker to both
//! output streams after every command; execution blocks until both markers
//! arrive or the timeout expires. Shell-local state (working directory,
//! exported variables) persists across commands until `restart`, which
//! kills and respawns the process.
//!
//! A timeout or an unexpected process exit invalidates the session:
//! subsequent commands fail fast with a session-unavailable error until
//! `restart` is called. Output is truncated to the configured maximum and
//! redacted before it is returned to any consumer.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use vera_common::EngineError;

use crate::backend::{clip_output, CommandBackend, ExecOutput};
use crate::redact;

/// Lifecycle of the underlying shell process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    /// A command overran its timeout; the shell may still be wedged on it
    TimedOut,
    /// The shell process exited unexpectedly
    Crashed,
    Stopped,
}

enum Wait {
    Done(i32),
    Crashed,
    TimedOut,
}

/// One persistent shell, one writer
pub struct ShellSession {
    shell: String,
    timeout: Duration,
    max_output: usize,
    working_dir: Option<PathBuf>,
    state: SessionState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_rx: Option<mpsc::UnboundedReceiver<String>>,
    stderr_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl ShellSession {
    pub fn new(shell: &str, timeout: Duration, max_output: usize) -> Self {
        Self {
            shell: shell.to_string(),
            timeout,
            max_output,
            working_dir: None,
            state: SessionState::NotStarted,
            child: None,
            stdin: None,
            stdout_rx: None,
            stderr_rx: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Spawn the shell process once. Idempotent while the session is
    /// running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state == SessionState::Running {
            return Ok(());
        }

        let mut cmd = Command::new(&self.shell);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::SessionUnavailable(format!("failed to spawn {}: {}", self.shell, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::SessionUnavailable("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SessionUnavailable("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::SessionUnavailable("no stderr handle".to_string()))?;

        // Reader tasks forward lines until the pipe closes; a closed
        // channel is how execute() observes a dead shell.
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if out_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let (err_tx, err_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if err_tx.send(line).is_err() {
                    break;
                }
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout_rx = Some(out_rx);
        self.stderr_rx = Some(err_rx);
        self.state = SessionState::Running;
        info!("Shell session started ({})", self.shell);
        Ok(())
    }

    /// Kill the shell and spawn a fresh one, discarding shell-local state.
    pub async fn restart(&mut self) -> Result<(), EngineError> {
        warn!("Restarting shell session");
        self.teardown().await;
        self.state = SessionState::NotStarted;
        self.start()
    }

    /// Kill the shell and leave the session unusable.
    pub async fn stop(&mut self) {
        self.teardown().await;
        self.state = SessionState::Stopped;
    }

    async fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.stdin = None;
        self.stdout_rx = None;
        self.stderr_rx = None;
    }

    /// Run one command and block until both streams emit the completion
    /// marker (or the timeout expires).
    pub async fn execute(&mut self, command: &str) -> Result<ExecOutput, EngineError> {
        match self.state {
            SessionState::Running => {}
            SessionState::NotStarted => self.start()?,
            other => {
                return Err(EngineError::SessionUnavailable(format!(
                    "session is {:?}; restart required",
                    other
                )))
            }
        }

        info!("Executing (session): {}", command);
        let marker = format!("__VERA_DONE_{}__", Uuid::new_v4().simple());
        let script = format!(
            "{command}\nprintf '{marker} %s\\n' \"$?\"\nprintf '{marker}\\n' >&2\n"
        );

        let write_result = {
            let stdin = self
                .stdin
                .as_mut()
                .ok_or_else(|| EngineError::SessionUnavailable("no stdin".to_string()))?;
            async {
                stdin.write_all(script.as_bytes()).await?;
                stdin.flush().await
            }
            .await
        };
        if let Err(e) = write_result {
            self.state = SessionState::Crashed;
            return Err(EngineError::SessionUnavailable(format!(
                "stdin write failed: {}",
                e
            )));
        }

        let timeout_secs = self.timeout.as_secs();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let max_buffer = self.max_output.saturating_mul(2);
        let out_rx = self
            .stdout_rx
            .as_mut()
            .ok_or_else(|| EngineError::SessionUnavailable("no stdout channel".to_string()))?;
        let err_rx = self
            .stderr_rx
            .as_mut()
            .ok_or_else(|| EngineError::SessionUnavailable("no stderr channel".to_string()))?;

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut exit_code = -1;

        let outcome = loop {
            if stdout_done && stderr_done {
                break Wait::Done(exit_code);
            }
            tokio::select! {
                line = out_rx.recv(), if !stdout_done => match line {
                    Some(line) => {
                        if let Some(rest) = line.strip_prefix(&marker) {
                            exit_code = rest.trim().parse().unwrap_or(-1);
                            stdout_done = true;
                        } else if stdout_buf.len() < max_buffer {
                            if !stdout_buf.is_empty() {
                                stdout_buf.push('\n');
                            }
                            stdout_buf.push_str(&line);
                        }
                    }
                    None => break Wait::Crashed,
                },
                line = err_rx.recv(), if !stderr_done => match line {
                    Some(line) => {
                        if line.starts_with(&marker) {
                            stderr_done = true;
                        } else if stderr_buf.len() < max_buffer {
                            if !stderr_buf.is_empty() {
                                stderr_buf.push('\n');
                            }
                            stderr_buf.push_str(&line);
                        }
                    }
                    None => break Wait::Crashed,
                },
                _ = tokio::time::sleep_until(deadline) => break Wait::TimedOut,
            }
        };

        match outcome {
            Wait::Done(exit_code) => {
                let (stdout, out_truncated) = clip_output(&stdout_buf, self.max_output);
                let (stderr, err_truncated) = clip_output(&stderr_buf, self.max_output);
                let (stdout, stderr) = redact::redact_streams(&stdout, &stderr);
                Ok(ExecOutput {
                    stdout,
                    stderr,
                    exit_code,
                    truncated: out_truncated || err_truncated,
                })
            }
            Wait::Crashed => {
                warn!("Shell process exited unexpectedly during: {}", command);
                self.state = SessionState::Crashed;
                Err(EngineError::SessionUnavailable(
                    "shell process exited unexpectedly".to_string(),
                ))
            }
            Wait::TimedOut => {
                warn!("Command timed out after {}s: {}", timeout_secs, command);
                self.state = SessionState::TimedOut;
                Err(EngineError::CommandTimeout(timeout_secs))
            }
        }
    }
}

#[async_trait]
impl CommandBackend for ShellSession {
    async fn run(&mut self, command: &str) -> Result<ExecOutput, EngineError> {
        self.execute(command).await
    }

    async fn restart(&mut self) -> Result<(), EngineError> {
        ShellSession::restart(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ShellSession {
        ShellSession::new("sh", Duration::from_secs(5), 8192)
    }

    #[tokio::test]
    async fn test_shell_state_persists_across_commands() {
        let mut session = session();
        session.start().unwrap();
        session.execute("export VERA_TEST_X=1").await.unwrap();
        let output = session.execute("echo $VERA_TEST_X").await.unwrap();
        assert_eq!(output.stdout.trim(), "1");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_exit_code_and_stderr_captured() {
        let mut session = session();
        session.start().unwrap();

        let output = session.execute("echo oops >&2; false").await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stderr.trim(), "oops");

        let output = session.execute("echo fine").await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "fine");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_invalidates_until_restart() {
        let mut session = ShellSession::new("sh", Duration::from_millis(200), 8192);
        session.start().unwrap();

        let err = session.execute("sleep 10").await.unwrap_err();
        assert!(matches!(err, EngineError::CommandTimeout(_)));
        assert_eq!(session.state(), SessionState::TimedOut);

        // Fails fast without touching the wedged shell
        let err = session.execute("echo hi").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionUnavailable(_)));

        session.restart().await.unwrap();
        let output = session.execute("echo hi").await.unwrap();
        assert_eq!(output.stdout.trim(), "hi");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_process_exit_marks_session_crashed() {
        let mut session = session();
        session.start().unwrap();

        let err = session.execute("exit 3").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionUnavailable(_)));
        assert_eq!(session.state(), SessionState::Crashed);

        session.restart().await.unwrap();
        let output = session.execute("echo back").await.unwrap();
        assert_eq!(output.stdout.trim(), "back");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_restart_discards_shell_state() {
        let mut session = session();
        session.start().unwrap();
        session.execute("export VERA_TEST_Y=1").await.unwrap();
        session.restart().await.unwrap();
        let output = session.execute("echo \"${VERA_TEST_Y:-unset}\"").await.unwrap();
        assert_eq!(output.stdout.trim(), "unset");
        session.stop().await;
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let mut session = ShellSession::new("sh", Duration::from_secs(5), 128);
        session.start().unwrap();
        let output = session.execute("seq 1 500").await.unwrap();
        assert!(output.truncated);
        assert!(output.stdout.ends_with("... (truncated)"));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_output_is_redacted() {
        let mut session = session();
        session.start().unwrap();
        let output = session
            .execute("echo password=topsecret999")
            .await
            .unwrap();
        assert!(output.stdout.contains("[REDACTED: password]"));
        assert!(!output.stdout.contains("topsecret999"));
        session.stop().await;
    }
}
