//! Tool-protocol surface.
//!
//! When the engine is hosted under an external tool-use contract it
//! exposes exactly one tool: run a shell command in the persistent
//! session. `restart: true` respawns the session first, discarding
//! shell-local state. Output is the sanitized combined stream — the same
//! truncation and redaction every other consumer gets.

use serde_json::{json, Value};

use crate::safety::CommandGuard;
use crate::session::ShellSession;

pub struct ShellCommandTool {
    session: ShellSession,
    guard: CommandGuard,
}

impl ShellCommandTool {
    pub fn new(session: ShellSession) -> Self {
        Self {
            session,
            guard: CommandGuard::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        "run_shell_command"
    }

    pub fn description(&self) -> &'static str {
        "Run a shell command in a persistent session. Shell state (cwd, \
         exported variables) persists across calls. Set restart=true to \
         respawn the session and discard that state."
    }

    pub fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "restart": {
                    "type": "boolean",
                    "description": "Respawn the session before running, discarding shell-local state"
                }
            },
            "required": ["command"]
        })
    }

    /// Execute one tool call. Errors are returned as text for the host to
    /// relay; they never crash the session owner.
    pub async fn invoke(&mut self, args: Value) -> Result<String, String> {
        let restart = args
            .get("restart")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if restart {
            self.session.restart().await.map_err(|e| e.to_string())?;
        }

        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if command.is_empty() {
            if restart {
                return Ok("Session restarted.".to_string());
            }
            return Err("Missing required parameter: command".to_string());
        }

        let verdict = self.guard.validate(&command);
        if !verdict.allowed {
            return Err(format!(
                "Command blocked: {}",
                verdict.reason.unwrap_or_else(|| "denied".to_string())
            ));
        }

        let output = self
            .session
            .execute(&command)
            .await
            .map_err(|e| e.to_string())?;

        if output.exit_code == 0 {
            Ok(output.combined())
        } else {
            Ok(format!("{}\n(exit {})", output.combined(), output.exit_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tool() -> ShellCommandTool {
        ShellCommandTool::new(ShellSession::new("sh", Duration::from_secs(5), 8192))
    }

    #[test]
    fn test_schema_shape() {
        let tool = tool();
        let schema = tool.parameters_schema();
        assert_eq!(tool.name(), "run_shell_command");
        assert!(schema["properties"]["command"].is_object());
        assert!(schema["properties"]["restart"].is_object());
        assert_eq!(schema["required"][0], "command");
    }

    #[tokio::test]
    async fn test_invoke_runs_command() {
        let mut tool = tool();
        let output = tool
            .invoke(json!({"command": "echo tool-check"}))
            .await
            .unwrap();
        assert_eq!(output.trim(), "tool-check");
    }

    #[tokio::test]
    async fn test_invoke_reports_exit_code() {
        let mut tool = tool();
        let output = tool.invoke(json!({"command": "false"})).await.unwrap();
        assert!(output.contains("(exit 1)"));
    }

    #[tokio::test]
    async fn test_restart_discards_state() {
        let mut tool = tool();
        tool.invoke(json!({"command": "export VERA_TOOL_Z=9"}))
            .await
            .unwrap();
        let kept = tool
            .invoke(json!({"command": "echo \"${VERA_TOOL_Z:-unset}\""}))
            .await
            .unwrap();
        assert_eq!(kept.trim(), "9");

        let cleared = tool
            .invoke(json!({"command": "echo \"${VERA_TOOL_Z:-unset}\"", "restart": true}))
            .await
            .unwrap();
        assert_eq!(cleared.trim(), "unset");
    }

    #[tokio::test]
    async fn test_blocked_command_is_refused() {
        let mut tool = tool();
        let err = tool.invoke(json!({"command": "rm -rf /"})).await.unwrap_err();
        assert!(err.contains("blocked"));
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let mut tool = tool();
        assert!(tool.invoke(json!({})).await.is_err());
    }
}
