//! Shell execution skill
//!
//! Commands pass the safety blocklist before reaching a shell; output is
//! sanitized before it leaves the executor.

use super::{opt_u64, require_str};
use crate::safety::{sanitize_output, validate_command};
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

const MAX_OUTPUT_CHARS: usize = 8000;

pub struct ShellExecutor {
    default_timeout_secs: u64,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout_secs: 30,
        }
    }

    async fn run(&self, command: &str, timeout_secs: u64) -> String {
        let (allowed, reason) = validate_command(command);
        if !allowed {
            return reason;
        }

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    text.push_str(&format!("\n[STDERR]\n{stderr}"));
                }
                if text.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    sanitize_output(&text, MAX_OUTPUT_CHARS)
                }
            }
            Ok(Err(e)) => format!("Error executing command: {e}"),
            Err(_) => format!("Command timed out after {timeout_secs}s"),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for ShellExecutor {
    fn skill_id(&self) -> &'static str {
        "bash-execution"
    }

    async fn execute(&self, action: &str, params: &Value, _write_enabled: bool) -> Result<String> {
        match action {
            "run_command" => {
                let command = require_str(params, "command")?;
                let timeout_secs = opt_u64(params, "timeout", self.default_timeout_secs);
                Ok(self.run(command, timeout_secs).await)
            }
            other => Ok(format!("Unknown skill action: bash-execution__{other}")),
        }
    }
}

/// Run a shell command through the same safety and sanitization path.
/// Used by executors that shell out to CLI tools (psql via docker exec).
pub(crate) async fn safe_shell(command: &str, timeout_secs: u64) -> String {
    ShellExecutor::new().run(command, timeout_secs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn blocked_commands_never_run() {
        let exec = ShellExecutor::new();
        let out = exec
            .execute("run_command", &json!({"command": "rm -rf /"}), false)
            .await
            .unwrap();
        assert!(out.starts_with("Blocked:"));
    }

    #[tokio::test]
    async fn runs_simple_commands() {
        let exec = ShellExecutor::new();
        let out = exec
            .execute("run_command", &json!({"command": "echo hello"}), false)
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn empty_output_is_reported() {
        let exec = ShellExecutor::new();
        let out = exec
            .execute("run_command", &json!({"command": "true"}), false)
            .await
            .unwrap();
        assert_eq!(out, "(no output)");
    }

    #[tokio::test]
    async fn output_is_sanitized() {
        let exec = ShellExecutor::new();
        let out = exec
            .execute(
                "run_command",
                &json!({"command": "echo password=supersecret123"}),
                false,
            )
            .await
            .unwrap();
        assert!(out.contains("<REDACTED>"));
        assert!(!out.contains("supersecret123"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let exec = ShellExecutor::new();
        assert!(exec.execute("run_command", &json!({}), false).await.is_err());
    }
}
