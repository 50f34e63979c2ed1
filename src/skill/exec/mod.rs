//! Skill executors
//!
//! One executor per skill.  Executors do the actual I/O (processes, the
//! Docker CLI, psql) and return plain strings; operational failures are
//! reported as result text so the model can react to them.

pub mod docker;
pub mod logs;
pub mod postgres;
pub mod service;
pub mod shell;
pub mod system;

use anyhow::Result;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Run a program with arguments, merging stderr into the output.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout_secs: u64,
) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = if stderr.trim().is_empty() {
                stdout.to_string()
            } else if stdout.is_empty() {
                stderr.to_string()
            } else {
                format!("{stdout}\n[STDERR]\n{stderr}")
            };
            Ok(combined)
        }
        Ok(Err(e)) => Ok(format!("Failed to execute {program}: {e}")),
        Err(_) => Ok(format!("Command timed out after {timeout_secs}s")),
    }
}

/// Extract a required string parameter.
pub(crate) fn require_str<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params[name]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{name} is required"))
}

/// Extract an optional string parameter with a default.
pub(crate) fn opt_str<'a>(params: &'a Value, name: &str, default: &'a str) -> &'a str {
    params[name].as_str().unwrap_or(default)
}

/// Extract an optional integer parameter with a default.
pub(crate) fn opt_u64(params: &Value, name: &str, default: u64) -> u64 {
    params[name].as_u64().unwrap_or(default)
}
