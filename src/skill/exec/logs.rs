//! Log viewer skill

use super::{opt_u64, require_str, run_command};
use crate::safety::sanitize_output;
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

const SEARCH_WINDOW_LINES: u64 = 500;

pub struct LogViewerExecutor;

impl LogViewerExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn get_logs(&self, container: &str, lines: u64) -> String {
        let tail = lines.to_string();
        match run_command(
            "docker",
            &["logs", "--tail", &tail, "--timestamps", container],
            15,
        )
        .await
        {
            Ok(text) if text.contains("No such container") => {
                format!("Container '{container}' not found.")
            }
            Ok(text) if text.trim().is_empty() => {
                format!("No log output from {container}.")
            }
            Ok(text) => sanitize_output(&text, 8000),
            Err(e) => format!("Error getting logs: {e}"),
        }
    }

    async fn search_logs(&self, container: &str, pattern: &str, max_matches: u64) -> String {
        let tail = SEARCH_WINDOW_LINES.to_string();
        let text = match run_command(
            "docker",
            &["logs", "--tail", &tail, "--timestamps", container],
            15,
        )
        .await
        {
            Ok(text) if text.contains("No such container") => {
                return format!("Container '{container}' not found.")
            }
            Ok(text) => text,
            Err(e) => return format!("Error searching logs: {e}"),
        };

        let needle = pattern.to_lowercase();
        let matches: Vec<&str> = text
            .lines()
            .filter(|line| line.to_lowercase().contains(&needle))
            .collect();
        if matches.is_empty() {
            return format!(
                "No matches for '{pattern}' in last {SEARCH_WINDOW_LINES} lines of {container}."
            );
        }

        // Keep the most recent matches.
        let keep = max_matches as usize;
        let start = matches.len().saturating_sub(keep);
        let shown = &matches[start..];
        let header = format!(
            "{} match(es) for '{pattern}' in last {SEARCH_WINDOW_LINES} lines of {container} (showing {}):",
            matches.len(),
            shown.len()
        );
        sanitize_output(&format!("{header}\n{}", shown.join("\n")), 8000)
    }
}

impl Default for LogViewerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for LogViewerExecutor {
    fn skill_id(&self) -> &'static str {
        "log-viewer"
    }

    async fn execute(&self, action: &str, params: &Value, _write_enabled: bool) -> Result<String> {
        match action {
            "get_logs" => Ok(self
                .get_logs(
                    require_str(params, "container_name")?,
                    opt_u64(params, "lines", 100),
                )
                .await),
            "search_logs" => Ok(self
                .search_logs(
                    require_str(params, "container_name")?,
                    require_str(params, "pattern")?,
                    opt_u64(params, "lines", 50),
                )
                .await),
            other => Ok(format!("Unknown skill action: log-viewer__{other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_pattern_is_an_error() {
        let exec = LogViewerExecutor::new();
        assert!(exec
            .execute("search_logs", &json!({"container_name": "web"}), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_action_is_reported() {
        let exec = LogViewerExecutor::new();
        let out = exec.execute("tail_forever", &json!({}), false).await.unwrap();
        assert!(out.contains("Unknown skill action"));
    }
}
