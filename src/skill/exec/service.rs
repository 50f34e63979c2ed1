//! Service health skill
//!
//! Health summaries come from the Docker engine's health-check state.

use super::{require_str, run_command};
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub struct ServiceHealthExecutor;

impl ServiceHealthExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn check_all(&self) -> String {
        let format = "{{.Names}}\t{{.Status}}";
        match run_command("docker", &["ps", "--format", format], 10).await {
            Ok(output) if output.trim().is_empty() => "No running containers.".to_string(),
            Ok(output) => {
                let mut lines = vec![
                    format!("{:<35} {:<12} HEALTH", "SERVICE", "STATUS"),
                    "-".repeat(65),
                ];
                let mut rows: Vec<&str> = output.trim().lines().collect();
                rows.sort();
                for row in rows {
                    let mut cols = row.splitn(2, '\t');
                    let name = cols.next().unwrap_or("?");
                    let status = cols.next().unwrap_or("?");
                    // Docker folds health into the status column, e.g.
                    // "Up 3 days (healthy)".
                    let health = if status.contains("(healthy)") {
                        "healthy"
                    } else if status.contains("(unhealthy)") {
                        "unhealthy"
                    } else if status.contains("(health") {
                        "starting"
                    } else {
                        "n/a"
                    };
                    lines.push(format!("{name:<35} {status:<12} {health}"));
                }
                lines.join("\n")
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    async fn check_one(&self, service_name: &str) -> String {
        let format = concat!(
            "Service: {{.Name}}\n",
            "Status: {{.State.Status}}\n",
            "Health: {{if .State.Health}}{{.State.Health.Status}}{{else}}n/a{{end}}\n",
            "Started: {{.State.StartedAt}}"
        );
        match run_command(
            "docker",
            &["inspect", "--format", format, service_name],
            10,
        )
        .await
        {
            Ok(output) if output.contains("No such object") => {
                format!("Service '{service_name}' not found.")
            }
            Ok(output) => output,
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl Default for ServiceHealthExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for ServiceHealthExecutor {
    fn skill_id(&self) -> &'static str {
        "service-health"
    }

    async fn execute(&self, action: &str, params: &Value, _write_enabled: bool) -> Result<String> {
        match action {
            "check_all" => Ok(self.check_all().await),
            "check_one" => Ok(self.check_one(require_str(params, "service_name")?).await),
            other => Ok(format!("Unknown skill action: service-health__{other}")),
        }
    }
}
