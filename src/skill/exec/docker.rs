//! Docker management skill
//!
//! Talks to the Docker CLI.  Mutating actions are gated by the protected
//! resource list in addition to the confirmation handshake.

use super::{opt_str, opt_u64, require_str, run_command};
use crate::safety::{sanitize_output, validate_resource_action};
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub struct DockerExecutor;

impl DockerExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn list_containers(&self, status: &str) -> String {
        let format = "table {{.Names}}\t{{.Status}}\t{{.Image}}";
        let out = match status {
            "all" => run_command("docker", &["ps", "-a", "--format", format], 10).await,
            "running" => run_command("docker", &["ps", "--format", format], 10).await,
            other => {
                let filter = format!("status={other}");
                run_command(
                    "docker",
                    &["ps", "-a", "--filter", &filter, "--format", format],
                    10,
                )
                .await
            }
        };
        match out {
            Ok(text) if text.trim().is_empty() || text.lines().count() <= 1 => {
                format!("No {status} containers found.")
            }
            Ok(text) => text,
            Err(e) => format!("Error listing containers: {e}"),
        }
    }

    async fn inspect_container(&self, name: &str) -> String {
        let format = concat!(
            "{\"name\": {{json .Name}}, \"status\": {{json .State.Status}}, ",
            "\"image\": {{json .Config.Image}}, \"created\": {{json .Created}}, ",
            "\"restart_count\": {{json .RestartCount}}, ",
            "\"ports\": {{json .NetworkSettings.Ports}}}"
        );
        match run_command("docker", &["inspect", "--format", format, name], 10).await {
            Ok(text) if text.contains("No such object") => {
                format!("Container '{name}' not found.")
            }
            Ok(text) => text,
            Err(e) => format!("Error inspecting container: {e}"),
        }
    }

    async fn container_logs(&self, name: &str, lines: u64) -> String {
        let tail = lines.to_string();
        match run_command(
            "docker",
            &["logs", "--tail", &tail, "--timestamps", name],
            15,
        )
        .await
        {
            Ok(text) if text.contains("No such container") => {
                format!("Container '{name}' not found.")
            }
            Ok(text) => sanitize_output(&text, 8000),
            Err(e) => format!("Error getting logs: {e}"),
        }
    }

    async fn container_stats(&self, name: &str) -> String {
        let format = "CPU: {{.CPUPerc}}\nMemory: {{.MemUsage}} ({{.MemPerc}})\nNetwork: {{.NetIO}}\nBlock I/O: {{.BlockIO}}";
        match run_command(
            "docker",
            &["stats", "--no-stream", "--format", format, name],
            15,
        )
        .await
        {
            Ok(text) if text.contains("No such container") => {
                format!("Container '{name}' not found.")
            }
            Ok(text) => format!("Container: {name}\n{text}"),
            Err(e) => format!("Error getting stats: {e}"),
        }
    }

    async fn manage_container(&self, name: &str, action: &str) -> String {
        let (allowed, reason) = validate_resource_action(name, action);
        if !allowed {
            return format!("Blocked: {reason}");
        }

        let result = match action {
            "start" => run_command("docker", &["start", name], 30).await,
            "stop" => run_command("docker", &["stop", "--time", "30", name], 45).await,
            "restart" => run_command("docker", &["restart", "--time", "30", name], 60).await,
            "kill" => run_command("docker", &["kill", name], 15).await,
            other => return format!("Unknown action: {other}"),
        };
        match result {
            Ok(text) if text.contains("No such container") => {
                format!("Container '{name}' not found.")
            }
            Ok(_) => match action {
                "start" => format!("Container '{name}' started."),
                "stop" => format!("Container '{name}' stopped."),
                "restart" => format!("Container '{name}' restarted."),
                _ => format!("Container '{name}' killed."),
            },
            Err(e) => format!("Docker error: {e}"),
        }
    }
}

impl Default for DockerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for DockerExecutor {
    fn skill_id(&self) -> &'static str {
        "docker-management"
    }

    async fn execute(&self, action: &str, params: &Value, _write_enabled: bool) -> Result<String> {
        match action {
            "list_containers" => Ok(self
                .list_containers(opt_str(params, "status", "running"))
                .await),
            "inspect_container" => Ok(self
                .inspect_container(require_str(params, "container_name")?)
                .await),
            "container_logs" => Ok(self
                .container_logs(
                    require_str(params, "container_name")?,
                    opt_u64(params, "lines", 50),
                )
                .await),
            "container_stats" => Ok(self
                .container_stats(require_str(params, "container_name")?)
                .await),
            "manage_container" => Ok(self
                .manage_container(
                    require_str(params, "container_name")?,
                    require_str(params, "action")?,
                )
                .await),
            other => Ok(format!("Unknown skill action: docker-management__{other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn protected_container_stop_is_blocked_before_docker() {
        let exec = DockerExecutor::new();
        let out = exec
            .execute(
                "manage_container",
                &json!({"container_name": "unicorn-postgresql", "action": "stop"}),
                true,
            )
            .await
            .unwrap();
        assert!(out.starts_with("Blocked:"));
        assert!(out.contains("critical service"));
    }

    #[tokio::test]
    async fn unknown_action_is_reported_not_raised() {
        let exec = DockerExecutor::new();
        let out = exec.execute("explode", &json!({}), false).await.unwrap();
        assert!(out.contains("Unknown skill action"));
    }

    #[tokio::test]
    async fn missing_required_param_is_an_error() {
        let exec = DockerExecutor::new();
        assert!(exec
            .execute("inspect_container", &json!({}), false)
            .await
            .is_err());
    }
}
