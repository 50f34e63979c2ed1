//! Skill catalog
//!
//! A skill is a named group of actions exposed to the model as
//! function-calling tools named `<skill>__<action>`.  The catalog is built
//! from an explicit registration table at startup and is immutable for the
//! life of the process.

pub mod exec;

use crate::provider::ToolDefinition;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between skill and action in a tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// One parameter of an action.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: &'static str,
    pub description: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    fn new(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: false,
            enum_values: None,
            default: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn with_enum(mut self, values: Vec<&'static str>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// One callable operation within a skill.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub confirmation_required: bool,
    pub parameters: Vec<ParamSpec>,
}

impl ActionSpec {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            confirmation_required: false,
            parameters: Vec::new(),
        }
    }

    fn confirm(mut self) -> Self {
        self.confirmation_required = true;
        self
    }

    fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }
}

/// A named group of related actions.
#[derive(Debug, Clone, Serialize)]
pub struct Skill {
    pub id: &'static str,
    pub description: &'static str,
    pub actions: Vec<ActionSpec>,
}

/// The compiled skill catalog.  Read-only after construction; shared across
/// all connections without locking.
#[derive(Debug, Clone)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    /// The explicit registration table.  Adding a skill means adding it here
    /// and registering its executor in [`exec::ExecutorRegistry`].
    pub fn builtin() -> Self {
        let skills = vec![
            Skill {
                id: "docker-management",
                description: "Inspect and control Docker containers",
                actions: vec![
                    ActionSpec::new("list_containers", "List Docker containers").param(
                        ParamSpec::new("status", "string", "Container state to filter by")
                            .with_enum(vec!["running", "exited", "all"])
                            .with_default(json!("running")),
                    ),
                    ActionSpec::new(
                        "inspect_container",
                        "Get detailed info about a container",
                    )
                    .param(
                        ParamSpec::new("container_name", "string", "Name of the container")
                            .required(),
                    ),
                    ActionSpec::new("container_logs", "Get recent container logs")
                        .param(
                            ParamSpec::new("container_name", "string", "Name of the container")
                                .required(),
                        )
                        .param(
                            ParamSpec::new("lines", "integer", "Number of log lines")
                                .with_default(json!(50)),
                        ),
                    ActionSpec::new("container_stats", "Get container resource usage").param(
                        ParamSpec::new("container_name", "string", "Name of the container")
                            .required(),
                    ),
                    ActionSpec::new(
                        "manage_container",
                        "Start, stop, restart, or kill a container",
                    )
                    .confirm()
                    .param(
                        ParamSpec::new("container_name", "string", "Name of the container")
                            .required(),
                    )
                    .param(
                        ParamSpec::new("action", "string", "Operation to perform")
                            .required()
                            .with_enum(vec!["start", "stop", "restart", "kill"]),
                    ),
                ],
            },
            Skill {
                id: "bash-execution",
                description: "Run shell commands on the host",
                actions: vec![ActionSpec::new("run_command", "Execute a bash command")
                    .param(
                        ParamSpec::new("command", "string", "The shell command to execute")
                            .required(),
                    )
                    .param(
                        ParamSpec::new("timeout", "integer", "Timeout in seconds")
                            .with_default(json!(30)),
                    )],
            },
            Skill {
                id: "system-status",
                description: "Host CPU, memory, disk, GPU, and process metrics",
                actions: vec![
                    ActionSpec::new("cpu", "CPU usage details"),
                    ActionSpec::new("memory", "Memory and swap usage"),
                    ActionSpec::new("disk", "Disk usage for mounted partitions"),
                    ActionSpec::new("gpu", "GPU status via nvidia-smi"),
                    ActionSpec::new("processes", "Top processes by CPU usage").param(
                        ParamSpec::new("count", "integer", "Number of processes")
                            .with_default(json!(10)),
                    ),
                    ActionSpec::new("full_status", "Comprehensive system status"),
                ],
            },
            Skill {
                id: "service-health",
                description: "Container health check summaries",
                actions: vec![
                    ActionSpec::new("check_all", "Check health of all running containers"),
                    ActionSpec::new("check_one", "Check health of one service").param(
                        ParamSpec::new("service_name", "string", "Name of the service").required(),
                    ),
                ],
            },
            Skill {
                id: "log-viewer",
                description: "Fetch and search container logs",
                actions: vec![
                    ActionSpec::new("get_logs", "Get recent logs from a container")
                        .param(
                            ParamSpec::new("container_name", "string", "Name of the container")
                                .required(),
                        )
                        .param(
                            ParamSpec::new("lines", "integer", "Number of log lines")
                                .with_default(json!(50)),
                        ),
                    ActionSpec::new("search_logs", "Search container logs for a pattern")
                        .param(
                            ParamSpec::new("container_name", "string", "Name of the container")
                                .required(),
                        )
                        .param(
                            ParamSpec::new("pattern", "string", "Substring to search for")
                                .required(),
                        )
                        .param(
                            ParamSpec::new("lines", "integer", "Max matching lines")
                                .with_default(json!(50)),
                        ),
                ],
            },
            Skill {
                id: "postgresql-ops",
                description: "PostgreSQL inspection and queries",
                actions: vec![
                    ActionSpec::new("list_databases", "List PostgreSQL databases"),
                    ActionSpec::new("list_tables", "List tables in a database").param(
                        ParamSpec::new("database", "string", "Database name")
                            .with_default(json!("unicorn_db")),
                    ),
                    ActionSpec::new("query", "Run a SQL query")
                        .param(ParamSpec::new("query", "string", "The SQL query").required())
                        .param(
                            ParamSpec::new("database", "string", "Database name")
                                .with_default(json!("unicorn_db")),
                        ),
                    ActionSpec::new("stats", "Database size and activity statistics"),
                ],
            },
        ];
        Self { skills }
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn get(&self, skill_id: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.id == skill_id)
    }

    /// Project enabled skills into the function-calling schema shape.
    /// Deterministic given the catalog and the enabled set.
    pub fn tool_definitions(&self, enabled: &[String]) -> Vec<ToolDefinition> {
        let mut tools = Vec::new();
        for skill_id in enabled {
            let Some(skill) = self.get(skill_id) else {
                continue;
            };
            for action in &skill.actions {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for param in &action.parameters {
                    let mut prop = serde_json::Map::new();
                    prop.insert("type".to_string(), json!(param.param_type));
                    prop.insert("description".to_string(), json!(param.description));
                    if let Some(ref values) = param.enum_values {
                        prop.insert("enum".to_string(), json!(values));
                    }
                    if let Some(ref default) = param.default {
                        prop.insert("default".to_string(), default.clone());
                    }
                    properties.insert(param.name.to_string(), Value::Object(prop));
                    if param.required {
                        required.push(param.name);
                    }
                }
                let mut parameters = json!({
                    "type": "object",
                    "properties": properties,
                });
                if !required.is_empty() {
                    parameters["required"] = json!(required);
                }
                tools.push(ToolDefinition {
                    name: format!("{}{}{}", skill.id, TOOL_NAME_SEPARATOR, action.name),
                    description: action.description.to_string(),
                    parameters,
                });
            }
        }
        tools
    }

    /// Human-readable skill summary for the system prompt.
    pub fn descriptions(&self, enabled: &[String]) -> String {
        let mut lines = Vec::new();
        for skill_id in enabled {
            let Some(skill) = self.get(skill_id) else {
                continue;
            };
            lines.push(format!("- **{}**: {}", skill.id, skill.description));
            for action in &skill.actions {
                let confirm = if action.confirmation_required {
                    " (requires confirmation)"
                } else {
                    ""
                };
                lines.push(format!(
                    "  - `{}`: {}{}",
                    action.name, action.description, confirm
                ));
            }
        }
        if lines.is_empty() {
            "No skills loaded.".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Whether the catalog declares confirmation for a full tool name.
    pub fn confirmation_required(&self, tool_name: &str) -> bool {
        let Some((skill_id, action_name)) = tool_name.split_once(TOOL_NAME_SEPARATOR) else {
            return false;
        };
        self.get(skill_id)
            .and_then(|skill| skill.actions.iter().find(|a| a.name == action_name))
            .map(|action| action.confirmation_required)
            .unwrap_or(false)
    }
}

/// An executor for one skill: dispatches actions, performs the I/O, and
/// returns a result string.  Raising is allowed; the router converts errors
/// into failed-result text.
#[async_trait]
pub trait SkillExecutor: Send + Sync {
    /// Skill id this executor serves.
    fn skill_id(&self) -> &'static str;

    /// Run one action.  `write_enabled` is only true for write-capable models.
    async fn execute(&self, action: &str, params: &Value, write_enabled: bool) -> Result<String>;
}

/// Explicit name-to-executor table built at startup.
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn SkillExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn SkillExecutor>) {
        self.executors.insert(executor.skill_id(), executor);
    }

    pub fn get(&self, skill_id: &str) -> Option<Arc<dyn SkillExecutor>> {
        self.executors.get(skill_id).cloned()
    }

    /// Registry with every built-in executor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(exec::shell::ShellExecutor::new()));
        registry.register(Arc::new(exec::docker::DockerExecutor::new()));
        registry.register(Arc::new(exec::system::SystemExecutor::new()));
        registry.register(Arc::new(exec::service::ServiceHealthExecutor::new()));
        registry.register(Arc::new(exec::logs::LogViewerExecutor::new()));
        registry.register(Arc::new(exec::postgres::PostgresExecutor::new()));
        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
