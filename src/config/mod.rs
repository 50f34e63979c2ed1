//! Configuration system
//!
//! Layered loading: global config (~/.config/opsgate/config.toml), project
//! config (./opsgate.toml), then OPSGATE_* environment overrides.

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream completion endpoint.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent identity and behavior.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Turn and confirmation limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Session persistence settings.
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI-compatible base URL (e.g. a LiteLLM proxy).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (can also be set via OPSGATE_API_KEY).
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("api_key_len", &self.api_key.as_ref().map(|k| k.len()))
            .finish()
    }
}

fn default_base_url() -> String {
    "http://localhost:4000/v1".to_string()
}

/// Personality knobs rendered into the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    /// 1=casual, 10=very formal
    #[serde(default = "default_formality")]
    pub formality: u8,
    /// 1=terse, 10=verbose
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    /// 1=serious, 10=playful
    #[serde(default = "default_humor")]
    pub humor: u8,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            formality: default_formality(),
            verbosity: default_verbosity(),
            humor: default_humor(),
        }
    }
}

fn default_formality() -> u8 {
    7
}
fn default_verbosity() -> u8 {
    5
}
fn default_humor() -> u8 {
    4
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mission {
    #[default]
    Devops,
    Monitoring,
    Security,
    General,
}

impl Mission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mission::Devops => "devops",
            Mission::Monitoring => "monitoring",
            Mission::Security => "security",
            Mission::General => "general",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Display name of the managed server.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default)]
    pub mission: Mission,

    #[serde(default)]
    pub personality: Personality,

    /// Model id sent to the completion service.
    #[serde(default = "default_model")]
    pub model: String,

    /// Skills exposed to the model.
    #[serde(default = "default_enabled_skills")]
    pub enabled_skills: Vec<String>,

    /// Glob patterns for model ids allowed to perform mutating actions.
    #[serde(default = "default_write_capable_models")]
    pub write_capable_models: Vec<String>,

    /// Restrict connections to admin users.
    #[serde(default = "default_true")]
    pub admin_only: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            server_name: default_server_name(),
            mission: Mission::default(),
            personality: Personality::default(),
            model: default_model(),
            enabled_skills: default_enabled_skills(),
            write_capable_models: default_write_capable_models(),
            admin_only: true,
        }
    }
}

fn default_agent_name() -> String {
    "Col. Corelli".to_string()
}

fn default_server_name() -> String {
    std::env::var("OPSGATE_SERVER_NAME").unwrap_or_else(|_| "My Server".to_string())
}

fn default_model() -> String {
    "claude-opus-4-6".to_string()
}

fn default_enabled_skills() -> Vec<String> {
    [
        "docker-management",
        "bash-execution",
        "system-status",
        "service-health",
        "log-viewer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_write_capable_models() -> Vec<String> {
    [
        "anthropic/claude-opus-4*",
        "anthropic/claude-sonnet-4-5*",
        "claude-opus-4*",
        "claude-sonnet-4-5*",
        "openai/gpt-5*",
        "openai/gpt-4o*",
        "openai/o1*",
        "openai/o3*",
        "google/gemini-2*-pro*",
        "google/gemini-2.5-flash*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Seconds to wait for a confirmation answer before denying.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Model-call/tool-execution rounds per user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Transcript messages replayed to the model per round.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: default_confirmation_timeout(),
            max_tool_rounds: default_max_tool_rounds(),
            context_window: default_context_window(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_confirmation_timeout() -> u64 {
    60
}
fn default_max_tool_rounds() -> usize {
    5
}
fn default_context_window() -> usize {
    20
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session expiry; refreshed on every read and write.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Directory for session JSON files.  Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            data_dir: None,
        }
    }
}

fn default_session_ttl() -> u64 {
    86_400
}

impl Config {
    /// Load configuration from all sources (global, project, env).
    pub async fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let content = fs::read_to_string(&global_path).await?;
                config = toml::from_str(&content)?;
            }
        }

        let project = PathBuf::from("opsgate.toml");
        if project.exists() {
            let content = fs::read_to_string(&project).await?;
            config = toml::from_str(&content)?;
        }

        config.apply_env();
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "opsgate", "opsgate")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "opsgate", "opsgate").map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Write the default configuration file.
    pub async fn init_default() -> Result<()> {
        if let Some(path) = Self::global_config_path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let content = toml::to_string_pretty(&Self::default())?;
            fs::write(&path, content).await?;
            tracing::info!("Created config at {:?}", path);
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OPSGATE_LLM_BASE_URL") {
            self.provider.base_url = val;
        }
        if let Ok(val) = std::env::var("OPSGATE_API_KEY") {
            self.provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OPSGATE_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("OPSGATE_SERVER_NAME") {
            self.agent.server_name = val;
        }
        if let Ok(val) = std::env::var("OPSGATE_CONFIRMATION_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.limits.confirmation_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("OPSGATE_SESSION_DIR") {
            self.session.data_dir = Some(PathBuf::from(val));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.agent.name, "Col. Corelli");
        assert_eq!(config.limits.max_tool_rounds, 5);
        assert_eq!(config.limits.confirmation_timeout_secs, 60);
        assert_eq!(config.session.ttl_secs, 86_400);
        assert!(config
            .agent
            .enabled_skills
            .contains(&"docker-management".to_string()));
    }

    #[test]
    fn provider_debug_redacts_api_key() {
        let provider = ProviderConfig {
            base_url: "http://localhost:4000/v1".to_string(),
            api_key: Some("sk-secret".to_string()),
        };
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<REDACTED>"));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            name = "Ops Bot"
            mission = "monitoring"

            [limits]
            max_tool_rounds = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.name, "Ops Bot");
        assert_eq!(config.agent.mission, Mission::Monitoring);
        assert_eq!(config.limits.max_tool_rounds, 3);
        // Untouched sections keep defaults.
        assert_eq!(config.limits.context_window, 20);
        assert_eq!(config.agent.model, "claude-opus-4-6");
    }
}
