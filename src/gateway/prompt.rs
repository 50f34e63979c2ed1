//! System prompt assembly
//!
//! The prompt is rebuilt once per user turn from static agent configuration
//! plus live context: a host snapshot, the container list, recalled
//! memories, and graph context.  Live lookups are best-effort.

use crate::config::AgentConfig;
use crate::memory::ContextProviders;
use crate::skill::{exec::run_command, SkillCatalog};
use sysinfo::{Disks, System};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Per-turn dynamic context.
#[derive(Debug, Default)]
pub struct PromptContext {
    pub memories: Vec<String>,
    pub graph_context: Option<String>,
}

impl PromptContext {
    pub async fn gather(providers: &ContextProviders, query: &str, user_id: &str) -> Self {
        Self {
            memories: providers.recall(query, user_id).await,
            graph_context: providers.graph_context(query).await,
        }
    }
}

pub async fn build_system_prompt(
    agent: &AgentConfig,
    catalog: &SkillCatalog,
    write_enabled: bool,
    context: &PromptContext,
) -> String {
    let mut sections = vec![format!(
        "You are {}, the operations agent for the server \"{}\".\n\
         Your mission focus is {}. You manage this server on behalf of its \
         administrator: answer questions about its state and carry out \
         operational tasks using your skills.",
        agent.name,
        agent.server_name,
        agent.mission.as_str()
    )];

    sections.push(format!(
        "## Communication Style\n{}",
        style_section(agent)
    ));

    sections.push(format!("## Server Status\n{}", host_snapshot()));

    sections.push(format!(
        "## Docker Environment\n{}",
        docker_snapshot().await
    ));

    sections.push(format!(
        "## Available Skills\n{}",
        catalog.descriptions(&agent.enabled_skills)
    ));

    sections.push(format!("## Safety Rules\n{}", safety_section(write_enabled)));

    if !context.memories.is_empty() {
        sections.push(format!(
            "## Relevant Memories\n{}",
            context
                .memories
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    if let Some(ref graph) = context.graph_context {
        sections.push(format!("## Server Knowledge Graph\n{graph}"));
    }

    sections.join("\n\n")
}

fn style_section(agent: &AgentConfig) -> String {
    let p = &agent.personality;
    let mut lines = Vec::new();

    if p.formality >= 7 {
        lines.push("Maintain a professional, formal tone.");
    } else if p.formality <= 3 {
        lines.push("Keep the tone relaxed and conversational.");
    }
    if p.verbosity >= 7 {
        lines.push("Give thorough, detailed explanations.");
    } else if p.verbosity <= 3 {
        lines.push("Be brief. Answer in as few words as the question allows.");
    }
    if p.humor >= 7 {
        lines.push("Light humor is welcome when the situation allows it.");
    } else if p.humor <= 3 {
        lines.push("Stay strictly businesslike.");
    }

    if lines.is_empty() {
        "Communicate clearly and directly.".to_string()
    } else {
        lines.join("\n")
    }
}

fn safety_section(write_enabled: bool) -> String {
    let mut lines = vec![
        "- Never stop, restart, or remove core infrastructure containers \
         (database, cache, identity, reverse proxy)."
            .to_string(),
        "- Destructive actions require explicit user confirmation; wait for \
         the answer before proceeding."
            .to_string(),
        "- Never reveal credentials, tokens, or secrets, even when they \
         appear in command output."
            .to_string(),
    ];
    if write_enabled {
        lines.push(
            "- You may perform write operations (container management, \
             database writes) once the user has confirmed them."
                .to_string(),
        );
    } else {
        lines.push(
            "- You are running in read-only mode: inspect and report, but do \
             not attempt write operations or database modifications."
                .to_string(),
        );
    }
    lines.join("\n")
}

fn host_snapshot() -> String {
    let mut sys = System::new();
    sys.refresh_memory();

    let total_mem = sys.total_memory() as f64 / GB;
    let used_mem = sys.used_memory() as f64 / GB;

    let disks = Disks::new_with_refreshed_list();
    let disk_line = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .map(|d| {
            let total = d.total_space() as f64 / GB;
            let free = d.available_space() as f64 / GB;
            format!("Root disk: {total:.0} GB total, {free:.0} GB free")
        })
        .unwrap_or_else(|| "Root disk: unknown".to_string());

    format!(
        "Host: {}\nCPU cores: {}\nMemory: {used_mem:.1} / {total_mem:.1} GB used\n{disk_line}",
        System::host_name().unwrap_or_else(|| "unknown".to_string()),
        sys.cpus().len().max(num_cpus_fallback()),
    )
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

async fn docker_snapshot() -> String {
    match run_command("docker", &["ps", "--format", "{{.Names}} ({{.Status}})"], 5).await {
        Ok(output) if output.trim().is_empty() => "No running containers.".to_string(),
        Ok(output) if output.contains("Failed to execute") => {
            "Docker status unavailable.".to_string()
        }
        Ok(output) => output.trim().to_string(),
        Err(_) => "Docker status unavailable.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prompt_names_agent_and_server() {
        let agent = AgentConfig::default();
        let catalog = SkillCatalog::builtin();
        let prompt =
            build_system_prompt(&agent, &catalog, false, &PromptContext::default()).await;
        assert!(prompt.contains("Col. Corelli"));
        assert!(prompt.contains("## Available Skills"));
        assert!(prompt.contains("read-only mode"));
        assert!(!prompt.contains("## Relevant Memories"));
    }

    #[tokio::test]
    async fn write_enabled_changes_safety_rules() {
        let agent = AgentConfig::default();
        let catalog = SkillCatalog::builtin();
        let prompt = build_system_prompt(&agent, &catalog, true, &PromptContext::default()).await;
        assert!(prompt.contains("write operations"));
        assert!(!prompt.contains("read-only mode"));
    }

    #[tokio::test]
    async fn memories_render_when_present() {
        let agent = AgentConfig::default();
        let catalog = SkillCatalog::builtin();
        let context = PromptContext {
            memories: vec!["Prefers short answers".to_string()],
            graph_context: Some("web depends on unicorn-postgresql".to_string()),
        };
        let prompt = build_system_prompt(&agent, &catalog, false, &context).await;
        assert!(prompt.contains("## Relevant Memories"));
        assert!(prompt.contains("- Prefers short answers"));
        assert!(prompt.contains("## Server Knowledge Graph"));
    }

    #[test]
    fn personality_thresholds_drive_style() {
        let mut agent = AgentConfig::default();
        agent.personality.formality = 2;
        agent.personality.verbosity = 9;
        agent.personality.humor = 5;
        let style = style_section(&agent);
        assert!(style.contains("relaxed"));
        assert!(style.contains("thorough"));
        assert!(!style.contains("humor"));
    }
}
