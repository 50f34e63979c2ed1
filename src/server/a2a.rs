//! Agent-to-agent surface
//!
//! Lets other agents discover this one and hand it tasks without speaking
//! the WebSocket protocol: a discovery card at `/.well-known/agent.json`
//! and a JSON-RPC 2.0 endpoint at `/a2a`.  Tasks run through the skill
//! router with writes disabled.

use super::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

/// Keyword phrases mapped to the skill action that answers them.  First
/// match wins; unmatched tasks get a pointer to the chat interface.
const KEYWORD_ROUTES: &[(&str, &str)] = &[
    ("list containers", "docker-management__list_containers"),
    ("running containers", "docker-management__list_containers"),
    ("docker ps", "docker-management__list_containers"),
    ("system status", "system-status__full_status"),
    ("server status", "system-status__full_status"),
    ("cpu status", "system-status__cpu"),
    ("cpu usage", "system-status__cpu"),
    ("memory status", "system-status__memory"),
    ("ram usage", "system-status__memory"),
    ("disk status", "system-status__disk"),
    ("disk usage", "system-status__disk"),
    ("gpu status", "system-status__gpu"),
    ("gpu memory", "system-status__gpu"),
    ("top processes", "system-status__processes"),
    ("service health", "service-health__check_all"),
    ("health check", "service-health__check_all"),
];

/// GET /.well-known/agent.json — public discovery card.
pub async fn agent_card(State(state): State<AppState>) -> Json<Value> {
    let agent = &state.config.agent;
    let skills: Vec<Value> = state
        .engine
        .catalog
        .skills()
        .iter()
        .map(|skill| {
            json!({
                "id": skill.id,
                "name": skill.id,
                "description": skill.description,
                "tags": [agent.mission.as_str(), "server-management"],
            })
        })
        .collect();
    Json(json!({
        "name": agent.name,
        "description": format!(
            "{} operations agent for {}",
            agent.mission.as_str(),
            agent.server_name
        ),
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": {
            "streaming": false,
            "pushNotifications": false,
        },
        "authentication": { "schemes": ["bearer"] },
        "defaultInputModes": ["text"],
        "defaultOutputModes": ["text"],
        "skills": skills,
    }))
}

/// POST /a2a — JSON-RPC 2.0 over a raw body so a parse failure can still be
/// answered in-protocol.
pub async fn rpc(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return Json(rpc_error(Value::Null, -32700, "Parse error")),
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = match request.get("method").and_then(Value::as_str) {
        Some(method) => method,
        None => return Json(rpc_error(id, -32600, "Invalid request: missing method")),
    };

    match method {
        "tasks/send" => Json(send_task(&state, id, &request["params"]).await),
        "tasks/get" => Json(rpc_error(id, -32601, "tasks/get not yet implemented")),
        other => Json(rpc_error(id, -32601, &format!("Method not found: {other}"))),
    }
}

async fn send_task(state: &AppState, id: Value, params: &Value) -> Value {
    let task_id = params["id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let text = params["message"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if text.trim().is_empty() {
        return rpc_error(id, -32602, "No text content in message");
    }

    let output = match route_keywords(&text) {
        Some(tool_name) => {
            info!(task_id, tool_name, "a2a task dispatched");
            // Progress frames go nowhere; the caller only sees the final
            // artifact.
            let (sink, _rx) = mpsc::unbounded_channel();
            state
                .engine
                .router
                .execute(&sink, &format!("a2a-{task_id}"), tool_name, &json!({}), false)
                .await
        }
        None => format!(
            "Received: {text}. No matching skill for this request; \
             use the chat interface for conversational access."
        ),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "id": task_id,
            "status": { "state": "completed" },
            "artifacts": [ { "parts": [ { "type": "text", "text": output } ] } ],
        },
    })
}

fn route_keywords(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    KEYWORD_ROUTES
        .iter()
        .find(|(phrase, _)| lowered.contains(phrase))
        .map(|(_, tool)| *tool)
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_route_to_skill_actions() {
        assert_eq!(
            route_keywords("What's the Memory Status right now?"),
            Some("system-status__memory")
        );
        assert_eq!(
            route_keywords("please list containers"),
            Some("docker-management__list_containers")
        );
        assert_eq!(route_keywords("write me a poem"), None);
    }
}
