//! HTTP server
//!
//! Routes: /health (public), /ws (the gateway), a small REST surface for
//! sessions, skills, config, and the audit trail, plus the agent-to-agent
//! endpoints.  Everything except /health, the discovery card, and the
//! WebSocket upgrade goes through bearer-token auth; the WebSocket
//! authenticates in-handler so it can answer with a close code.

pub mod a2a;
pub mod auth;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::gateway::{self, TurnEngine};
use crate::memory::ContextProviders;
use crate::provider::openai_compat::OpenAiCompatClient;
use crate::router::SkillRouter;
use crate::session::{FileSessionStore, SessionStore};
use crate::skill::{ExecutorRegistry, SkillCatalog};
use anyhow::{Context, Result};
use auth::AuthState;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const PUBLIC_PATHS: &[&str] = &["/health", "/ws", "/.well-known/agent.json"];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<TurnEngine>,
    pub audit: Arc<AuditLog>,
    pub auth: AuthState,
}

impl AppState {
    /// Wire up the full production object graph from configuration.
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let audit = Arc::new(AuditLog::from_env());
        let catalog = Arc::new(SkillCatalog::builtin());
        let executors = Arc::new(ExecutorRegistry::with_defaults());

        let router = Arc::new(SkillRouter::new(
            catalog.clone(),
            executors,
            Duration::from_secs(config.limits.confirmation_timeout_secs),
            audit.clone(),
        ));

        let session_dir = config
            .session
            .data_dir
            .clone()
            .or_else(|| Config::data_dir().map(|d| d.join("sessions")))
            .unwrap_or_else(|| PathBuf::from("./sessions"));
        let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(
            session_dir,
            Duration::from_secs(config.session.ttl_secs),
        ));

        let completion = Arc::new(OpenAiCompatClient::new(
            config.provider.base_url.clone(),
            config.provider.api_key.clone().unwrap_or_default(),
        )?);

        let engine = Arc::new(TurnEngine {
            config: config.clone(),
            catalog,
            router,
            sessions,
            providers: ContextProviders::none(),
            completion,
        });

        Ok(Self {
            config,
            engine,
            audit,
            auth: AuthState::from_env(),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/skills", get(list_skills))
        .route("/api/config", get(show_config))
        .route("/v1/audit/recent", get(audit_recent))
        .route("/.well-known/agent.json", get(a2a::agent_card))
        .route("/a2a", post(a2a::rpc))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(hostname: &str, port: u16, config: Config) -> Result<()> {
    let state = AppState::build(config)?;
    let app = build_router(state);

    let addr = format!("{hostname}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let query_token = request
        .uri()
        .query()
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("token=")))
        .map(str::to_string);
    let token = bearer.or(query_token);

    if state.auth.verify(token.as_deref()) {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "agent": state.config.agent.name,
        "server": state.config.agent.server_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct SessionListQuery {
    user_id: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Response {
    let user_id = query.user_id.unwrap_or_else(|| "admin".to_string());
    match state.engine.sessions.list(&user_id).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.sessions.get(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "session not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.sessions.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_skills(State(state): State<AppState>) -> Json<serde_json::Value> {
    let enabled = &state.config.agent.enabled_skills;
    let skills: Vec<_> = state
        .engine
        .catalog
        .skills()
        .iter()
        .map(|skill| {
            json!({
                "id": skill.id,
                "description": skill.description,
                "enabled": enabled.contains(&skill.id.to_string()),
                "actions": skill.actions,
            })
        })
        .collect();
    Json(json!({ "skills": skills }))
}

async fn show_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agent = &state.config.agent;
    Json(json!({
        "provider": {
            "base_url": state.config.provider.base_url,
            "api_key_set": state.config.provider.api_key.is_some(),
        },
        "agent": {
            "name": agent.name,
            "server_name": agent.server_name,
            "mission": agent.mission.as_str(),
            "model": agent.model,
            "enabled_skills": agent.enabled_skills,
            "admin_only": agent.admin_only,
        },
        "limits": state.config.limits,
        "session": { "ttl_secs": state.config.session.ttl_secs },
    }))
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn audit_recent(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<serde_json::Value> {
    let entries = state.audit.recent(query.limit.unwrap_or(50)).await;
    Json(json!({ "entries": entries }))
}
