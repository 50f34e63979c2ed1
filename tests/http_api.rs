//! REST surface tests: auth gating and the read-only endpoints.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use opsgate::audit::{AuditCategory, AuditLog, AuditOutcome};
use opsgate::config::Config;
use opsgate::gateway::TurnEngine;
use opsgate::memory::ContextProviders;
use opsgate::provider::openai_compat::OpenAiCompatClient;
use opsgate::router::SkillRouter;
use opsgate::server::auth::AuthState;
use opsgate::server::{build_router, AppState};
use opsgate::session::MemorySessionStore;
use opsgate::skill::{ExecutorRegistry, SkillCatalog};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const TOKEN: &str = "test-token";

fn state() -> AppState {
    let config = Arc::new(Config::default());
    let audit = Arc::new(AuditLog::new(128, None));
    let catalog = Arc::new(SkillCatalog::builtin());
    let router = Arc::new(SkillRouter::new(
        catalog.clone(),
        Arc::new(ExecutorRegistry::with_defaults()),
        Duration::from_secs(60),
        audit.clone(),
    ));
    let engine = Arc::new(TurnEngine {
        config: config.clone(),
        catalog,
        router,
        sessions: Arc::new(MemorySessionStore::new()),
        providers: ContextProviders::none(),
        completion: Arc::new(
            OpenAiCompatClient::new("http://localhost:4000/v1", "unused").unwrap(),
        ),
    });
    AppState {
        config,
        engine,
        audit,
        auth: AuthState::with_token(TOKEN),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = build_router(state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["agent"], "Col. Corelli");
}

#[tokio::test]
async fn api_requires_token() {
    let app = build_router(state());
    let response = app
        .oneshot(Request::get("/api/skills").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_token_grants_access() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::get("/api/skills")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let skills = body["skills"].as_array().unwrap();
    assert_eq!(skills.len(), 6);
    assert!(skills.iter().any(|s| s["id"] == "docker-management"));
    // postgresql-ops exists but is not enabled by default.
    let pg = skills
        .iter()
        .find(|s| s["id"] == "postgresql-ops")
        .unwrap();
    assert_eq!(pg["enabled"], false);
}

#[tokio::test]
async fn query_param_token_works_too() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::get(format!("/api/config?token={TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["agent"]["name"], "Col. Corelli");
    // Config endpoint never echoes the key.
    assert!(body["provider"]["api_key"].is_null());
    assert_eq!(body["provider"]["api_key_set"], false);
}

#[tokio::test]
async fn audit_endpoint_returns_recent_entries() {
    let state = state();
    state
        .audit
        .log(
            AuditCategory::SkillExecution,
            "system-status__cpu",
            AuditOutcome::Success,
            None,
            None,
            Some(5),
        )
        .await;

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::get("/v1/audit/recent?limit=10")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "system-status__cpu");
}

#[tokio::test]
async fn agent_card_is_public() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::get("/.well-known/agent.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "Col. Corelli");
    assert_eq!(body["authentication"]["schemes"][0], "bearer");
    assert_eq!(body["skills"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn a2a_requires_token() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::post("/a2a")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tasks/send"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

async fn rpc(app: axum::Router, body: &str) -> serde_json::Value {
    let response = app
        .oneshot(
            Request::post("/a2a")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn a2a_task_executes_matching_skill() {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tasks/send",
        "params": {
            "id": "task-1",
            "message": { "parts": [ { "type": "text", "text": "memory status please" } ] },
        },
    });
    let reply = rpc(build_router(state()), &body.to_string()).await;

    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["id"], "task-1");
    assert_eq!(reply["result"]["status"]["state"], "completed");
    let text = reply["result"]["artifacts"][0]["parts"][0]["text"]
        .as_str()
        .unwrap();
    assert!(text.contains("RAM:"), "unexpected artifact: {text}");
}

#[tokio::test]
async fn a2a_rejects_unknown_method() {
    let reply = rpc(
        build_router(state()),
        r#"{"jsonrpc":"2.0","id":2,"method":"tasks/cancel"}"#,
    )
    .await;
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn a2a_rejects_message_without_text() {
    let reply = rpc(
        build_router(state()),
        r#"{"jsonrpc":"2.0","id":3,"method":"tasks/send","params":{"message":{"parts":[]}}}"#,
    )
    .await;
    assert_eq!(reply["error"]["code"], -32602);
}

#[tokio::test]
async fn a2a_answers_parse_errors_in_protocol() {
    let reply = rpc(build_router(state()), "{not json").await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());
}

#[tokio::test]
async fn a2a_requires_a_method() {
    let reply = rpc(build_router(state()), r#"{"jsonrpc":"2.0","id":4}"#).await;
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_session_is_404() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::get("/api/sessions/nope")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
