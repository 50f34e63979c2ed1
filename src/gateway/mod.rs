//! Streaming gateway
//!
//! One WebSocket connection serves one conversation.  A user turn runs as a
//! spawned task so the receive loop keeps servicing pings and confirmation
//! answers while the model is streaming; only one turn may be in flight per
//! connection at a time.

pub mod prompt;

use crate::audit::{AuditCategory, AuditOutcome};
use crate::protocol::{
    frame_id, send_frame, ClientFrame, FrameEnvelope, FrameSink, IdRemapTable, ServerFrame,
    ToolCallDescriptor,
};
use crate::provider::{ChatMessage, CompletionRequest, CompletionService, Role, StreamChunk};
use crate::router::SkillRouter;
use crate::safety::is_write_capable_model;
use crate::server::AppState;
use crate::session::{Session, SessionStore};
use crate::skill::SkillCatalog;
use crate::{config::Config, memory::ContextProviders};
use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const NO_RESPONSE: &str = "(No response generated)";

/// Everything needed to run user turns, independent of any transport.
pub struct TurnEngine {
    pub config: Arc<Config>,
    pub catalog: Arc<SkillCatalog>,
    pub router: Arc<SkillRouter>,
    pub sessions: Arc<dyn SessionStore>,
    pub providers: ContextProviders,
    pub completion: Arc<dyn CompletionService>,
}

struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl TurnEngine {
    /// Run one user turn to completion.  Exactly one `message_done` frame is
    /// emitted per turn, even when the model or a provider misbehaves.
    pub async fn run_turn(
        &self,
        sink: &FrameSink,
        session_id: &str,
        user_id: &str,
        content: &str,
        write_enabled: bool,
    ) {
        let done = match self
            .turn_inner(sink, session_id, user_id, content, write_enabled)
            .await
        {
            Ok(done) => done,
            Err(e) => {
                error!(session_id, error = %e, "turn failed");
                send_frame(
                    sink,
                    ServerFrame::Error {
                        detail: format!("Agent error: {e}"),
                        code: None,
                    },
                );
                false
            }
        };

        if !done {
            send_frame(
                sink,
                ServerFrame::MessageDone {
                    message_id: frame_id(),
                    content: NO_RESPONSE.to_string(),
                },
            );
        }
    }

    async fn turn_inner(
        &self,
        sink: &FrameSink,
        session_id: &str,
        user_id: &str,
        content: &str,
        write_enabled: bool,
    ) -> Result<bool> {
        let agent = &self.config.agent;
        let limits = &self.config.limits;

        let mut session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => anyhow::bail!("session {session_id} no longer exists"),
        };
        session.add_message(ChatMessage::user(content));
        session.auto_title();
        self.sessions.put(&session).await?;

        let context = prompt::PromptContext::gather(&self.providers, content, user_id).await;
        let system =
            prompt::build_system_prompt(agent, &self.catalog, write_enabled, &context).await;
        let tools = self.catalog.tool_definitions(&agent.enabled_skills);
        let mut remap = IdRemapTable::new();
        // Assistant text from every round, so a turn that never reaches a
        // final answer still surfaces what the model said along the way.
        let mut all_parts: Vec<String> = Vec::new();

        for round in 0..limits.max_tool_rounds {
            let mut messages = vec![ChatMessage::system(system.clone())];
            let start = session.messages.len().saturating_sub(limits.context_window);
            for message in &session.messages[start..] {
                messages.push(normalize_replayed(message, &mut remap));
            }

            let request = CompletionRequest {
                model: agent.model.clone(),
                messages,
                tools: tools.clone(),
                temperature: limits.temperature,
                max_tokens: limits.max_tokens,
            };

            let mut stream = match self.completion.complete_stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(session_id, round, error = %e, "completion request failed");
                    send_frame(
                        sink,
                        ServerFrame::Error {
                            detail: format!("LLM error: {e}"),
                            code: None,
                        },
                    );
                    break;
                }
            };
            let mut text = String::new();
            let mut partials: BTreeMap<usize, PartialCall> = BTreeMap::new();
            let mut stream_failed = false;

            while let Some(chunk) = stream.next().await {
                match chunk {
                    StreamChunk::Text(piece) => {
                        text.push_str(&piece);
                        send_frame(sink, ServerFrame::Chunk { content: piece });
                    }
                    StreamChunk::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments,
                    } => {
                        let partial = partials.entry(index).or_insert_with(|| PartialCall {
                            id: String::new(),
                            name: String::new(),
                            arguments: String::new(),
                        });
                        if let Some(id) = id {
                            partial.id.push_str(&id);
                        }
                        if let Some(name) = name {
                            partial.name.push_str(&name);
                        }
                        if let Some(arguments) = arguments {
                            partial.arguments.push_str(&arguments);
                        }
                    }
                    StreamChunk::Done => break,
                    StreamChunk::Error(detail) => {
                        send_frame(sink, ServerFrame::Error { detail, code: None });
                        stream_failed = true;
                        break;
                    }
                }
            }

            if !text.is_empty() {
                all_parts.push(text.clone());
            }

            // A failed stream carries no usable tool calls; the text that
            // made it through is treated as the answer.
            let calls = if stream_failed {
                Vec::new()
            } else {
                assemble_calls(partials, &mut remap)
            };

            if calls.is_empty() {
                if text.is_empty() {
                    break;
                }
                session.add_message(ChatMessage::assistant(text.clone()));
                self.sessions.put(&session).await?;
                send_frame(
                    sink,
                    ServerFrame::MessageDone {
                        message_id: frame_id(),
                        content: text.clone(),
                    },
                );
                self.providers.store(content, &text, user_id).await;
                return Ok(true);
            }

            debug!(round, calls = calls.len(), "executing tool calls");
            session.add_message(ChatMessage::assistant_with_tools(text, calls.clone()));
            self.sessions.put(&session).await?;

            for call in calls {
                let params: Value = serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                let result = self
                    .router
                    .execute(sink, &session.id, &call.name, &params, write_enabled)
                    .await;
                session.add_message(ChatMessage::tool(result, call.id.clone(), call.name));
                self.sessions.put(&session).await?;
            }
        }

        // Round limit hit or a stream died: deliver whatever text the
        // rounds produced instead of dropping it.
        let final_content = all_parts.join("\n\n");
        if final_content.is_empty() {
            warn!(session_id, "turn ended without any content");
            return Ok(false);
        }
        if session
            .messages
            .last()
            .map(|m| m.content != final_content)
            .unwrap_or(true)
        {
            session.add_message(ChatMessage::assistant(final_content.clone()));
            self.sessions.put(&session).await?;
        }
        send_frame(
            sink,
            ServerFrame::MessageDone {
                message_id: frame_id(),
                content: final_content,
            },
        );
        Ok(true)
    }
}

/// Turn accumulated deltas into well-formed tool calls.  Calls with no name
/// or non-object arguments are dropped; the model sees their absence as an
/// ordinary completion.
fn assemble_calls(
    partials: BTreeMap<usize, PartialCall>,
    remap: &mut IdRemapTable,
) -> Vec<ToolCallDescriptor> {
    let mut calls = Vec::new();
    for (index, partial) in partials {
        if partial.name.is_empty() {
            warn!(index, "dropping tool call with no name");
            continue;
        }
        let arguments = if partial.arguments.is_empty() {
            "{}".to_string()
        } else {
            partial.arguments
        };
        match serde_json::from_str::<Value>(&arguments) {
            Ok(Value::Object(_)) => {}
            _ => {
                warn!(index, name = %partial.name, "dropping tool call with malformed arguments");
                continue;
            }
        }
        let id = if partial.id.is_empty() {
            format!("call_{}", frame_id())
        } else {
            remap.normalize(&partial.id)
        };
        calls.push(ToolCallDescriptor {
            id,
            name: partial.name,
            arguments,
        });
    }
    calls
}

/// Rewrite provider-specific ids in replayed transcript messages so every
/// round sees one consistent id space.
fn normalize_replayed(message: &ChatMessage, remap: &mut IdRemapTable) -> ChatMessage {
    let mut message = message.clone();
    if let Some(ref mut calls) = message.tool_calls {
        for call in calls.iter_mut() {
            call.id = remap.normalize(&call.id);
        }
    }
    if message.role == Role::Tool {
        if let Some(ref id) = message.tool_call_id {
            message.tool_call_id = Some(remap.resolve(id));
        }
    }
    message
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, query: WsQuery) {
    let mut socket = socket;

    if !state.auth.verify(query.token.as_deref()) {
        state
            .audit
            .log(
                AuditCategory::Auth,
                "ws_connect",
                AuditOutcome::Denied,
                None,
                None,
                None,
            )
            .await;
        refuse(&mut socket, 4001, "Authentication failed").await;
        return;
    }

    if admin_lockout(state.config.agent.admin_only, &state.auth) {
        refuse(&mut socket, 4003, "Admin access required").await;
        return;
    }

    let user_id = query.user_id.unwrap_or_else(|| "admin".to_string());

    // Resume or create the session before anything is streamed.
    let session = match resolve_session(
        state.engine.sessions.as_ref(),
        &state.audit,
        query.session_id.as_deref(),
        &user_id,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "session resolution failed");
            let _ = socket.close().await;
            return;
        }
    };
    let session_id = session.id.clone();

    let write_enabled = is_write_capable_model(
        &state.config.agent.model,
        &state.config.agent.write_capable_models,
    );

    let (sink, mut frames) = mpsc::unbounded_channel::<FrameEnvelope>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drains the frame channel onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = frames.recv().await {
            if ws_tx
                .send(Message::Text(envelope.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    send_frame(
        &sink,
        ServerFrame::Connected {
            session_id: session_id.clone(),
            agent_name: state.config.agent.name.clone(),
            server_name: state.config.agent.server_name.clone(),
            write_enabled,
        },
    );
    info!(session_id, user_id, write_enabled, "connection established");

    let mut turn_task: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let frame = match ClientFrame::parse(text.as_str()) {
            Ok(frame) => frame,
            Err(detail) => {
                send_frame(&sink, ServerFrame::Error { detail, code: None });
                continue;
            }
        };

        match frame {
            ClientFrame::Ping {} => send_frame(&sink, ServerFrame::Pong {}),
            ClientFrame::Confirm {
                confirm_id,
                confirmed,
            } => {
                state
                    .engine
                    .router
                    .resolve_confirmation(&confirm_id, confirmed)
                    .await
            }
            ClientFrame::Message { content } | ClientFrame::Chat { content } => {
                let busy = turn_task
                    .as_ref()
                    .map(|task| !task.is_finished())
                    .unwrap_or(false);
                if busy {
                    send_frame(
                        &sink,
                        ServerFrame::Error {
                            detail: "A message is already being processed".to_string(),
                            code: Some("busy".to_string()),
                        },
                    );
                    continue;
                }
                let engine = state.engine.clone();
                let sink = sink.clone();
                let session_id = session_id.clone();
                let user_id = user_id.clone();
                turn_task = Some(tokio::spawn(async move {
                    engine
                        .run_turn(&sink, &session_id, &user_id, &content, write_enabled)
                        .await;
                }));
            }
        }
    }

    // Client gone: stop any in-flight turn and let the writer drain out.
    if let Some(task) = turn_task {
        task.abort();
    }
    drop(sink);
    let _ = writer.await;
    info!(session_id, "connection closed");
}

/// Possession of the token is what makes a caller the administrator, so an
/// admin-only server refuses every connection while auth is disabled.
fn admin_lockout(admin_only: bool, auth: &crate::server::auth::AuthState) -> bool {
    admin_only && !auth.is_enabled()
}

/// Send an `error` frame followed by a close frame on a socket that never
/// made it past the handshake.
async fn refuse(socket: &mut WebSocket, code: u16, reason: &str) {
    let envelope = FrameEnvelope::new(ServerFrame::Error {
        detail: reason.to_string(),
        code: None,
    });
    let _ = socket.send(Message::Text(envelope.to_json().into())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Look up or create the session for a connection.  A missing, expired, or
/// foreign-owned session id falls back to a fresh session; the connection
/// always gets one.
async fn resolve_session(
    sessions: &dyn SessionStore,
    audit: &crate::audit::AuditLog,
    session_id: Option<&str>,
    user_id: &str,
) -> Result<Session> {
    if let Some(id) = session_id {
        match sessions.get(id).await? {
            Some(session) if session.user_id == user_id => {
                audit
                    .log(
                        AuditCategory::Session,
                        "resume",
                        AuditOutcome::Success,
                        Some(id.to_string()),
                        None,
                        None,
                    )
                    .await;
                return Ok(session);
            }
            Some(_) => {
                warn!(session_id = id, user_id, "session owned by another user");
                audit
                    .log(
                        AuditCategory::Auth,
                        "session_resume",
                        AuditOutcome::Denied,
                        Some(id.to_string()),
                        None,
                        None,
                    )
                    .await;
            }
            None => {}
        }
    }

    let session = Session::new(user_id, "default");
    sessions.put(&session).await?;
    audit
        .log(
            AuditCategory::Session,
            "create",
            AuditOutcome::Success,
            Some(session.id.clone()),
            None,
            None,
        )
        .await;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::server::auth::AuthState;
    use crate::session::MemorySessionStore;

    #[tokio::test]
    async fn foreign_session_id_gets_a_fresh_session() {
        let store = MemorySessionStore::new();
        let audit = AuditLog::new(16, None);

        let theirs = Session::new("alice", "default");
        store.put(&theirs).await.unwrap();

        let session = resolve_session(&store, &audit, Some(&theirs.id), "bob")
            .await
            .unwrap();
        assert_ne!(session.id, theirs.id);
        assert_eq!(session.user_id, "bob");
        // Their transcript stays untouched.
        let kept = store.get(&theirs.id).await.unwrap().unwrap();
        assert_eq!(kept.user_id, "alice");
    }

    #[tokio::test]
    async fn own_session_id_resumes() {
        let store = MemorySessionStore::new();
        let audit = AuditLog::new(16, None);

        let mine = Session::new("alice", "default");
        store.put(&mine).await.unwrap();

        let session = resolve_session(&store, &audit, Some(&mine.id), "alice")
            .await
            .unwrap();
        assert_eq!(session.id, mine.id);
    }

    #[tokio::test]
    async fn unknown_session_id_gets_a_fresh_session() {
        let store = MemorySessionStore::new();
        let audit = AuditLog::new(16, None);

        let session = resolve_session(&store, &audit, Some("gone"), "alice")
            .await
            .unwrap();
        assert_ne!(session.id, "gone");
        assert_eq!(session.user_id, "alice");
    }

    #[test]
    fn admin_only_requires_auth_to_be_enabled() {
        assert!(admin_lockout(true, &AuthState::disabled()));
        assert!(!admin_lockout(true, &AuthState::with_token("t")));
        assert!(!admin_lockout(false, &AuthState::disabled()));
        assert!(!admin_lockout(false, &AuthState::with_token("t")));
    }
}
