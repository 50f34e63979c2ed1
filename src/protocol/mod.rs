//! Wire protocol frames
//!
//! The closed set of typed messages exchanged over a gateway connection,
//! plus tool-call id normalization for heterogeneous upstream providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Short correlation id carried by every frame.
pub fn frame_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// A server-to-client frame.  `type` is the discriminator on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after the connection is accepted and authenticated.
    Connected {
        session_id: String,
        agent_name: String,
        server_name: String,
        write_enabled: bool,
    },
    /// Streamed text chunk from the model.
    Chunk { content: String },
    /// End of a complete assistant message.
    MessageDone { message_id: String, content: String },
    Error {
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    SkillStart {
        skill_name: String,
        action: String,
        params: Value,
    },
    SkillProgress { skill_name: String, output: String },
    SkillResult {
        skill_name: String,
        action: String,
        success: bool,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// Asks the user to approve a risky action before it runs.
    ConfirmRequired {
        confirm_id: String,
        skill_name: String,
        action: String,
        description: String,
        params: Value,
    },
    Pong {},
}

/// Envelope adding the correlation id and emission timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct FrameEnvelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub frame: ServerFrame,
}

impl FrameEnvelope {
    pub fn new(frame: ServerFrame) -> Self {
        Self {
            id: frame_id(),
            timestamp: Utc::now(),
            frame,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}

/// Outbound frame channel.  The socket writer drains this; producers never
/// block on the network, and a closed channel (client gone) is not an error.
pub type FrameSink = tokio::sync::mpsc::UnboundedSender<FrameEnvelope>;

/// Enqueue a frame for delivery.
pub fn send_frame(sink: &FrameSink, frame: ServerFrame) {
    let _ = sink.send(FrameEnvelope::new(frame));
}

/// A client-to-server frame.  Anything else yields an `error` frame and the
/// receive loop continues.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping {},
    Message { content: String },
    Chat { content: String },
    Confirm { confirm_id: String, confirmed: bool },
}

impl ClientFrame {
    /// Parse raw text from the socket.
    pub fn parse(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("Invalid frame: {e}"))
    }
}

/// One tool call accumulated from streaming deltas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDescriptor {
    pub id: String,
    pub name: String,
    /// Raw argument string as produced by the provider.
    pub arguments: String,
}

/// Rewrites provider-specific tool-call ids to the canonical `call_` form.
///
/// The remap table lives for one user turn only, so tool-result messages
/// that reference a pre-rewrite id still resolve to the normalized one.
#[derive(Debug, Default)]
pub struct IdRemapTable {
    remap: HashMap<String, String>,
}

impl IdRemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize an id, recording the mapping when a rewrite happens.
    /// Idempotent: already-canonical ids pass through unchanged.
    pub fn normalize(&mut self, raw_id: &str) -> String {
        if raw_id.is_empty() || raw_id.starts_with("call_") {
            return raw_id.to_string();
        }
        let stripped = raw_id
            .trim_start_matches("toolu_vrtx_")
            .trim_start_matches("toolu_");
        let new_id = format!("call_{stripped}");
        self.remap.insert(raw_id.to_string(), new_id.clone());
        new_id
    }

    /// Resolve an id a tool-result message refers to.  Unmapped ids are
    /// returned as-is.
    pub fn resolve(&self, raw_id: &str) -> String {
        self.remap
            .get(raw_id)
            .cloned()
            .unwrap_or_else(|| raw_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let frame = FrameEnvelope::new(ServerFrame::Chunk {
            content: "hello".to_string(),
        });
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "chunk");
        assert_eq!(value["content"], "hello");
        assert_eq!(value["id"].as_str().unwrap().len(), 8);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn confirm_frame_carries_all_fields() {
        let frame = FrameEnvelope::new(ServerFrame::ConfirmRequired {
            confirm_id: "abc12345".to_string(),
            skill_name: "docker-management".to_string(),
            action: "manage_container".to_string(),
            description: "This will affect a running container".to_string(),
            params: json!({"container_name": "web", "action": "restart"}),
        });
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "confirm_required");
        assert_eq!(value["confirm_id"], "abc12345");
        assert_eq!(value["params"]["action"], "restart");
    }

    #[test]
    fn client_frames_parse() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"ping"}"#),
            Ok(ClientFrame::Ping {})
        ));
        match ClientFrame::parse(r#"{"type":"chat","content":"hi"}"#) {
            Ok(ClientFrame::Chat { content }) => assert_eq!(content, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
        match ClientFrame::parse(r#"{"type":"confirm","confirm_id":"x","confirmed":true}"#) {
            Ok(ClientFrame::Confirm {
                confirm_id,
                confirmed,
            }) => {
                assert_eq!(confirm_id, "x");
                assert!(confirmed);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_or_malformed_frames_are_errors() {
        assert!(ClientFrame::parse("not json").is_err());
        assert!(ClientFrame::parse(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn id_normalization_is_idempotent() {
        let mut table = IdRemapTable::new();
        assert_eq!(table.normalize("call_abc"), "call_abc");
        assert_eq!(table.normalize("call_abc"), "call_abc");
    }

    #[test]
    fn foreign_ids_are_rewritten_and_resolvable() {
        let mut table = IdRemapTable::new();
        assert_eq!(table.normalize("toolu_vrtx_01abc"), "call_01abc");
        assert_eq!(table.normalize("toolu_01xyz"), "call_01xyz");
        assert_eq!(table.normalize("bare-id"), "call_bare-id");

        // A later tool-result referencing the original id resolves to the
        // normalized form.
        assert_eq!(table.resolve("toolu_vrtx_01abc"), "call_01abc");
        assert_eq!(table.resolve("call_01abc"), "call_01abc");
        assert_eq!(table.resolve("never-seen"), "never-seen");
    }
}
