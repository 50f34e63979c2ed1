//! OpenAI-compatible streaming client
//!
//! Speaks `/chat/completions` with `stream: true` against any compatible
//! endpoint (a proxy in front of several upstreams in production).  SSE is
//! parsed by hand line by line; tool-call deltas are forwarded with the
//! provider-assigned index so the caller can accumulate fragments.

use super::{ChatMessage, CompletionRequest, CompletionService, Role, StreamChunk};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let mut msg = json!({
                    "role": role,
                    "content": m.content,
                });
                if let Some(ref tc_id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(tc_id);
                }
                if let Some(ref name) = m.name {
                    msg["name"] = json!(name);
                }
                if let Some(ref tool_calls) = m.tool_calls {
                    msg["tool_calls"] = json!(tool_calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            },
                        }))
                        .collect::<Vec<_>>());
                }
                msg
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    /// Usually a string fragment; some endpoints send a whole object.
    #[serde(default)]
    arguments: Option<Value>,
}

fn parse_data_line(data: &str) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) else {
        return chunks;
    };

    // Error objects can arrive mid-stream without a choices array.
    if parsed.choices.is_empty() {
        if let Some(err) = parsed.error {
            let detail = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| err.to_string());
            chunks.push(StreamChunk::Error(format!("LLM error: {detail}")));
        }
        return chunks;
    }

    let delta = &parsed.choices[0].delta;
    if let Some(ref content) = delta.content {
        if !content.is_empty() {
            chunks.push(StreamChunk::Text(content.clone()));
        }
    }
    if let Some(ref tool_calls) = delta.tool_calls {
        for tc in tool_calls {
            let (name, arguments) = match &tc.function {
                Some(func) => {
                    let args = func.arguments.as_ref().map(|a| match a {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string(other).unwrap_or_default(),
                    });
                    (func.name.clone(), args)
                }
                None => (None, None),
            };
            chunks.push(StreamChunk::ToolCallDelta {
                index: tc.index,
                id: tc.id.clone(),
                name,
                arguments,
            });
        }
    }
    chunks
}

#[async_trait]
impl CompletionService for OpenAiCompatClient {
    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<futures::stream::BoxStream<'static, StreamChunk>> {
        let mut body = json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
            "stream": true,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                }))
                .collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }

        tracing::debug!(model = %request.model, tools = request.tools.len(), "streaming completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send streaming request to completion service")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(200).collect();
            anyhow::bail!("Completion service returned {}: {}", status, preview);
        }

        let stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut done = false;

        Ok(stream
            .flat_map(move |chunk_result| {
                let mut chunks: Vec<StreamChunk> = Vec::new();
                if done {
                    return futures::stream::iter(chunks);
                }
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            if line == "data: [DONE]" {
                                chunks.push(StreamChunk::Done);
                                done = true;
                                break;
                            }
                            if let Some(data) = line.strip_prefix("data: ") {
                                chunks.extend(parse_data_line(data));
                            }
                        }
                    }
                    Err(e) => {
                        chunks.push(StreamChunk::Error(format!("LLM stream error: {e}")));
                        done = true;
                    }
                }
                futures::stream::iter(chunks)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolCallDescriptor;

    #[test]
    fn converts_tool_messages_to_wire_shape() {
        let messages = vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallDescriptor {
                    id: "call_1".to_string(),
                    name: "docker-management__list_containers".to_string(),
                    arguments: "{\"status\":\"running\"}".to_string(),
                }],
            ),
            ChatMessage::tool("ok", "call_1", "docker-management__list_containers"),
        ];
        let wire = OpenAiCompatClient::convert_messages(&messages);

        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[0]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_content_delta() {
        let chunks =
            parse_data_line(r#"{"choices":[{"delta":{"content":"Hello"},"index":0}]}"#);
        assert!(matches!(&chunks[0], StreamChunk::Text(t) if t == "Hello"));
    }

    #[test]
    fn parses_tool_call_delta_fragments() {
        let chunks = parse_data_line(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"bash-execution__run_command","arguments":"{\"com"}}]}}]}"#,
        );
        match &chunks[0] {
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_9"));
                assert_eq!(name.as_deref(), Some("bash-execution__run_command"));
                assert_eq!(arguments.as_deref(), Some("{\"com"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn surfaces_stream_error_objects() {
        let chunks = parse_data_line(r#"{"error":{"message":"rate limited"}}"#);
        assert!(matches!(&chunks[0], StreamChunk::Error(e) if e.contains("rate limited")));
    }
}
