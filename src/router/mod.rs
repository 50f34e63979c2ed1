//! Skill router
//!
//! Resolves a model tool call to a skill action, runs the confirmation
//! handshake for risky actions, dispatches to the executor, and reports
//! progress over the frame sink.  The string it returns is what the model
//! sees as the tool result; frames carry only a bounded preview.

use crate::audit::{AuditCategory, AuditLog, AuditOutcome};
use crate::protocol::{frame_id, send_frame, FrameSink, ServerFrame};
use crate::safety;
use crate::skill::{ExecutorRegistry, SkillCatalog, TOOL_NAME_SEPARATOR};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Characters of skill output echoed in the `skill_result` frame.  The model
/// always receives the full output.
const RESULT_PREVIEW_CHARS: usize = 500;

const CANCELLED: &str = "Action cancelled by user.";

/// Prefixes every executor uses to report a refusal or failure in its
/// output text.  Anything else counts as success.
const FAILURE_PREFIXES: &[&str] = &[
    "Blocked:",
    "Unknown skill action:",
    "Unknown action:",
    "Skill not found:",
    "Skill execution error:",
    "Docker error:",
    "Error",
    "Failed to execute",
    "Command timed out",
];

fn output_indicates_failure(output: &str) -> bool {
    FAILURE_PREFIXES.iter().any(|p| output.starts_with(p))
}

pub struct SkillRouter {
    catalog: Arc<SkillCatalog>,
    executors: Arc<ExecutorRegistry>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    confirmation_timeout: Duration,
    audit: Arc<AuditLog>,
}

impl SkillRouter {
    pub fn new(
        catalog: Arc<SkillCatalog>,
        executors: Arc<ExecutorRegistry>,
        confirmation_timeout: Duration,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            catalog,
            executors,
            pending: Mutex::new(HashMap::new()),
            confirmation_timeout,
            audit,
        }
    }

    /// Execute one tool call end to end.  Never returns an error: every
    /// failure mode becomes result text the model can react to.
    pub async fn execute(
        &self,
        sink: &FrameSink,
        session_id: &str,
        tool_name: &str,
        params: &Value,
        write_enabled: bool,
    ) -> String {
        let Some((skill_id, action)) = tool_name.split_once(TOOL_NAME_SEPARATOR) else {
            return format!("Invalid tool name: {tool_name}");
        };

        if let Some(description) = self.confirmation_reason(tool_name, skill_id, params) {
            if !self
                .await_confirmation(sink, session_id, skill_id, action, &description, params)
                .await
            {
                return CANCELLED.to_string();
            }
        }

        send_frame(
            sink,
            ServerFrame::SkillStart {
                skill_name: skill_id.to_string(),
                action: action.to_string(),
                params: params.clone(),
            },
        );

        let Some(executor) = self.executors.get(skill_id) else {
            let output = format!("Skill not found: {skill_id}");
            self.finish(sink, session_id, skill_id, action, false, &output, None)
                .await;
            return output;
        };

        let started = Instant::now();
        let (success, output) = match executor.execute(action, params, write_enabled).await {
            Ok(output) => (!output_indicates_failure(&output), output),
            Err(e) => (false, format!("Skill execution error: {e}")),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        self.finish(
            sink,
            session_id,
            skill_id,
            action,
            success,
            &output,
            Some(duration_ms),
        )
        .await;
        output
    }

    /// Answer a `confirm` frame.  Unknown or already-resolved ids are
    /// ignored; the waiter may have timed out in the meantime.
    pub async fn resolve_confirmation(&self, confirm_id: &str, confirmed: bool) {
        let sender = self.pending.lock().await.remove(confirm_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(confirmed);
            }
            None => debug!(confirm_id, "confirmation for unknown or expired id"),
        }
    }

    /// Number of confirmations still waiting on an answer.
    pub async fn pending_confirmations(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Why this call needs user approval, or None when it can run directly.
    fn confirmation_reason(
        &self,
        tool_name: &str,
        skill_id: &str,
        params: &Value,
    ) -> Option<String> {
        if self.catalog.confirmation_required(tool_name) {
            let description = match (
                params["action"].as_str(),
                params["container_name"].as_str(),
            ) {
                (Some(action), Some(name)) => {
                    format!("This will {action} container '{name}'")
                }
                _ => "This action requires confirmation".to_string(),
            };
            return Some(description);
        }
        // Shell commands are confirmed per-command, not per-action.
        if skill_id == "bash-execution" {
            if let Some(command) = params["command"].as_str() {
                return safety::requires_confirmation(command);
            }
        }
        None
    }

    /// Run the handshake.  Returns true only on an explicit approval;
    /// denial and timeout both refuse the action.
    async fn await_confirmation(
        &self,
        sink: &FrameSink,
        session_id: &str,
        skill_id: &str,
        action: &str,
        description: &str,
        params: &Value,
    ) -> bool {
        let confirm_id = frame_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(confirm_id.clone(), tx);

        send_frame(
            sink,
            ServerFrame::ConfirmRequired {
                confirm_id: confirm_id.clone(),
                skill_name: skill_id.to_string(),
                action: action.to_string(),
                description: description.to_string(),
                params: params.clone(),
            },
        );

        let answer = timeout(self.confirmation_timeout, rx).await;
        // The sender is gone on both timeout and resolution; only the
        // timeout path still holds a map entry.
        self.pending.lock().await.remove(&confirm_id);

        let (confirmed, output) = match answer {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) | Ok(Err(_)) => (false, Some(CANCELLED.to_string())),
            Err(_) => {
                warn!(confirm_id, skill_id, action, "confirmation timed out");
                (
                    false,
                    Some(format!(
                        "Confirmation timed out ({}s)",
                        self.confirmation_timeout.as_secs()
                    )),
                )
            }
        };

        self.audit
            .log(
                AuditCategory::Confirmation,
                format!("{skill_id}{TOOL_NAME_SEPARATOR}{action}"),
                if confirmed {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Denied
                },
                Some(session_id.to_string()),
                Some(json!({"description": description})),
                None,
            )
            .await;

        if let Some(output) = output {
            send_frame(
                sink,
                ServerFrame::SkillResult {
                    skill_name: skill_id.to_string(),
                    action: action.to_string(),
                    success: false,
                    output,
                    duration_ms: None,
                },
            );
        }
        confirmed
    }

    async fn finish(
        &self,
        sink: &FrameSink,
        session_id: &str,
        skill_id: &str,
        action: &str,
        success: bool,
        output: &str,
        duration_ms: Option<u64>,
    ) {
        let preview: String = output.chars().take(RESULT_PREVIEW_CHARS).collect();
        send_frame(
            sink,
            ServerFrame::SkillResult {
                skill_name: skill_id.to_string(),
                action: action.to_string(),
                success,
                output: preview,
                duration_ms,
            },
        );

        self.audit
            .log(
                AuditCategory::SkillExecution,
                format!("{skill_id}{TOOL_NAME_SEPARATOR}{action}"),
                if success {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                },
                Some(session_id.to_string()),
                None,
                duration_ms,
            )
            .await;
    }
}
