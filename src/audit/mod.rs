//! Gateway audit trail
//!
//! Skill executions, confirmations, safety blocks, and auth events are
//! recorded in a bounded in-memory ring buffer and optionally flushed to a
//! JSONL file.  Recording is best-effort everywhere: an audit failure never
//! blocks the user-facing path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// A skill action was dispatched to an executor.
    SkillExecution,
    /// Confirmation requested, approved, denied, or timed out.
    Confirmation,
    /// A command was rejected by the safety validator.
    SafetyBlock,
    /// Session lifecycle (create, resume, expire).
    Session,
    /// Connection authentication events.
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Human-readable action, e.g. "docker-management__manage_container".
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Thread-safe, append-only audit log.
#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
    max_entries: usize,
    sink_path: Option<PathBuf>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("max_entries", &self.max_entries)
            .field("sink_path", &self.sink_path)
            .finish()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, None)
    }
}

impl AuditLog {
    pub fn new(max_entries: usize, sink_path: Option<PathBuf>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(
                max_entries.min(DEFAULT_MAX_ENTRIES),
            ))),
            max_entries: max_entries.max(128),
            sink_path,
        }
    }

    pub fn from_env() -> Self {
        let max = std::env::var("OPSGATE_AUDIT_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_ENTRIES);

        let path = std::env::var("OPSGATE_AUDIT_LOG_PATH")
            .ok()
            .map(PathBuf::from);

        Self::new(max, path)
    }

    pub async fn record(&self, entry: AuditEntry) {
        // Persist to disk first (best effort).
        if let Some(ref path) = self.sink_path {
            if let Ok(line) = serde_json::to_string(&entry) {
                use tokio::io::AsyncWriteExt;
                if let Ok(mut file) = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                {
                    let _ = file.write_all(line.as_bytes()).await;
                    let _ = file.write_all(b"\n").await;
                }
            }
        }

        tracing::info!(
            audit_id = %entry.id,
            category = ?entry.category,
            action = %entry.action,
            outcome = ?entry.outcome,
            session = entry.session_id.as_deref().unwrap_or("-"),
            "audit"
        );

        let mut lock = self.entries.write().await;
        lock.push_back(entry);
        while lock.len() > self.max_entries {
            lock.pop_front();
        }
    }

    /// Convenience: record a simple action.
    pub async fn log(
        &self,
        category: AuditCategory,
        action: impl Into<String>,
        outcome: AuditOutcome,
        session_id: Option<String>,
        detail: Option<serde_json::Value>,
        duration_ms: Option<u64>,
    ) {
        self.record(AuditEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            category,
            action: action.into(),
            outcome,
            detail,
            duration_ms,
            session_id,
        })
        .await;
    }

    /// Return recent entries (newest first), up to `limit`.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let lock = self.entries.read().await;
        lock.iter().rev().take(limit).cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn by_category(&self, category: AuditCategory, limit: usize) -> Vec<AuditEntry> {
        let lock = self.entries.read().await;
        lock.iter()
            .rev()
            .filter(|e| e.category == category)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audit_log_records_and_retrieves() {
        let log = AuditLog::new(100, None);
        log.log(
            AuditCategory::SkillExecution,
            "system-status__cpu",
            AuditOutcome::Success,
            Some("sess-1".to_string()),
            None,
            Some(12),
        )
        .await;

        assert_eq!(log.count().await, 1);
        let entries = log.recent(10).await;
        assert_eq!(entries[0].action, "system-status__cpu");
        assert_eq!(entries[0].duration_ms, Some(12));
    }

    #[tokio::test]
    async fn audit_log_evicts_oldest() {
        let log = AuditLog::new(128, None);
        for i in 0..200 {
            log.log(
                AuditCategory::SkillExecution,
                format!("exec-{}", i),
                AuditOutcome::Success,
                None,
                None,
                None,
            )
            .await;
        }
        assert!(log.count().await <= 128);
    }

    #[tokio::test]
    async fn audit_log_filters_by_category() {
        let log = AuditLog::new(100, None);
        log.log(
            AuditCategory::SafetyBlock,
            "bash-execution__run_command",
            AuditOutcome::Denied,
            None,
            None,
            None,
        )
        .await;
        log.log(
            AuditCategory::Session,
            "create",
            AuditOutcome::Success,
            None,
            None,
            None,
        )
        .await;

        let blocks = log.by_category(AuditCategory::SafetyBlock, 10).await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].outcome, AuditOutcome::Denied);
    }
}
