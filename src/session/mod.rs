//! Session management
//!
//! A session is one conversation: an ordered transcript plus ownership and
//! timestamps.  Sessions expire after a TTL that is refreshed on every read
//! and write.  The file-backed store persists each session as pretty JSON;
//! the in-memory store exists for tests and ephemeral deployments.

use crate::provider::{ChatMessage, Role};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A chat session with the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only transcript; messages are never mutated after append.
    pub messages: Vec<ChatMessage>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            title: None,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Append a message and bump the updated timestamp.
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Derive a title from the first user message when none is set.
    pub fn auto_title(&mut self) {
        if self.title.is_some() {
            return;
        }
        if let Some(first) = self
            .messages
            .iter()
            .find(|m| m.role == Role::User && !m.content.is_empty())
        {
            let content: String = first.content.chars().take(60).collect();
            let suffix = if first.content.chars().count() > 60 {
                "..."
            } else {
                ""
            };
            self.title = Some(format!("{content}{suffix}"));
        }
    }
}

/// Listing entry for the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id.clone(),
            title: s.title.clone().unwrap_or_else(|| "New Session".to_string()),
            created_at: s.created_at,
            updated_at: s.updated_at,
            message_count: s.messages.len(),
        }
    }
}

/// Keyed session persistence with TTL semantics.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, refreshing its TTL.  Expired sessions are gone.
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    /// Persist a session, refreshing its TTL.
    async fn put(&self, session: &Session) -> Result<()>;
    async fn list(&self, user_id: &str) -> Result<Vec<SessionSummary>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// One JSON file per session under a data directory.  Expiry is tracked via
/// file modification time; a read rewrites the file to refresh it.
pub struct FileSessionStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn is_expired(&self, path: &PathBuf) -> bool {
        match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > self.ttl)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        if self.is_expired(&path).await {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read session {id}"))?;
        let session: Session = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session {id}"))?;
        // Rewrite to refresh the TTL clock.
        fs::write(&path, &content).await?;
        Ok(Some(session))
    }

    async fn put(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(session)?;
        fs::write(self.session_path(&session.id), content)
            .await
            .with_context(|| format!("Failed to save session {}", session.id))?;
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if self.is_expired(&entry.path()).await {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()).await else {
                continue;
            };
            if let Ok(session) = serde_json::from_str::<Session>(&content) {
                if session.user_id == user_id {
                    summaries.push(SessionSummary::from(&session));
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

/// In-memory store with the same TTL semantics.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, (Session, std::time::Instant)>>,
    ttl: Option<Duration>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let mut lock = self.sessions.write().await;
        match lock.get_mut(id) {
            Some((session, stored_at)) => {
                if let Some(ttl) = self.ttl {
                    if stored_at.elapsed() > ttl {
                        lock.remove(id);
                        return Ok(None);
                    }
                }
                *stored_at = std::time::Instant::now();
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<()> {
        self.sessions.write().await.insert(
            session.id.clone(),
            (session.clone(), std::time::Instant::now()),
        );
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let lock = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = lock
            .values()
            .filter(|(s, _)| s.user_id == user_id)
            .map(|(s, _)| SessionSummary::from(s))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_title_truncates_long_first_message() {
        let mut session = Session::new("user-1", "default");
        session.add_message(ChatMessage::user("a".repeat(80)));
        session.auto_title();
        let title = session.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 63);

        let mut short = Session::new("user-1", "default");
        short.add_message(ChatMessage::user("list containers"));
        short.auto_title();
        assert_eq!(short.title.as_deref(), Some("list containers"));
    }

    #[tokio::test]
    async fn file_store_round_trips_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf(), Duration::from_secs(60));

        let mut session = Session::new("user-1", "default");
        session.add_message(ChatMessage::user("hello"));
        store.put(&session).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.user_id, "user-1");

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_lists_only_owned_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf(), Duration::from_secs(60));

        let mine = Session::new("user-1", "default");
        let theirs = Session::new("user-2", "default");
        store.put(&mine).await.unwrap();
        store.put(&theirs).await.unwrap();

        let listed = store.list("user-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
    }

    #[tokio::test]
    async fn memory_store_expires_sessions() {
        let store = MemorySessionStore::with_ttl(Duration::from_millis(10));
        let session = Session::new("user-1", "default");
        store.put(&session).await.unwrap();
        assert!(store.get(&session.id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get(&session.id).await.unwrap().is_none());
    }
}
