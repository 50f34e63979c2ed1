//! Optional context providers
//!
//! Semantic memory and knowledge-graph context are external collaborators
//! that may not be deployed.  They are wired in as optional trait objects
//! checked once at startup; absence degrades to empty results and a failing
//! provider never fails a turn.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Semantic memory recall and storage.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Recall memories relevant to a query.
    async fn recall(&self, query: &str, user_id: &str) -> Result<Vec<String>>;
    /// Store a user/assistant exchange.
    async fn store(&self, user_msg: &str, assistant_msg: &str, user_id: &str) -> Result<()>;
}

/// Knowledge-graph context lookup.
#[async_trait]
pub trait GraphProvider: Send + Sync {
    /// Return context lines relevant to the text.
    async fn query_context(&self, text: &str) -> Result<Vec<String>>;
}

/// Optional collaborators resolved once at startup.
#[derive(Clone, Default)]
pub struct ContextProviders {
    pub memory: Option<Arc<dyn MemoryProvider>>,
    pub graph: Option<Arc<dyn GraphProvider>>,
}

impl ContextProviders {
    pub fn none() -> Self {
        Self::default()
    }

    /// Recall memories; provider errors and absence both yield an empty list.
    pub async fn recall(&self, query: &str, user_id: &str) -> Vec<String> {
        match &self.memory {
            Some(provider) => match provider.recall(query, user_id).await {
                Ok(memories) => memories,
                Err(error) => {
                    tracing::warn!(%error, "memory recall failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    /// Store an exchange; failures are logged and swallowed.
    pub async fn store(&self, user_msg: &str, assistant_msg: &str, user_id: &str) {
        if let Some(provider) = &self.memory {
            if let Err(error) = provider.store(user_msg, assistant_msg, user_id).await {
                tracing::warn!(%error, "memory store failed");
            }
        }
    }

    /// Query graph context; provider errors and absence both yield nothing.
    pub async fn graph_context(&self, text: &str) -> Option<String> {
        let provider = self.graph.as_ref()?;
        match provider.query_context(text).await {
            Ok(lines) if !lines.is_empty() => Some(lines.join("\n")),
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(%error, "graph context query failed");
                None
            }
        }
    }
}
