//! Chat history seam.
//!
//! Accepted chat messages are appended here after they are broadcast.
//! A failing log never affects delivery.

use std::future::Future;

use tokio::sync::RwLock;
use yep_auth::StoreError;
use yep_protocol::{Level, UserId};

/// One accepted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub from: UserId,
    /// The raw text, without the identity prefix.
    pub content: String,
    pub level: Level,
    pub timestamp: i64,
}

/// Append-only message history.
pub trait MessageLog: Send + Sync + 'static {
    fn append(&self, record: ChatRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Up to `limit` records sent by `user`, newest first.
    fn history(
        &self,
        user: &UserId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChatRecord>, StoreError>> + Send;
}

/// History held in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryMessageLog {
    records: RwLock<Vec<ChatRecord>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl MessageLog for MemoryMessageLog {
    async fn append(&self, record: ChatRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn history(&self, user: &UserId, limit: usize) -> Result<Vec<ChatRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| &r.from == user)
            .take(limit)
            .cloned()
            .collect())
    }
}
