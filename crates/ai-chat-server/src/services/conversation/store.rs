//! History store and thread registry on top of a key-value backend.
//!
//! The history store never fails towards its caller: an unreachable or
//! corrupted backend degrades to an empty history and unsaved writes, counted
//! in [`Metrics`].

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::metrics::Metrics;

use super::types::{History, ThreadKey};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Minimal key-value contract: `GET`, `SET [EX]`, `DEL`, `PING`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `ttl_seconds = None` stores without expiry
    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn KvBackend>,
    key_prefix: String,
    metrics: Metrics,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn KvBackend>, key_prefix: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            metrics,
        }
    }

    pub fn storage_key(&self, key: &ThreadKey) -> String {
        format!("{}:{}:{}", self.key_prefix, key.user_id, key.thread_id)
    }

    /// Returns the stored history, or an empty one if absent, expired or unreadable
    pub async fn fetch(&self, key: &ThreadKey) -> History {
        match self.try_fetch(key).await {
            Ok(history) => {
                debug!(thread = %key, turns = history.len(), "Fetched history");
                history
            }
            Err(e) => {
                warn!(thread = %key, error = %e, "History fetch failed, continuing with empty history");
                self.metrics.increment_store_fetch_failures();
                History::default()
            }
        }
    }

    async fn try_fetch(&self, key: &ThreadKey) -> Result<History, StoreError> {
        match self.backend.get(&self.storage_key(key)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(History::default()),
        }
    }

    /// Overwrites the stored history (last writer wins)
    pub async fn commit(&self, key: &ThreadKey, history: &History, ttl_seconds: u64) {
        if let Err(e) = self.try_commit(key, history, ttl_seconds).await {
            warn!(thread = %key, error = %e, "History commit failed, exchange continues unsaved");
            self.metrics.increment_store_commit_failures();
        } else {
            debug!(thread = %key, turns = history.len(), ttl_seconds, "Committed history");
        }
    }

    async fn try_commit(&self, key: &ThreadKey, history: &History, ttl_seconds: u64) -> Result<(), StoreError> {
        let raw = serde_json::to_string(history)?;
        self.backend
            .set(&self.storage_key(key), raw, Some(ttl_seconds))
            .await
    }

    pub async fn delete(&self, key: &ThreadKey) {
        if let Err(e) = self.backend.del(&self.storage_key(key)).await {
            warn!(thread = %key, error = %e, "History delete failed");
            self.metrics.increment_store_delete_failures();
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }
}

/// Per-user list of owned thread ids, oldest first
#[derive(Clone)]
pub struct ThreadRegistry {
    backend: Arc<dyn KvBackend>,
    key_prefix: String,
}

impl ThreadRegistry {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            key_prefix: "chat_threads".to_string(),
        }
    }

    fn storage_key(&self, user_id: &str) -> String {
        format!("{}:{}", self.key_prefix, user_id)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        match self.backend.get(&self.storage_key(user_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn contains(&self, user_id: &str, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self.list(user_id).await?.iter().any(|id| id == thread_id))
    }

    pub async fn add(&self, user_id: &str, thread_id: &str) -> Result<(), StoreError> {
        let mut threads = self.list(user_id).await?;
        if threads.iter().any(|id| id == thread_id) {
            return Ok(());
        }
        threads.push(thread_id.to_string());
        self.save(user_id, &threads).await
    }

    /// Returns false when the thread was not registered for this user
    pub async fn remove(&self, user_id: &str, thread_id: &str) -> Result<bool, StoreError> {
        let mut threads = self.list(user_id).await?;
        let before = threads.len();
        threads.retain(|id| id != thread_id);
        if threads.len() == before {
            return Ok(false);
        }
        self.save(user_id, &threads).await?;
        Ok(true)
    }

    async fn save(&self, user_id: &str, threads: &[String]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(threads)?;
        self.backend.set(&self.storage_key(user_id), raw, None).await
    }
}
