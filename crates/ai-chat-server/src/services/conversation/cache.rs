use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::store::{KvBackend, StoreError};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process key-value backend with per-key TTL.
/// Used when no redis is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    storage: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        info!("Initializing in-memory history backend with DashMap");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Removes expired keys, returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let start_len = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_expired());
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired keys", count);
        }

        count
    }

    /// Periodic sweep so keys nobody reads again still get freed
    pub fn spawn_janitor(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let backend = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                backend.cleanup_expired();
            }
        })
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(entry) = self.storage.get(key) else {
            return Ok(None);
        };

        // Lazy deletion
        if entry.is_expired() {
            drop(entry);
            self.storage.remove(key);
            debug!("Key {} expired, removed from cache", key);
            return Ok(None);
        }

        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> Result<(), StoreError> {
        let expires_at = ttl_seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.storage
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.storage.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
