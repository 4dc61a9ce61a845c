/// manager.rs
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::chat::ChatMessage;
use crate::services::attachment_storage::AttachmentStorage;
use crate::utils::metrics::Metrics;

use super::prompt_assembler::PromptAssembler;
use super::relay::{RelayEvent, StreamRelay};
use super::retention::RetentionPolicy;
use super::store::{HistoryStore, StoreError, ThreadRegistry};
use super::types::{Attachment, AttachmentKind, History, ThreadKey, Turn};

/// Lazy, finite, non-restartable sequence of text fragments
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// Completion provider contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    async fn create_thread(&self) -> Result<String>;

    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Completion provider error: {0}")]
    Provider(String),

    #[error("Thread registry unavailable: {0}")]
    Storage(#[from] StoreError),

    #[error("Attachment error: {0}")]
    Attachment(String),
}

/// Upload received with a chat message, not yet stored
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl PendingUpload {
    fn resolved_mime(&self) -> String {
        match &self.mime_type {
            Some(mime) if !mime.is_empty() => mime.clone(),
            _ => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub retention: RetentionPolicy,
    pub ttl_seconds: u64,
    pub system_prompt: String,
    pub max_files: usize,
    pub max_file_bytes: u64,
}

pub struct ConversationManager {
    store: HistoryStore,
    threads: ThreadRegistry,
    assembler: PromptAssembler,
    relay: StreamRelay,
    llm_provider: Arc<dyn LlmProvider>,
    storage: Arc<dyn AttachmentStorage>,
    config: ManagerConfig,
    metrics: Metrics,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ConversationManager {
    pub fn new(
        store: HistoryStore,
        threads: ThreadRegistry,
        llm_provider: Arc<dyn LlmProvider>,
        storage: Arc<dyn AttachmentStorage>,
        config: ManagerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            threads,
            assembler: PromptAssembler::new(storage.clone(), metrics.clone()),
            relay: StreamRelay::new(metrics.clone()),
            llm_provider,
            storage,
            config,
            metrics,
        }
    }

    /// Runs one exchange: stores the user turn, then streams the reply.
    ///
    /// The user turn is committed before generation starts and stays committed
    /// whatever happens to the reply. The assistant turn is committed only once
    /// the provider stream ends cleanly.
    ///
    /// Two exchanges on the same thread race on fetch→commit and the later
    /// commit wins; there is no per-thread lock.
    pub async fn send_message(
        &self,
        user_id: &str,
        thread_id: Option<String>,
        content: String,
        uploads: Vec<PendingUpload>,
    ) -> Result<RelayStream, ChatError> {
        self.validate(&content, &uploads)?;

        let thread_id = self.resolve_thread(user_id, thread_id).await?;
        let key = ThreadKey::new(user_id, thread_id);
        self.metrics.increment_exchanges_started();

        info!(
            thread = %key,
            message_len = content.len(),
            uploads = uploads.len(),
            "Chat exchange started"
        );

        let now = now_ms();
        let history = self.load_history(&key, now).await;
        let attachments = self.store_uploads(uploads).await?;

        let user_turn = Turn::user(content, attachments, history.next_timestamp(now));
        let messages = self
            .assembler
            .assemble(history.turns(), &user_turn, &self.config.system_prompt)
            .await;

        let with_user = self.prune(&history.with_turn(user_turn), now);
        self.store
            .commit(&key, &with_user, self.config.ttl_seconds)
            .await;

        let tokens = match self.llm_provider.generate_stream(&messages).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(thread = %key, error = %e, "Completion provider refused the request");
                self.metrics.increment_exchanges_failed();
                return Err(ChatError::Provider(e.to_string()));
            }
        };

        let store = self.store.clone();
        let retention = self.config.retention;
        let ttl_seconds = self.config.ttl_seconds;
        let metrics = self.metrics.clone();

        let on_complete = move |reply: String| async move {
            let now = now_ms();
            let assistant_turn = Turn::assistant(reply, with_user.next_timestamp(now));
            let (final_history, report) =
                retention.prune_with_report(&with_user.with_turn(assistant_turn), now);
            metrics.add_images_redacted(report.redacted_images as u64);
            store.commit(&key, &final_history, ttl_seconds).await;
            info!(thread = %key, turns = final_history.len(), "Chat exchange committed");
        };

        Ok(Box::pin(self.relay.relay(tokens, on_complete)))
    }

    /// Pruned history of a thread; threads the user does not own read as empty
    pub async fn history(&self, user_id: &str, thread_id: &str) -> History {
        match self.threads.contains(user_id, thread_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(user_id, thread_id, "History requested for unknown thread");
                return History::default();
            }
            Err(e) => {
                warn!(user_id, thread_id, error = %e, "Thread registry unavailable, reading history unchecked");
            }
        }

        self.load_history(&ThreadKey::new(user_id, thread_id), now_ms())
            .await
    }

    pub async fn create_thread(&self, user_id: &str) -> Result<String, ChatError> {
        let thread_id = self
            .llm_provider
            .create_thread()
            .await
            .map_err(|e| ChatError::Provider(e.to_string()))?;

        self.threads.add(user_id, &thread_id).await?;
        self.store
            .commit(
                &ThreadKey::new(user_id, thread_id.clone()),
                &History::default(),
                self.config.ttl_seconds,
            )
            .await;

        info!(user_id, thread_id = %thread_id, "Thread created");
        Ok(thread_id)
    }

    /// Local state goes first; the provider is told afterwards and may fail
    pub async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<(), ChatError> {
        if !self.threads.remove(user_id, thread_id).await? {
            return Err(ChatError::NotFound(format!("Thread not found: {}", thread_id)));
        }

        self.store
            .delete(&ThreadKey::new(user_id, thread_id))
            .await;

        if let Err(e) = self.llm_provider.delete_thread(thread_id).await {
            warn!(user_id, thread_id, error = %e, "Provider thread deletion failed, local state already removed");
        }

        info!(user_id, thread_id, "Thread deleted");
        Ok(())
    }

    pub async fn ping_store(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn validate(&self, content: &str, uploads: &[PendingUpload]) -> Result<(), ChatError> {
        if content.trim().is_empty() && uploads.is_empty() {
            return Err(ChatError::Validation(
                "Message content or files are required".to_string(),
            ));
        }

        if uploads.len() > self.config.max_files {
            return Err(ChatError::Validation(format!(
                "Too many files: {} (max: {})",
                uploads.len(),
                self.config.max_files
            )));
        }

        if let Some(upload) = uploads
            .iter()
            .find(|u| u.data.len() as u64 > self.config.max_file_bytes)
        {
            return Err(ChatError::Validation(format!(
                "File too large: {} ({} bytes, max: {})",
                upload.file_name,
                upload.data.len(),
                self.config.max_file_bytes
            )));
        }

        Ok(())
    }

    /// Explicit thread id, else the user's oldest thread.
    ///
    /// The registry lookup is the one store read on the chat path that fails
    /// the request: without it there is no thread to write to.
    async fn resolve_thread(&self, user_id: &str, thread_id: Option<String>) -> Result<String, ChatError> {
        if let Some(id) = thread_id.filter(|id| !id.trim().is_empty()) {
            return Ok(id);
        }

        let threads = match self.threads.list(user_id).await {
            Ok(threads) => threads,
            Err(e) => {
                warn!(user_id, error = %e, "Thread registry unavailable, cannot pick a default thread");
                self.metrics.increment_registry_failures();
                return Err(ChatError::Storage(e));
            }
        };

        threads.into_iter().next().ok_or_else(|| {
            ChatError::Validation("threadId is required: no thread exists for this user".to_string())
        })
    }

    async fn load_history(&self, key: &ThreadKey, now: i64) -> History {
        let stored = self.store.fetch(key).await;
        self.prune(&stored, now)
    }

    fn prune(&self, history: &History, now: i64) -> History {
        let (pruned, report) = self.config.retention.prune_with_report(history, now);
        if !report.is_noop() {
            debug!(?report, "Pruned history");
        }
        self.metrics
            .add_images_redacted(report.redacted_images as u64);
        pruned
    }

    async fn store_uploads(&self, uploads: Vec<PendingUpload>) -> Result<Vec<Attachment>, ChatError> {
        let mut attachments = Vec::with_capacity(uploads.len());

        for upload in uploads {
            let mime_type = upload.resolved_mime();
            let location_ref = self
                .storage
                .save(&upload.file_name, &upload.data)
                .await
                .map_err(|e| ChatError::Attachment(e.to_string()))?;

            attachments.push(Attachment {
                kind: AttachmentKind::from_mime(&mime_type),
                display_name: upload.file_name,
                location_ref,
                byte_size: upload.data.len() as u64,
                mime_type,
            });
        }

        Ok(attachments)
    }
}
