//! Conversation memory and chat exchange orchestration
//!
//! Provides:
//! - Per-thread history in a key-value backend (Redis or in-process DashMap)
//! - Retention pruning by age, turn count and image budget
//! - Prompt assembly with inline images
//! - Token relay that commits the reply only after a clean finish

pub mod cache;
pub mod manager;
pub mod prompt_assembler;
pub mod redis_backend;
pub mod relay;
pub mod retention;
pub mod store;
pub mod types;

pub use cache::MemoryBackend;
pub use manager::{ChatError, ConversationManager, LlmProvider, ManagerConfig, PendingUpload, TokenStream};
pub use redis_backend::RedisBackend;
pub use relay::RelayEvent;
pub use retention::RetentionPolicy;
pub use store::{HistoryStore, KvBackend, StoreError, ThreadRegistry};
pub use types::{Attachment, AttachmentKind, History, Role, ThreadKey, Turn};
