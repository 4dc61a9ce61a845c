pub mod attachment_storage;
pub mod conversation;
pub mod llm_service;

pub use attachment_storage::{AttachmentStorage, LocalFileStorage};
pub use llm_service::LlmService;
