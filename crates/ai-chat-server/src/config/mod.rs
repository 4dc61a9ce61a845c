pub mod settings;

pub use settings::{
    HistoryBackendKind, HistoryConfig, LlmConfig, PromptsConfig, RedisConfig, ServerConfig,
    Settings, UploadsConfig,
};
