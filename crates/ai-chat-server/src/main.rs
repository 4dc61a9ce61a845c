use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ai_chat_server::config::{HistoryBackendKind, Settings};
use ai_chat_server::router::build_router;
use ai_chat_server::services::conversation::{
    ConversationManager, HistoryStore, KvBackend, ManagerConfig, MemoryBackend, RedisBackend,
    RetentionPolicy, ThreadRegistry,
};
use ai_chat_server::services::{LlmService, LocalFileStorage};
use ai_chat_server::state::AppState;
use ai_chat_server::utils::{logger::init_logger, Metrics};

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    info!("🚀 Starting AI Chat Server...");

    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    let metrics = Metrics::new();

    let backend: Arc<dyn KvBackend> = match settings.history.backend {
        HistoryBackendKind::Redis => Arc::new(RedisBackend::new(&settings.redis)?),
        HistoryBackendKind::Memory => {
            let memory = MemoryBackend::new();
            memory.spawn_janitor(JANITOR_INTERVAL);
            Arc::new(memory)
        }
    };
    info!("✅ History backend: {:?}", settings.history.backend);

    let storage = Arc::new(LocalFileStorage::new(settings.uploads_dir()).await?);
    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);

    let conversation_manager = Arc::new(ConversationManager::new(
        HistoryStore::new(backend.clone(), &settings.history.key_prefix, metrics.clone()),
        ThreadRegistry::new(backend),
        llm_service,
        storage.clone(),
        ManagerConfig {
            retention: RetentionPolicy::from(&settings.history),
            ttl_seconds: settings.history.ttl_seconds(),
            system_prompt: settings.prompts.system_prompt.clone(),
            max_files: settings.uploads.max_files,
            max_file_bytes: settings.uploads.max_file_bytes,
        },
        metrics,
    ));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState {
        conversation_manager,
        settings: Arc::new(settings),
    };
    let app = build_router(state, storage.root());

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
