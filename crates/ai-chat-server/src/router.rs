use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

/// Room for the text fields and multipart framing on top of the files
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState, uploads_dir: &Path) -> Router {
    let uploads = &state.settings.uploads;
    let body_limit = uploads.max_files * uploads.max_file_bytes as usize + FORM_OVERHEAD_BYTES;
    let public_path = uploads.public_path.trim_end_matches('/').to_string();

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler));

    let chat_routes = Router::new()
        .route("/api/v2/chat", post(handlers::chat::chat_handler))
        .route(
            "/api/v2/chat/threads",
            post(handlers::threads::create_thread_handler),
        )
        .route(
            "/api/v2/chat/{thread_id}",
            get(handlers::threads::history_handler)
                .delete(handlers::threads::delete_thread_handler),
        )
        .nest_service(&public_path, ServeDir::new(uploads_dir));

    Router::new()
        .merge(public_routes)
        .merge(chat_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        HistoryBackendKind, HistoryConfig, LlmConfig, PromptsConfig, RedisConfig, ServerConfig,
        Settings, UploadsConfig,
    };
    use crate::models::chat::ChatMessage;
    use crate::services::attachment_storage::LocalFileStorage;
    use crate::services::conversation::{
        ConversationManager, HistoryStore, LlmProvider, ManagerConfig, MemoryBackend,
        RetentionPolicy, ThreadRegistry, TokenStream,
    };
    use crate::utils::metrics::Metrics;
    use anyhow::Result;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait::async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate_stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
            let tokens: Vec<Result<String>> = vec![Ok("Hello".into()), Ok(" there".into())];
            Ok(Box::pin(futures::stream::iter(tokens)))
        }

        async fn create_thread(&self) -> Result<String> {
            Ok("thread_abc".to_string())
        }

        async fn delete_thread(&self, _thread_id: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Two fragments, then the upstream connection drops
    struct BrokenProvider;

    #[async_trait::async_trait]
    impl LlmProvider for BrokenProvider {
        async fn generate_stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
            let tokens: Vec<Result<String>> = vec![
                Ok("Hel".into()),
                Ok("lo".into()),
                Err(anyhow::anyhow!("upstream reset")),
            ];
            Ok(Box::pin(futures::stream::iter(tokens)))
        }

        async fn create_thread(&self) -> Result<String> {
            Ok("thread_abc".to_string())
        }

        async fn delete_thread(&self, _thread_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn settings(uploads_dir: &Path) -> Settings {
        Settings {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".into(),
                pool_max_size: 1,
            },
            history: HistoryConfig {
                backend: HistoryBackendKind::Memory,
                key_prefix: "chat_history".into(),
                max_turns: 30,
                expiration_hours: 48,
                max_image_turns: 2,
            },
            llm: LlmConfig {
                base_url: "http://localhost:9".into(),
                api_key: None,
                model: "gpt-4o-mini".into(),
                temperature: 1.0,
                top_p: 1.0,
                timeout_seconds: 5,
                remote_threads: false,
            },
            uploads: UploadsConfig {
                dir: uploads_dir.display().to_string(),
                max_files: 5,
                max_file_bytes: 1024 * 1024,
                public_path: "/api/v2/uploads".into(),
            },
            prompts: PromptsConfig {
                system_prompt: "You are a tutor.".into(),
            },
        }
    }

    async fn app(uploads_dir: &Path) -> Router {
        app_with(uploads_dir, Arc::new(EchoProvider)).await
    }

    async fn app_with(uploads_dir: &Path, provider: Arc<dyn LlmProvider>) -> Router {
        let settings = settings(uploads_dir);
        let backend = Arc::new(MemoryBackend::new());
        let metrics = Metrics::new();
        let manager = ConversationManager::new(
            HistoryStore::new(backend.clone(), &settings.history.key_prefix, metrics.clone()),
            ThreadRegistry::new(backend),
            provider,
            Arc::new(LocalFileStorage::new(uploads_dir).await.unwrap()),
            ManagerConfig {
                retention: RetentionPolicy::from(&settings.history),
                ttl_seconds: settings.history.ttl_seconds(),
                system_prompt: settings.prompts.system_prompt.clone(),
                max_files: settings.uploads.max_files,
                max_file_bytes: settings.uploads.max_file_bytes,
            },
            metrics,
        );

        build_router(
            AppState {
                conversation_manager: Arc::new(manager),
                settings: Arc::new(settings),
            },
            uploads_dir,
        )
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn multipart_request(user: &str, fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    boundary, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    boundary, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/v2/chat")
            .header("x-user-id", user)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_user_header_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v2/chat/threads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("\"error\":\"Unauthorized\""));
    }

    #[tokio::test]
    async fn test_chat_streams_sse_and_history_shows_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let response = app
            .clone()
            .oneshot(multipart_request(
                "u1",
                &[("message", "Hi"), ("threadId", "t1")],
                Some(("notes.txt", &b"some notes"[..])),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sse = body_text(response).await;
        let hello = sse.find("Hello").unwrap();
        let there = sse.find("there").unwrap();
        let done = sse.find("[DONE]").unwrap();
        assert!(hello < there && there < done);
        assert!(!sse.contains("event: error"));

        // t1 was never registered for u1, so it reads as empty
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v2/chat/t1")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_thread_lifecycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v2/chat/threads")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(created["thread_id"], "thread_abc");

        // No threadId: the user's first thread is used
        let response = app
            .clone()
            .oneshot(multipart_request(
                "u1",
                &[("message", "Hi")],
                Some(("notes.txt", &b"abc"[..])),
            ))
            .await
            .unwrap();
        let _ = body_text(response).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v2/chat/thread_abc")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let history: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let messages = history["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["attachments"][0]["name"], "notes.txt");
        assert_eq!(messages[0]["attachments"][0]["type"], "file");
        let url = messages[0]["attachments"][0]["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/api/v2/uploads/"));
        assert_eq!(messages[1]["content"], "Hello there");

        let response = app
            .clone()
            .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "abc");

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri("/api/v2/chat/thread_abc")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_ends_with_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Arc::new(BrokenProvider)).await;

        let response = app
            .oneshot(multipart_request(
                "u1",
                &[("message", "Hi"), ("threadId", "t1")],
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sse = body_text(response).await;
        let hel = sse.find("Hel").unwrap();
        let lo = sse.rfind("lo\n").unwrap();
        let error = sse.find("event:").unwrap();
        assert!(sse[error..]
            .trim_start_matches("event:")
            .trim_start()
            .starts_with("error"));
        assert!(hel < lo && lo < error);
        assert!(sse[error..].contains("upstream reset"));
        assert!(!sse.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_empty_chat_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let response = app
            .oneshot(multipart_request("u1", &[("message", " "), ("threadId", "t1")], None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_readiness_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let metrics: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(metrics["exchanges_started"], 0);
    }
}
