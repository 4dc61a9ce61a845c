use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::conversation::manager::{LlmProvider, TokenStream};
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChoiceChunk>,
    #[serde(default)]
    pub error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceChunk {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

/// One decoded `data:` line of the completion stream
#[derive(Debug, PartialEq, Eq)]
enum SseData {
    Token(String),
    Done,
    Skip,
}

/// Reassembles SSE lines across network chunk boundaries
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string(),
            );
        }
        lines
    }

    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

fn parse_sse_line(line: &str) -> Result<SseData> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseData::Skip);
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return Ok(SseData::Done);
    }
    if payload.is_empty() {
        return Ok(SseData::Skip);
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparseable stream line: {}", e);
            return Ok(SseData::Skip);
        }
    };

    if let Some(error) = chunk.error {
        return Err(anyhow!("LLM stream error: {}", error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseData::Token)
        .unwrap_or(SseData::Skip))
}

/// OpenAI-compatible chat completion client
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    /// No whole-request timeout: a long generation is bounded only by the
    /// idle gap between reads
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "LLM client: {} (model: {}, remote threads: {})",
            config.base_url, config.model, config.remote_threads
        );

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    /// Generate completion with streaming
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        debug!("Starting chat stream with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream: true,
        };

        let response = self
            .authorized(self.client.post(self.endpoint("/v1/chat/completions")))
            .json(&request)
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error: {} - {}", status, body));
        }

        let mut bytes = response.bytes_stream();

        let parsed = async_stream::stream! {
            let mut buffer = SseLineBuffer::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {}", e));
                        return;
                    }
                };

                for line in buffer.push(&chunk) {
                    match parse_sse_line(&line) {
                        Ok(SseData::Token(token)) => yield Ok(token),
                        Ok(SseData::Done) => return,
                        Ok(SseData::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(line) = buffer.finish() {
                match parse_sse_line(&line) {
                    Ok(SseData::Token(token)) => yield Ok(token),
                    Ok(_) => {}
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(parsed))
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        self.chat_stream(messages).await
    }

    async fn create_thread(&self) -> Result<String> {
        if !self.config.remote_threads {
            return Ok(format!("thread_{}", uuid::Uuid::new_v4().simple()));
        }

        let response = self
            .authorized(self.client.post(self.endpoint("/v1/threads")))
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to create provider thread")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Thread creation failed: {} - {}", status, body));
        }

        let thread: ThreadObject = response
            .json()
            .await
            .context("Failed to parse thread response")?;
        Ok(thread.id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        if !self.config.remote_threads {
            return Ok(());
        }

        let response = self
            .authorized(
                self.client
                    .delete(self.endpoint(&format!("/v1/threads/{}", thread_id))),
            )
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
            .send()
            .await
            .context("Failed to delete provider thread")?;

        if !response.status().is_success() {
            warn!("Provider refused thread deletion: {}", response.status());
            return Err(anyhow!("Thread deletion failed: {}", response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(remote_threads: bool) -> LlmConfig {
        LlmConfig {
            base_url: "http://localhost:9".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            timeout_seconds: 5,
            remote_threads,
        }
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = SseLineBuffer::default();

        assert!(buffer.push(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let lines = buffer.push(b"tent\":\"Hi\"}}]}\r\n\ndata: [DO");
        assert_eq!(
            lines,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}".to_string(),
                String::new()
            ]
        );
        assert_eq!(buffer.finish(), Some("data: [DO".to_string()));
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_split() {
        let mut buffer = SseLineBuffer::default();
        let text = "data: é\n".as_bytes();

        assert!(buffer.push(&text[..7]).is_empty());
        assert_eq!(buffer.push(&text[7..]), vec!["data: é".to_string()]);
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            SseData::Token("Hel".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseData::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseData::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseData::Skip
        );
        assert_eq!(parse_sse_line("data: not json").unwrap(), SseData::Skip);
        assert!(parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#).is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::user("Hi"), ChatMessage::system("sys")];
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 1.0,
            top_p: 1.0,
            stream: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][1]["role"], "system");
    }

    /// Serves one streamed completion, pausing `gap` before each fragment
    async fn slow_sse_server(fragments: Vec<&'static str>, gap: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            for fragment in fragments {
                tokio::time::sleep(gap).await;
                let line = format!(
                    "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
                    fragment
                );
                socket.write_all(line.as_bytes()).await.unwrap();
            }
            socket.write_all(b"data: [DONE]\n\n").await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_stream_longer_than_timeout_completes_while_tokens_flow() {
        let base_url = slow_sse_server(vec!["a", "b", "c", "d"], Duration::from_millis(400)).await;
        let mut config = config(false);
        config.base_url = base_url;
        config.timeout_seconds = 1;
        let service = LlmService::new(config).unwrap();

        let tokens: Vec<Result<String>> = service
            .chat_stream(&[ChatMessage::user("Hi")])
            .await
            .unwrap()
            .collect()
            .await;

        let text: String = tokens.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(text, "abcd");
    }

    #[tokio::test]
    async fn test_local_threads_need_no_provider() {
        let service = LlmService::new(config(false)).unwrap();

        let a = service.create_thread().await.unwrap();
        let b = service.create_thread().await.unwrap();

        assert!(a.starts_with("thread_"));
        assert_ne!(a, b);
        service.delete_thread(&a).await.unwrap();
    }
}
