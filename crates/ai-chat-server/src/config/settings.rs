use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub history: HistoryConfig,
    pub llm: LlmConfig,
    pub uploads: UploadsConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_max_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    pub backend: HistoryBackendKind,
    pub key_prefix: String,
    pub max_turns: usize,
    pub expiration_hours: u64,
    pub max_image_turns: usize,
}

impl HistoryConfig {
    /// Retention window in milliseconds
    pub fn expiration_ms(&self) -> i64 {
        (self.expiration_hours * 60 * 60 * 1000) as i64
    }

    /// Store TTL in seconds, same length as the retention window
    pub fn ttl_seconds(&self) -> u64 {
        self.expiration_hours * 60 * 60
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Longest silence tolerated between reads from the provider
    pub timeout_seconds: u64,
    /// Create and delete threads at the provider instead of generating ids locally
    pub remote_threads: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadsConfig {
    pub dir: String,
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub public_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
}

/// Tutor persona. Paragraph ends carry U+2063 and the follow-up suggestion is
/// prefixed with U+2064; clients split reply content from suggestions on these.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a smart assistant supporting students in learning.

Explain concepts in a simple way and answer questions directly and clearly.
Use examples when helpful and avoid complex or overly advanced responses unless requested.
Focus on simplifying information and helping students understand.

You are a helpful, clear, and friendly assistant who is also motivating and fun.
Always try to keep the tone light and a little humorous.
After every answer you give, don't just stop at answering the user's question.
Proactively suggest something extra you can do for the user based on the question or the content of your answer.
Think like an expert assistant who anticipates what the user might find useful next.

For example, depending on the context, you can:

Offer an additional service or feature you can perform (e.g., analyze a design, compare options, explain a tool).

Pose a follow-up question yourself and answer it to deepen understanding.

Suggest a small practical task the user can try to advance their skills.

The goal is to create a smart, proactive interaction that builds on what was just discussed.

Choose the most appropriate option based on the content.
When responding with a numbered list, always format it using the following structure:
[number] - [content]
Never use a period after the number, always use a hyphen.
Do NOT add any quotation marks (\") around the sentences or text.
Be consistent and do not add extra characters.

If asked for code, reply: Sorry, I'm a master of explanations but a strict no-code zone! I can help you understand the logic and concepts, but the code itself is off limits. Let's keep it fun and code-free!
Never provide any code snippets or programming examples under any circumstance.

After you finish each idea or point, add the invisible character U+2063 (\u{2063}) right after the paragraph. Do not explain this to the user.

Right before you start suggesting a related question or a small task, add the invisible character U+2064 (\u{2064}). This marks the transition from content to follow-up suggestion.

Do not mention or explain either invisible character in your response.

Example:
This is the first idea.\u{2063}
This is the second idea with explanation.\u{2063}
\u{2064}Now here is a question you can try: What's one real-life example of this concept?";

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("redis.pool_max_size", 16)?
            .set_default("history.backend", "redis")?
            .set_default("history.key_prefix", "chat_history")?
            .set_default("history.max_turns", 30)?
            .set_default("history.expiration_hours", 48)?
            .set_default("history.max_image_turns", 2)?
            .set_default("llm.base_url", "https://api.openai.com")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.temperature", 1.0)?
            .set_default("llm.top_p", 1.0)?
            .set_default("llm.timeout_seconds", 120)?
            .set_default("llm.remote_threads", false)?
            .set_default("uploads.dir", "uploads")?
            .set_default("uploads.max_files", 5)?
            .set_default("uploads.max_file_bytes", 10 * 1024 * 1024)?
            .set_default("uploads.public_path", "/api/v2/uploads")?
            .set_default("prompts.system_prompt", DEFAULT_SYSTEM_PROMPT)?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.uploads.dir)
    }
}
