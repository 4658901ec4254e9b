use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{self, LlmConfig};
use crate::error::{LexError, Result};
use crate::retry::RetryPolicy;

/// Speaker of a chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion model: ordered messages in, reply text out.
pub trait ChatModel: Send + Sync {
    fn chat(
        &self,
        messages: &[ChatMessage],
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Model identifier string for logging.
    fn model_id(&self) -> &str;
}

/// Chat-completion client for OpenAI-compatible, Ollama and Anthropic endpoints.
pub struct LlmService {
    provider: LlmProvider,
    config: LlmConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("provider", &self.provider)
            .field("model", &self.config.model)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LlmProvider {
    OpenAI,
    Ollama,
    Anthropic,
}

impl LlmService {
    /// Create an LLM service from configuration. Providers that need an API
    /// key fail here when none resolves.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = match config.provider.as_str() {
            "openai" => LlmProvider::OpenAI,
            "ollama" => LlmProvider::Ollama,
            "anthropic" => LlmProvider::Anthropic,
            other => {
                return Err(LexError::Config(format!(
                    "unknown LLM provider: '{other}' (expected 'openai', 'ollama', or 'anthropic')"
                )));
            }
        };

        let api_key = match provider {
            LlmProvider::OpenAI => Some(config::resolve_api_key(
                config.api_key.as_deref(),
                config.env_var.as_deref(),
                "OPENAI_API_KEY",
                "openai",
                "llm",
            )?),
            LlmProvider::Anthropic => Some(config::resolve_api_key(
                config.api_key.as_deref(),
                config.env_var.as_deref(),
                "ANTHROPIC_API_KEY",
                "anthropic",
                "llm",
            )?),
            LlmProvider::Ollama => None,
        };

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| LexError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            config: config.clone(),
            api_key,
            client,
        })
    }

    fn base_url(&self) -> &str {
        let default = match self.provider {
            LlmProvider::OpenAI => "https://api.openai.com",
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Anthropic => "https://api.anthropic.com",
        };
        self.config
            .base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.chat_openai(messages).await,
            LlmProvider::Ollama => self.chat_ollama(messages).await,
            LlmProvider::Anthropic => self.chat_anthropic(messages).await,
        }
    }

    /// Send `body` to `url` and return the parsed JSON, mapping transport
    /// failures and non-2xx responses to `LexError::Llm`.
    async fn post_json(
        &self,
        label: &str,
        request: reqwest::RequestBuilder,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| LexError::Llm(format!("{label} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LexError::Llm(format!("{label} error {status}: {text}")));
        }

        resp.json()
            .await
            .map_err(|e| LexError::Llm(format!("{label} response parse error: {e}")))
    }

    /// OpenAI-compatible: POST {base_url}/v1/chat/completions
    async fn chat_openai(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url());
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let json = self.post_json("OpenAI LLM", request, &body).await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LexError::Llm("OpenAI LLM response missing content".into()))
    }

    /// Ollama: POST {base_url}/api/chat
    async fn chat_ollama(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url());
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
            "options": {
                "num_predict": self.config.max_tokens,
                "temperature": self.config.temperature,
            }
        });

        let json = self
            .post_json("Ollama LLM", self.client.post(&url), &body)
            .await?;
        json["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LexError::Llm("Ollama LLM response missing message content".into()))
    }

    /// Anthropic: POST {base_url}/v1/messages. System messages are hoisted
    /// into the top-level `system` field.
    async fn chat_anthropic(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url());

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n\n"));
        }

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", "2023-06-01");

        let json = self.post_json("Anthropic LLM", request, &body).await?;
        // {"content": [{"type": "text", "text": "..."}]}
        json["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LexError::Llm("Anthropic LLM response missing text content".into()))
    }
}

impl ChatModel for LlmService {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        RetryPolicy::new(self.config.retries)
            .run("chat", || self.complete(messages))
            .await
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
