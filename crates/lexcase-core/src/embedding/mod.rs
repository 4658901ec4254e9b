mod hash;
mod provider;

pub use hash::HashEmbeddingProvider;
pub use provider::EmbeddingProvider;

use std::future::Future;
use std::pin::Pin;

use rig::prelude::EmbeddingsClient;

use crate::config::{self, EmbeddingConfig};
use crate::error::{LexError, Result};
use crate::retry::RetryPolicy;

const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OPENAI_DIMENSIONS: usize = 1536;
const OLLAMA_DIMENSIONS: usize = 768;

type EmbedOne<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

/// Rig's `EmbeddingModel` is not dyn-compatible, so remote models are boxed
/// behind this single-text interface.
trait RemoteEmbedder: Send + Sync {
    fn embed_one<'a>(&'a self, text: &'a str) -> EmbedOne<'a>;

    fn model_name(&self) -> &str;
}

struct RigEmbedder<M> {
    model: M,
    name: String,
}

impl<M> RemoteEmbedder for RigEmbedder<M>
where
    M: rig::embeddings::EmbeddingModel + Send + Sync + 'static,
{
    fn embed_one<'a>(&'a self, text: &'a str) -> EmbedOne<'a> {
        Box::pin(async move {
            let mut embeddings = self
                .model
                .embed_texts(vec![text.to_string()])
                .await
                .map_err(|e| LexError::Embedding(format!("{} embedding failed: {e}", self.name)))?;
            if embeddings.is_empty() {
                return Err(LexError::Embedding("provider returned no embedding".into()));
            }
            // Rig works in f64; vectors are stored as f32.
            Ok(embeddings.swap_remove(0).vec.into_iter().map(|x| x as f32).collect())
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

enum Backend {
    Remote(Box<dyn RemoteEmbedder>),
    Hash(HashEmbeddingProvider),
}

/// Embedding service that dispatches to the configured provider.
pub struct EmbeddingService {
    backend: Backend,
    provider: &'static str,
    dimensions: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider)
            .field("model", &self.model_id())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl EmbeddingService {
    /// Build the provider named in `[embedding]`. Remote providers are only
    /// constructed here; no request is made until the first `embed`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.provider.as_str() {
            "openai" => Self::openai(config),
            "ollama" => Self::ollama(config),
            "hash" => Ok(Self::hash()),
            other => Err(LexError::Config(format!(
                "unknown embedding provider: '{other}' (expected 'openai', 'ollama', or 'hash')"
            ))),
        }
    }

    fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config::resolve_api_key(
            config.api_key.as_deref(),
            config.env_var.as_deref(),
            "OPENAI_API_KEY",
            "openai",
            "embedding",
        )?;

        let mut builder =
            rig::providers::openai::Client::<reqwest::Client>::builder().api_key(&api_key);
        if let Some(base_url) = config.base_url.as_deref() {
            builder = builder.base_url(base_url);
        }
        let client = builder
            .build()
            .map_err(|e| LexError::Config(format!("failed to build OpenAI embedding client: {e}")))?;

        let dimensions = config.dimensions.unwrap_or(OPENAI_DIMENSIONS);
        let model = client.embedding_model_with_ndims(&config.model, dimensions);
        Ok(Self::remote(model, config, "openai", dimensions))
    }

    fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        let client = rig::providers::ollama::Client::<reqwest::Client>::builder()
            .api_key(rig::client::Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| LexError::Config(format!("failed to build Ollama embedding client: {e}")))?;

        let dimensions = config.dimensions.unwrap_or(OLLAMA_DIMENSIONS);
        let model = client.embedding_model_with_ndims(&config.model, dimensions);
        Ok(Self::remote(model, config, "ollama", dimensions))
    }

    fn remote<M>(model: M, config: &EmbeddingConfig, provider: &'static str, dimensions: usize) -> Self
    where
        M: rig::embeddings::EmbeddingModel + Send + Sync + 'static,
    {
        Self {
            backend: Backend::Remote(Box::new(RigEmbedder {
                model,
                name: config.model.clone(),
            })),
            provider,
            dimensions,
            retry: RetryPolicy::new(config.retries),
        }
    }

    /// Offline deterministic service, used by tests and `provider = "hash"`.
    pub fn hash() -> Self {
        let provider = HashEmbeddingProvider::new();
        Self {
            dimensions: provider.dimensions(),
            backend: Backend::Hash(provider),
            provider: "hash",
            retry: RetryPolicy::new(0),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider
    }
}

impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            Backend::Remote(model) => {
                self.retry
                    .run("embedding", || model.embed_one(text))
                    .await
            }
            Backend::Hash(p) => p.embed(text).await,
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        match &self.backend {
            Backend::Remote(model) => model.model_name(),
            Backend::Hash(p) => p.model_id(),
        }
    }
}
