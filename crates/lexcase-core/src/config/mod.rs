use crate::error::{LexError, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexcaseConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom path for the SQLite database. Defaults to `<data_dir>/lexcase/lexcase.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageConfig {
    /// Resolve the database path, falling back to the platform data directory.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path {
            Some(ref p) if !p.is_empty() => PathBuf::from(p),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lexcase")
                .join("lexcase.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub env_var: Option<String>,
    /// Retries for transient provider failures. Zero keeps the single-shot behaviour.
    #[serde(default)]
    pub retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
            dimensions: None,
            env_var: None,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retries: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            env_var: None,
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            retries: 0,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Chat model used for document summaries. Shares provider and credentials with `[llm]`.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    /// Number of leading characters of extracted text sent to the summarizer.
    #[serde(default = "default_summary_char_limit")]
    pub summary_char_limit: usize,
    /// Directory where raw uploads are written. Unset keeps only the extracted text.
    #[serde(default)]
    pub upload_dir: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            summary_model: default_summary_model(),
            summary_char_limit: default_summary_char_limit(),
            upload_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum transcript length, opening user turn included.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Maximum tool invocations a single role may make within one turn.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_limit")]
    pub default_limit: usize,
    #[serde(default = "default_case_limit")]
    pub case_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_retrieval_limit(),
            case_limit: default_case_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Header carrying the authenticated user id, set by the fronting auth proxy.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            host: default_web_host(),
            user_header: default_user_header(),
        }
    }
}

/// Valid embedding provider names.
pub const VALID_EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "hash"];

/// Valid LLM provider names.
pub const VALID_LLM_PROVIDERS: &[&str] = &["openai", "ollama", "anthropic"];

// -- Defaults --

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_max_tokens() -> usize {
    1024
}
fn default_llm_temperature() -> f32 {
    0.5
}
fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_summary_char_limit() -> usize {
    4000
}
fn default_max_rounds() -> usize {
    20
}
fn default_max_tool_calls() -> usize {
    5
}
fn default_retrieval_limit() -> usize {
    10
}
fn default_case_limit() -> usize {
    5
}
fn default_web_port() -> u16 {
    8040
}
fn default_web_host() -> String {
    "127.0.0.1".to_string()
}
fn default_user_header() -> String {
    "x-lexcase-user".to_string()
}

impl LexcaseConfig {
    /// Merge the TOML layers that exist, later ones winning:
    /// 1. `~/.config/lexcase/config.toml`
    /// 2. `<project>/.lexcase/config.toml`
    /// 3. `<project>/.lexcase/config.local.toml` (not committed)
    ///
    /// Missing layers are skipped and the result is passed through [`validate`](Self::validate).
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let builder = config_layers(project_dir)
            .into_iter()
            .filter(|path| path.exists())
            .fold(Config::builder(), |builder, path| {
                tracing::debug!(path = %path.display(), "loading config layer");
                builder.add_source(File::from(path).required(false))
            });

        let mut cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LexError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Defaults only (no files).
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            ingest: IngestConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            retrieval: RetrievalConfig::default(),
            web: WebConfig::default(),
        }
    }

    /// Validate config values, clamping out-of-range values and logging warnings.
    /// Lenient: fixes values rather than rejecting the config.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !VALID_EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            warnings.push(format!(
                "unknown embedding provider '{}', valid: {}",
                self.embedding.provider,
                VALID_EMBEDDING_PROVIDERS.join(", ")
            ));
        }

        if !VALID_LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            warnings.push(format!(
                "unknown LLM provider '{}', valid: {}",
                self.llm.provider,
                VALID_LLM_PROVIDERS.join(", ")
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            warnings.push(format!(
                "llm.temperature = {} out of range [0.0, 2.0], clamping",
                self.llm.temperature
            ));
            self.llm.temperature = self.llm.temperature.clamp(0.0, 2.0);
        }

        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens = 0, setting to 256".to_string());
            self.llm.max_tokens = 256;
        }

        // The opening user turn counts as a round; anything below 2 leaves no agent a turn.
        if self.orchestrator.max_rounds < 2 {
            warnings.push(format!(
                "orchestrator.max_rounds = {}, setting to 2",
                self.orchestrator.max_rounds
            ));
            self.orchestrator.max_rounds = 2;
        }

        if self.ingest.summary_char_limit == 0 {
            warnings.push("ingest.summary_char_limit = 0, setting to 4000".to_string());
            self.ingest.summary_char_limit = default_summary_char_limit();
        }

        if self.retrieval.default_limit == 0 {
            warnings.push("retrieval.default_limit = 0, setting to 1".to_string());
            self.retrieval.default_limit = 1;
        }
        if self.retrieval.case_limit == 0 {
            warnings.push("retrieval.case_limit = 0, setting to 1".to_string());
            self.retrieval.case_limit = 1;
        }

        if self.web.user_header.trim().is_empty() {
            warnings.push("web.user_header is empty, using x-lexcase-user".to_string());
            self.web.user_header = default_user_header();
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }

    /// LLM settings for the document summarizer: same provider and credentials,
    /// different model.
    pub fn summary_llm(&self) -> LlmConfig {
        LlmConfig {
            model: self.ingest.summary_model.clone(),
            ..self.llm.clone()
        }
    }
}

fn config_layers(project_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut layers: Vec<PathBuf> = dirs::config_dir()
        .map(|p| p.join("lexcase").join("config.toml"))
        .into_iter()
        .collect();
    if let Some(dir) = project_dir {
        let local = dir.join(".lexcase");
        layers.push(local.join("config.toml"));
        layers.push(local.join("config.local.toml"));
    }
    layers
}

/// API key for a remote provider. A non-empty configured key wins over the
/// environment.
pub fn resolve_api_key(
    api_key: Option<&str>,
    env_var_override: Option<&str>,
    default_env_var: &str,
    provider_name: &str,
    service_kind: &str,
) -> Result<String> {
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        return Ok(key.to_owned());
    }
    let var = env_var_override.unwrap_or(default_env_var);
    std::env::var(var).map_err(|_| {
        LexError::Config(format!(
            "no API key for {service_kind} provider {provider_name}: \
             set {service_kind}.api_key or export {var}"
        ))
    })
}
