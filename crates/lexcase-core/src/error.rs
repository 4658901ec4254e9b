use thiserror::Error;

/// Everything that can go wrong in Lexcase. The web layer maps `NotFound`
/// and `InvalidInput` to client errors and everything else to 500.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedding provider failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The chat-completion provider failed.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A similarity query could not be embedded.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Status codes worth another attempt.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Transport failures that usually clear up on their own.
const RETRYABLE_PHRASES: [&str; 6] = [
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "broken pipe",
    "temporarily unavailable",
];

impl LexError {
    /// Whether a retry might succeed: rate limits, 5xx responses, timeouts
    /// and dropped connections. Local errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e
                        .status()
                        .is_some_and(|s| RETRYABLE_STATUS.contains(&s.as_u16()))
            }
            Self::Embedding(msg) | Self::Llm(msg) => mentions_retryable(msg),
            _ => false,
        }
    }

    /// Whether this error came from an external model provider.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Embedding(_) | Self::Llm(_) | Self::Retrieval(_)
        )
    }
}

/// Provider errors arrive as text, so classify by the status code or phrase
/// they mention.
fn mentions_retryable(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    RETRYABLE_STATUS
        .iter()
        .any(|code| msg.contains(&code.to_string()))
        || RETRYABLE_PHRASES.iter().any(|p| msg.contains(p))
}

pub type Result<T> = std::result::Result<T, LexError>;
