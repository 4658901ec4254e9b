use std::future::Future;

use crate::error::Result;

/// Text to fixed-length vector. Vectors from one provider share a length, so
/// documents embedded by another provider are skipped at ranking time.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    fn dimensions(&self) -> usize;

    /// Identifier used in logs.
    fn model_id(&self) -> &str;
}
