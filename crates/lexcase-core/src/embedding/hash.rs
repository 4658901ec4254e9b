use super::provider::EmbeddingProvider;
use crate::error::Result;

const DIMENSIONS: usize = 128;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Offline embedding provider: signed feature hashing over lowercase word
/// tokens, L2-normalized.
///
/// Texts sharing words land near each other, which is enough to exercise
/// ingestion and ranking end to end without a model. No semantics beyond
/// word overlap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbeddingProvider;

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(FNV_OFFSET, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(FNV_PRIME)
        })
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; DIMENSIONS];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let h = Self::fnv1a(&token);
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vec[(h % DIMENSIONS as u64) as usize] += sign;
        }

        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|v| *v /= norm);
        }
        vec
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vectorize(text))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model_id(&self) -> &str {
        "hash-128d"
    }
}
