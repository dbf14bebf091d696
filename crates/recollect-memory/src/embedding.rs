use crate::config::{EmbeddingBackend, EmbeddingConfig};
use async_trait::async_trait;
use recollect_core::{RecollectError, RecollectResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait for computing text embeddings (vector representations).
///
/// Every vector produced by one provider has length [`dimension`] and is
/// tagged with [`model_name`] when stored, so vectors from different models
/// are never ranked against each other.
///
/// [`dimension`]: EmbeddingProvider::dimension
/// [`model_name`]: EmbeddingProvider::model_name
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> RecollectResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts, aligned with the input.
    ///
    /// All or nothing: any failure fails the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> RecollectResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;

    /// Identifier of the model, stored next to every vector.
    fn model_name(&self) -> &str;
}

/// Build the provider selected in configuration.
pub fn build_provider(config: &EmbeddingConfig) -> RecollectResult<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingBackend::Local => {
            let dimension = config.dimension();
            if dimension == 0 {
                return Err(RecollectError::Config(
                    "embedding dimension must be greater than zero".to_string(),
                ));
            }
            Ok(Arc::new(LocalEmbedding::new(dimension)))
        }
        #[cfg(feature = "http-embeddings")]
        EmbeddingBackend::OpenAi => Ok(Arc::new(
            crate::embedding_http::OpenAiEmbedding::from_config(config)?,
        )),
        #[cfg(not(feature = "http-embeddings"))]
        EmbeddingBackend::OpenAi => Err(RecollectError::Config(
            "the openai backend requires the `http-embeddings` feature".to_string(),
        )),
        #[cfg(feature = "fastembed")]
        EmbeddingBackend::FastEmbed => Ok(Arc::new(
            crate::embedding_fastembed::FastEmbedProvider::from_config(config)?,
        )),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingBackend::FastEmbed => Err(RecollectError::Config(
            "the fastembed backend requires the `fastembed` feature".to_string(),
        )),
    }
}

/// Weight of an adjacent word pair relative to a single word.
const PAIR_WEIGHT: f32 = 0.5;

/// Local embedding from signed feature hashing (no external API or model
/// download needed).
///
/// Words and adjacent word pairs are hashed into a fixed number of slots.
/// The top hash bit picks the sign so collisions tend to cancel, and
/// repeated features grow logarithmically. Deterministic across runs and
/// platforms, so it also serves as the test backend.
pub struct LocalEmbedding {
    dimension: usize,
    model: String,
}

impl LocalEmbedding {
    /// Embedder producing `dimension`-long vectors, named `local-hash-<dimension>`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("local-hash-{dimension}"),
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> RecollectResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RecollectError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        if self.dimension == 0 {
            return Err(RecollectError::Validation(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
            .collect();

        let mut features: BTreeMap<u64, (u32, f32)> = BTreeMap::new();
        for token in &tokens {
            features.entry(fnv1a64(&[token.as_bytes()])).or_insert((0, 1.0)).0 += 1;
        }
        for pair in tokens.windows(2) {
            let hash = fnv1a64(&[pair[0].as_bytes(), pair[1].as_bytes()]);
            features.entry(hash).or_insert((0, PAIR_WEIGHT)).0 += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        let slots = self.dimension as u64;
        for (hash, (count, weight)) in features {
            let slot = (hash % slots) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * weight * (1.0 + (count as f32).ln());
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// 64-bit FNV-1a over `parts`, with a separator byte between parts so
/// `["ab", "c"]` and `["a", "bc"]` differ.
fn fnv1a64(parts: &[&[u8]]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hash ^= 0xff;
            hash = hash.wrapping_mul(PRIME);
        }
        for &byte in *part {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}
