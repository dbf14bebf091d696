use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use recollect_core::{RecollectError, RecollectResult};
use std::sync::Arc;
use tracing::info;

/// Sentence encoders known to this backend: config name, model, dimension.
const MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
];

/// Local ONNX sentence encoder. The model is downloaded on first use and
/// cached by fastembed.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load the configured model, downloading it if needed. The configured
    /// dimension, when set, must match the model's.
    pub fn from_config(config: &EmbeddingConfig) -> RecollectResult<Self> {
        let name = config.model();
        let (model_id, dimension) = MODELS
            .iter()
            .find(|(known, _, _)| known.eq_ignore_ascii_case(&name))
            .map(|(_, model, dim)| (model.clone(), *dim))
            .ok_or_else(|| {
                RecollectError::Config(format!("unsupported fastembed model: {name}"))
            })?;

        if let Some(configured) = config.dimension {
            if configured != dimension {
                return Err(RecollectError::Config(format!(
                    "model {name} produces {dimension} dimensions, config says {configured}"
                )));
            }
        }

        info!(model = %name, "loading fastembed model");
        let model = TextEmbedding::try_new(InitOptions::new(model_id))
            .map_err(|e| RecollectError::Backend(e.to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            name,
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> RecollectResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RecollectError::Backend("fastembed returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> RecollectResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RecollectError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Inference is CPU bound; keep it off the async workers.
        let model = Arc::clone(&self.model);
        let input = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || model.lock().embed(input, None))
            .await
            .map_err(|e| RecollectError::Backend(e.to_string()))?
            .map_err(|e| RecollectError::Backend(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(RecollectError::Backend(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RecollectError::Backend(format!(
                "fastembed returned {} dimensions, expected {}",
                bad.len(),
                self.dimension
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
