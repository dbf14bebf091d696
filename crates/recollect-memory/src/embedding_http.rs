use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use async_trait::async_trait;
use recollect_core::{RecollectError, RecollectResult};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible `/v1/embeddings` backend.
///
/// Works with OpenAI and any server that speaks the same embeddings API
/// (vLLM, Ollama, LiteLLM, ...).
pub struct OpenAiEmbedding {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    /// Sent as `dimensions` when the configured size was set explicitly.
    requested_dimension: Option<usize>,
}

impl OpenAiEmbedding {
    /// Build a client from the `[embedding]` section. Fails with
    /// [`RecollectError::Config`] when no API key can be found.
    pub fn from_config(config: &EmbeddingConfig) -> RecollectResult<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            RecollectError::Config(format!(
                "no API key for the openai embedding backend (set embedding.api_key or {})",
                config.api_key_env
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RecollectError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            api_key,
            model: config.model(),
            dimension: config.dimension(),
            requested_dimension: config.dimension,
        })
    }

    async fn request(&self, input: &[String]) -> RecollectResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        if let Some(dimensions) = self.requested_dimension {
            body["dimensions"] = serde_json::json!(dimensions);
        }

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RecollectError::Backend(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RecollectError::Backend(e.to_string()))?;

        if !status.is_success() {
            return Err(RecollectError::Backend(format!(
                "embeddings API error {status}: {resp_body}"
            )));
        }

        let vectors = parse_embeddings_response(&resp_body, input.len())?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RecollectError::Backend(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                bad.len(),
                self.dimension
            )));
        }
        debug!(model = %self.model, count = vectors.len(), "embedded batch");
        Ok(vectors)
    }
}

/// Pull the vectors out of an embeddings response, in input order.
///
/// Every input position must be answered exactly once.
fn parse_embeddings_response(
    body: &serde_json::Value,
    expected: usize,
) -> RecollectResult<Vec<Vec<f32>>> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| RecollectError::Backend("no data in embeddings response".to_string()))?;

    if data.len() != expected {
        return Err(RecollectError::Backend(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }

    let mut seen = vec![false; expected];
    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"]
            .as_u64()
            .map_or(Some(position), |i| usize::try_from(i).ok())
            .filter(|i| *i < expected)
            .ok_or_else(|| {
                RecollectError::Backend(format!(
                    "embedding index {} out of range for {expected} inputs",
                    item["index"]
                ))
            })?;
        if std::mem::replace(&mut seen[index], true) {
            return Err(RecollectError::Backend(format!(
                "embedding index {index} returned twice"
            )));
        }
        let vector = item["embedding"]
            .as_array()
            .ok_or_else(|| RecollectError::Backend("embedding item has no vector".to_string()))?
            .iter()
            .map(|x| {
                x.as_f64().map(|f| f as f32).ok_or_else(|| {
                    RecollectError::Backend("non-numeric embedding component".to_string())
                })
            })
            .collect::<RecollectResult<Vec<f32>>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> RecollectResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RecollectError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RecollectError::Backend("empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> RecollectResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RecollectError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackend;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    /// Matches request bodies without a `dimensions` field.
    struct NoDimensions;

    impl Match for NoDimensions {
        fn matches(&self, request: &Request) -> bool {
            serde_json::from_slice::<serde_json::Value>(&request.body)
                .map(|body| body.get("dimensions").is_none())
                .unwrap_or(false)
        }
    }

    fn two_vectors(first: u64, second: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"index": first, "embedding": [1.0, 0.0]},
                {"index": second, "embedding": [0.0, 1.0]}
            ]
        }))
    }

    fn config(server: &MockServer, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingBackend::OpenAi,
            model: Some("test-embed".to_string()),
            dimension: Some(dimension),
            api_key: Some("sk-test".to_string()),
            api_base_url: Some(server.uri()),
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_batch_reorders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        let vectors = provider
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(provider.model_name(), "test-embed");
    }

    #[tokio::test]
    async fn test_single_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.25, 0.125]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 3)).unwrap();
        assert_eq!(provider.embed("hello").await.unwrap(), vec![0.5, 0.25, 0.125]);
    }

    #[tokio::test]
    async fn test_http_error_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"error": {"message": "rate limited"}})),
            )
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, RecollectError::Backend(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_count_mismatch_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        let err = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RecollectError::Backend(_)));
    }

    #[tokio::test]
    async fn test_configured_dimension_is_requested() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "test-embed", "dimensions": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.6, 0.8]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        assert_eq!(provider.embed("hello").await.unwrap(), vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn test_default_dimension_is_not_requested() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(NoDimensions)
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": vec![0.0; 1536]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            model: None,
            dimension: None,
            ..config(&server, 2)
        };
        let provider = OpenAiEmbedding::from_config(&config).unwrap();
        assert_eq!(provider.embed("hello").await.unwrap().len(), 1536);
    }

    #[tokio::test]
    async fn test_duplicate_index_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(two_vectors(0, 0))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        let err = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RecollectError::Backend(ref msg) if msg.contains("twice")));
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(two_vectors(0, 2))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        let err = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RecollectError::Backend(ref msg) if msg.contains("out of range")));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        assert!(matches!(
            provider.embed("hello").await,
            Err(RecollectError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::from_config(&config(&server, 2)).unwrap();
        assert!(matches!(
            provider.embed(" ").await,
            Err(RecollectError::Validation(_))
        ));
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = EmbeddingConfig {
            provider: EmbeddingBackend::OpenAi,
            api_key: None,
            api_key_env: "RECOLLECT_TEST_DEFINITELY_UNSET".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            OpenAiEmbedding::from_config(&config),
            Err(RecollectError::Config(_))
        ));
    }
}
