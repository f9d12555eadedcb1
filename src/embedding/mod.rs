use crate::config::{Config, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or the HTTP client failed.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded or was inconsistent with the request.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Returned embedding dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the server.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    let http = Client::builder()
        .user_agent("docqa/embedding")
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;

    let client: Box<dyn EmbeddingClient + Send + Sync> = match config.embedding_provider {
        Provider::Ollama => Box::new(OllamaEmbeddingClient {
            http,
            base_url: config.ollama_url.clone(),
            model: config.embedding_model.clone(),
        }),
        Provider::OpenAI => Box::new(OpenAiEmbeddingClient {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            model: config.embedding_model.clone(),
        }),
    };
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        "Embedding client initialized"
    );
    Ok(client)
}

/// Embeds text through Ollama's batch `/api/embed` endpoint.
pub(crate) struct OllamaEmbeddingClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) model: String,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        let expected = texts.len();
        let endpoint = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;
        ensure_count(expected, body.embeddings)
    }
}

/// Embeds text through an OpenAI-compatible `/embeddings` endpoint.
pub(crate) struct OpenAiEmbeddingClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        let expected = texts.len();
        let endpoint = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "OpenAI embeddings request failed");
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode OpenAI response: {error}"
            ))
        })?;
        // Entries carry an explicit index; order is not guaranteed.
        body.data.sort_by_key(|entry| entry.index);
        ensure_count(
            expected,
            body.data.into_iter().map(|entry| entry.embedding).collect(),
        )
    }
}

fn ensure_count(
    expected: usize,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if embeddings.len() != expected {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

/// Embed `texts` in batches of `batch_size`, checking every vector against `dimension`.
pub async fn embed_in_batches(
    client: &(dyn EmbeddingClient + Send + Sync),
    texts: &[String],
    batch_size: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embeddings = client.generate_embeddings(batch.to_vec()).await?;
        for vector in &embeddings {
            if vector.len() != dimension {
                return Err(EmbeddingClientError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }
        vectors.extend(embeddings);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn http() -> Client {
        Client::builder()
            .user_agent("docqa-test")
            .build()
            .expect("client")
    }

    #[tokio::test]
    async fn ollama_client_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body_partial(r#"{"model":"nomic-embed-text"}"#);
                then.status(200).json_body(json!({
                    "model": "nomic-embed-text",
                    "embeddings": [[0.1, 0.2], [0.3, 0.4]]
                }));
            })
            .await;

        let client = OllamaEmbeddingClient {
            http: http(),
            base_url: server.base_url(),
            model: "nomic-embed-text".into(),
        };
        let vectors = client
            .generate_embeddings(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn ollama_client_rejects_short_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1]] }));
            })
            .await;

        let client = OllamaEmbeddingClient {
            http: http(),
            base_url: server.base_url(),
            model: "nomic-embed-text".into(),
        };
        let error = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect_err("count mismatch");
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn openai_client_sorts_by_index_and_sends_bearer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "object": "list",
                    "data": [
                        { "object": "embedding", "index": 1, "embedding": [0.9] },
                        { "object": "embedding", "index": 0, "embedding": [0.1] }
                    ]
                }));
            })
            .await;

        let client = OpenAiEmbeddingClient {
            http: http(),
            base_url: server.base_url(),
            api_key: "sk-test".into(),
            model: "text-embedding-3-small".into(),
        };
        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1], vec![0.9]]);
    }

    #[tokio::test]
    async fn openai_client_surfaces_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("slow down");
            })
            .await;

        let client = OpenAiEmbeddingClient {
            http: http(),
            base_url: server.base_url(),
            api_key: "sk-test".into(),
            model: "text-embedding-3-small".into(),
        };
        let error = client
            .generate_embeddings(vec!["a".into()])
            .await
            .expect_err("error status");
        assert!(
            matches!(error, EmbeddingClientError::GenerationFailed(ref message) if message.contains("429"))
        );
    }

    struct FixedClient {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FixedClient {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }
    }

    #[tokio::test]
    async fn batches_cover_every_text() {
        let client = FixedClient { dimension: 3 };
        let texts: Vec<String> = (0..7).map(|i| format!("chunk {i}")).collect();
        let vectors = embed_in_batches(&client, &texts, 3, 3)
            .await
            .expect("vectors");
        assert_eq!(vectors.len(), 7);
    }

    #[tokio::test]
    async fn batches_reject_wrong_dimension() {
        let client = FixedClient { dimension: 2 };
        let error = embed_in_batches(&client, &["x".to_string()], 8, 4)
            .await
            .expect_err("dimension mismatch");
        assert!(matches!(
            error,
            EmbeddingClientError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }
}
