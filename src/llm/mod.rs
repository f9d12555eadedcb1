//! Answer generation through hosted or local completion providers.
//!
//! The Ollama client posts to `/api/generate` with streaming disabled; the OpenAI client posts to
//! an OpenAI-compatible `/chat/completions`. Both receive the same prompt built by [`prompt`].

pub mod prompt;

use crate::config::{Config, Provider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// Provider was unreachable or the HTTP client could not be built.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Question plus the retrieved context it should be answered from.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    /// Natural-language question supplied by the caller.
    pub question: String,
    /// Retrieved chunk texts, most relevant first.
    pub context: Vec<String>,
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait AnswerClient: Send + Sync {
    /// Produce an answer for the question grounded in the supplied context.
    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, LlmClientError>;
}

/// Build a completion client based on configuration.
pub fn get_answer_client(
    config: &Config,
) -> Result<Box<dyn AnswerClient + Send + Sync>, LlmClientError> {
    let http = Client::builder()
        .user_agent("docqa/answer")
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|error| LlmClientError::ProviderUnavailable(error.to_string()))?;

    let client: Box<dyn AnswerClient + Send + Sync> = match config.llm_provider {
        Provider::Ollama => Box::new(OllamaAnswerClient {
            http,
            base_url: config.ollama_url.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
        }),
        Provider::OpenAI => Box::new(OpenAiAnswerClient {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
        }),
    };
    Ok(client)
}

pub(crate) struct OllamaAnswerClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) temperature: f32,
}

impl OllamaAnswerClient {
    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl AnswerClient for OllamaAnswerClient {
    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, LlmClientError> {
        let payload = json!({
            "model": self.model,
            "system": prompt::SYSTEM_PROMPT,
            "prompt": prompt::build_user_prompt(request),
            "stream": false,
            "options": {
                "temperature": self.temperature,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

pub(crate) struct OpenAiAnswerClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AnswerClient for OpenAiAnswerClient {
    async fn generate_answer(&self, request: &AnswerRequest) -> Result<String, LlmClientError> {
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt::SYSTEM_PROMPT },
                { "role": "user", "content": prompt::build_user_prompt(request) }
            ]
        });

        let response = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmClientError::ProviderUnavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "OpenAI completion request failed");
            return Err(LlmClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmClientError::InvalidResponse("response had no choices".into()))
    }
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

    fn request() -> AnswerRequest {
        AnswerRequest {
            question: "What is the grace period?".into(),
            context: vec!["A grace period of thirty days is provided.".into()],
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model":"llama3","stream":false}"#)
                    .body_contains("thirty days");
                then.status(200).json_body(json!({
                    "response": "  Thirty days.  ",
                    "done": true
                }));
            })
            .await;

        let client = OllamaAnswerClient {
            http: http(),
            base_url: server.base_url(),
            model: "llama3".into(),
            temperature: 0.0,
        };
        let answer = client.generate_answer(&request()).await.expect("answer");

        mock.assert();
        assert_eq!(answer, "Thirty days.");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let client = OllamaAnswerClient {
            http: http(),
            base_url: server.base_url(),
            model: "llama3".into(),
            temperature: 0.0,
        };
        let error = client
            .generate_answer(&request())
            .await
            .expect_err("error response");
        assert!(
            matches!(error, LlmClientError::GenerationFailed(ref message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn openai_client_reads_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "id": "chatcmpl-1",
                    "choices": [
                        { "index": 0, "message": { "role": "assistant", "content": "Thirty days." } }
                    ]
                }));
            })
            .await;

        let client = OpenAiAnswerClient {
            http: http(),
            base_url: server.base_url(),
            api_key: "sk-test".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
        };
        let answer = client.generate_answer(&request()).await.expect("answer");

        mock.assert();
        assert_eq!(answer, "Thirty days.");
    }

    #[tokio::test]
    async fn openai_client_rejects_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let client = OpenAiAnswerClient {
            http: http(),
            base_url: server.base_url(),
            api_key: "sk-test".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
        };
        let error = client
            .generate_answer(&request())
            .await
            .expect_err("no choices");
        assert!(matches!(error, LlmClientError::InvalidResponse(_)));
    }
}
