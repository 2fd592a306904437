#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Embedder, EmbeddingError, EmbeddingVector};
use crate::config::{ConfigError, GeminiConfig};
use crate::http::HttpClient;
use crate::retry::{RetryFailure, RetryPolicy, Sleeper, TokioSleeper};

pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `embedContent` client with retry on transient failures
#[derive(Clone)]
pub struct GeminiEmbedder {
    http: HttpClient,
    endpoint: Url,
    model: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'a str>,
    pub parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Part<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingPayload {
    Values { values: Vec<f32> },
    Bare(Vec<f32>),
}

/// Full `models/<name>` resource name expected by the API
pub(crate) fn qualified_model_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// `<base>/v1beta/models/<name>:<method>`
pub(crate) fn model_endpoint(base: &Url, model: &str, method: &str) -> Result<Url, ConfigError> {
    let route = format!("/v1beta/{}:{}", qualified_model_name(model), method);
    base.join(&route)
        .map_err(|_| ConfigError::InvalidUrl(format!("{}{}", base, route)))
}

impl GeminiEmbedder {
    #[inline]
    pub fn new(config: &GeminiConfig) -> Result<Self, ConfigError> {
        let api_key = config.require_api_key()?;
        let endpoint = model_endpoint(&config.api_url()?, &config.embedding_model, "embedContent")?;

        Ok(Self {
            http: HttpClient::new(config.request_timeout()).with_header(API_KEY_HEADER, api_key),
            endpoint,
            model: config.embedding_model.clone(),
            retry: config.retry_policy(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the hook used to wait between attempts
    #[inline]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn embed_once(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let request = EmbedRequest {
            model: qualified_model_name(&self.model),
            content: Content {
                role: None,
                parts: vec![Part { text }],
            },
        };

        let response_text = self
            .http
            .post_json(&self.endpoint, &request)
            .await
            .map_err(EmbeddingError::Request)?;

        parse_embedding(&response_text)
    }
}

fn parse_embedding(response_text: &str) -> Result<EmbeddingVector, EmbeddingError> {
    let response: EmbedResponse = serde_json::from_str(response_text)
        .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

    let vector = match response.embedding {
        Some(EmbeddingPayload::Values { values }) => values,
        Some(EmbeddingPayload::Bare(values)) => values,
        None => {
            return Err(EmbeddingError::MalformedResponse(
                "response did not contain an embedding".to_string(),
            ));
        }
    };

    if vector.is_empty() {
        return Err(EmbeddingError::MalformedResponse(
            "embedding vector is empty".to_string(),
        ));
    }

    Ok(vector)
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(EmbeddingError::InvalidInput);
        }

        debug!(
            "Generating embedding with {} for text (length: {})",
            self.model,
            normalized.len()
        );

        let vector = self
            .retry
            .run(self.sleeper.as_ref(), EmbeddingError::is_transient, |_| {
                self.embed_once(normalized)
            })
            .await
            .map_err(|failure| match failure {
                RetryFailure::Fatal { error, .. } => error,
                RetryFailure::Exhausted { attempts, error } => EmbeddingError::RetriesExhausted {
                    attempts,
                    source: Box::new(error),
                },
            })?;

        info!("Generated embedding with {} dimensions", vector.len());
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
