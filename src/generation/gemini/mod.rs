
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{Generation, GenerationError, GenerationParams, Generator};
use crate::config::{ConfigError, GeminiConfig};
use crate::embeddings::gemini::{API_KEY_HEADER, Content, Part, model_endpoint};
use crate::http::HttpClient;

/// Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http: HttpClient,
    endpoint: Url,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

impl GeminiGenerator {
    /// Build a client for `model` using the shared Gemini connection settings
    #[inline]
    pub fn new(config: &GeminiConfig, model: &str) -> Result<Self, ConfigError> {
        let api_key = config.require_api_key()?;
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model.to_string()));
        }
        let endpoint = model_endpoint(&config.api_url()?, model, "generateContent")?;

        Ok(Self {
            http: HttpClient::new(config.request_timeout()).with_header(API_KEY_HEADER, api_key),
            endpoint,
            model: model.to_string(),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }
}

/// Concatenate the text parts of the first candidate
fn parse_generation(response_text: &str) -> Result<Generation, GenerationError> {
    let response: GenerateResponse = serde_json::from_str(response_text)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }

    Ok(Generation {
        text: text.to_string(),
        total_tokens: response
            .usage_metadata
            .and_then(|usage| usage.total_token_count),
    })
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, GenerationError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        debug!(
            "Generating with {} (prompt length: {}, temperature: {}, max tokens: {})",
            self.model,
            prompt.len(),
            params.temperature,
            params.max_output_tokens
        );

        let response_text = self
            .http
            .post_json(&self.endpoint, &request)
            .await
            .map_err(|e| {
                warn!("Generation request to {} failed: {}", self.model, e);
                GenerationError::Request(e)
            })?;

        let generation = parse_generation(&response_text)?;
        info!(
            "Generated {} characters ({} tokens)",
            generation.text.len(),
            generation
                .total_tokens
                .map_or_else(|| "unknown".to_string(), |t| t.to_string())
        );
        Ok(generation)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
