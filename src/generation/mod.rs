// Generation module
// Turns an assembled prompt into answer text through a remote chat model

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::HttpError;

pub use gemini::GeminiGenerator;

/// Sampling parameters resolved for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

/// Normalized model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Token count reported by the model, when it reports one
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(#[source] HttpError),

    #[error("Model returned no answer text")]
    EmptyResponse,

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),
}

/// Text generation capability. Implementations make a single attempt per call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, GenerationError>;

    fn model_name(&self) -> &str;
}
