// Embeddings module
// Converts text into fixed-length vectors through a remote embedding model

pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

use crate::http::HttpError;

pub use gemini::GeminiEmbedder;

/// Vector produced for one text; dimensionality is fixed per model
pub type EmbeddingVector = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding input must not be empty")]
    InvalidInput,

    #[error("Embedding request failed: {0}")]
    Request(#[source] HttpError),

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Embedding failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EmbeddingError>,
    },

    #[error("Failed to embed document at index {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Whether another attempt could succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Request(error) if error.is_transient())
    }
}

/// Embedding generation capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;

    /// Embed several texts one after another, stopping at the first failure
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let vector = self
                .embed(text)
                .await
                .map_err(|source| EmbeddingError::Batch {
                    index,
                    source: Box::new(source),
                })?;
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str;
}
