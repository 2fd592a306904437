//! Chat error taxonomy
//!
//! Every failure of the query pipeline is one of a closed set of kinds so a
//! transport layer can map each one to a distinct outward signal.

use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::database::{FilterError, StoreError};
use crate::embeddings::EmbeddingError;
use crate::generation::GenerationError;

/// Pipeline stage that touches a remote collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Embedding,
    Retrieval,
    Generation,
}

impl Stage {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Retrieval => "retrieval",
            Self::Generation => "generation",
        }
    }
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bad caller input, rejected before any remote call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Query text must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    DisallowedFilterKey(#[from] FilterError),

    #[error("temperature must be between 0 and {max}, got {value}")]
    Temperature { value: f32, max: f32 },

    #[error("top_k must be between 1 and {max}, got {value}")]
    TopK { value: u32, max: u32 },

    #[error("max_output_tokens must be between 1 and {max}, got {value}")]
    MaxOutputTokens { value: u32, max: u32 },
}

/// Cause of a retrieval failure: the embedding call or the vector store
#[derive(Debug, Error)]
pub enum RetrievalCause {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Embedding model returned an empty vector")]
    EmptyEmbedding,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid chat request: {0}")]
    Validation(#[from] ValidationError),

    #[error("{stage} stage failed: {source}")]
    Retrieval {
        stage: Stage,
        #[source]
        source: RetrievalCause,
    },

    #[error("generation stage failed: {0}")]
    Generation(#[source] GenerationError),

    #[error("Request cancelled during {stage} stage")]
    Cancelled { stage: Stage },
}

/// Coarse error kind exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    Validation,
    Retrieval,
    Generation,
    Cancelled,
}

impl ChatError {
    #[inline]
    pub fn embedding(source: EmbeddingError) -> Self {
        Self::Retrieval {
            stage: Stage::Embedding,
            source: RetrievalCause::Embedding(source),
        }
    }

    #[inline]
    pub fn store(source: StoreError) -> Self {
        Self::Retrieval {
            stage: Stage::Retrieval,
            source: RetrievalCause::Store(source),
        }
    }

    #[inline]
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            Self::Validation(_) => ChatErrorKind::Validation,
            Self::Retrieval { .. } => ChatErrorKind::Retrieval,
            Self::Generation(_) => ChatErrorKind::Generation,
            Self::Cancelled { .. } => ChatErrorKind::Cancelled,
        }
    }

    /// HTTP-equivalent status a transport layer should answer with
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ChatErrorKind::Validation => 400,
            ChatErrorKind::Retrieval | ChatErrorKind::Generation => 502,
            ChatErrorKind::Cancelled => 499,
        }
    }

    /// Message safe to show to an end user; remote failure detail stays in the logs
    #[inline]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(error) => error.to_string(),
            Self::Retrieval { .. } => "Failed to retrieve context for the query.".to_string(),
            Self::Generation(_) => "Failed to generate an answer.".to_string(),
            Self::Cancelled { .. } => "Request was cancelled.".to_string(),
        }
    }

    /// Log the error at a level matching its kind
    #[inline]
    pub fn log(&self, request_id: &str) {
        match self.kind() {
            ChatErrorKind::Validation | ChatErrorKind::Cancelled => {
                warn!("[{}] {}", request_id, self);
            }
            ChatErrorKind::Retrieval | ChatErrorKind::Generation => {
                error!("[{}] {}", request_id, self);
            }
        }
    }
}
