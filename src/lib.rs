use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Vector store error: {0}")]
    Store(#[from] database::StoreError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Generation error: {0}")]
    Generation(#[from] generation::GenerationError),

    #[error("Chat error: {0}")]
    Chat(#[from] chat::ChatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod clock;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod http;
pub mod retry;
