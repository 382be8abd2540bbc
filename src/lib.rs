use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Router misconfiguration: {0}")]
    RouterMisconfiguration(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingGeneration(String),

    #[error("Vector search failed: {0}")]
    VectorSearch(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Errors caused by the caller's input rather than by an I/O dependency.
    #[inline]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::RouterMisconfiguration(_))
    }
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod indexer;
pub mod morphology;
pub mod remote;
pub mod router;
pub mod search;
