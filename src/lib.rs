use thiserror::Error;

pub type Result<T> = std::result::Result<T, GranthError>;

#[derive(Error, Debug)]
pub enum GranthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("No transcript available for {0}")]
    TranscriptUnavailable(String),

    #[error("No meaningful content extracted from {0}")]
    EmptyContent(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Generation service error: {0}")]
    GenerationService(String),

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Failed to ingest {input}: {source}")]
    Ingest {
        input: String,
        #[source]
        source: Box<GranthError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl GranthError {
    /// The error that actually stopped the pipeline, looking through `Ingest` wrappers
    #[inline]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Ingest { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Only timeouts, rate limits and server-side provider failures may be retried
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), Self::TransientProvider(_))
    }

    /// Whether the failure was caused by the caller's input rather than a provider
    #[inline]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::UnsupportedInput(_) | Self::TranscriptUnavailable(_) | Self::EmptyContent(_)
        )
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extract;
mod http;
pub mod indexer;
pub mod pipeline;
pub mod retriever;
pub mod server;

#[cfg(test)]
mod testing;

#[cfg(feature = "bench")]
pub mod internal {
    pub use crate::extract::page::structure_page;
    pub use crate::pipeline::chunking;
}
