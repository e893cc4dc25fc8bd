// Embeddings module
// Provider trait plus the Ollama and OpenAI-compatible clients

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::Result;
use crate::config::{Config, EmbeddingProviderKind};

pub use ollama::OllamaClient;
pub use openai::OpenAiEmbeddingClient;

/// Turns text into vectors. The same provider must serve indexing and
/// retrieval so that both live in one embedding space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Name of the embedding model
    fn model(&self) -> &str;
}

/// Construct the embedding provider selected in the configuration
#[inline]
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingProviderKind::Ollama => Arc::new(OllamaClient::new(&config.embedding)?),
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbeddingClient::new(&config.embedding)?),
    };
    info!(
        "Using {} embeddings with model {}",
        config.embedding.provider,
        provider.model()
    );
    Ok(provider)
}
