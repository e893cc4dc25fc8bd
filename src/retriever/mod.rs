// Retriever module
// Embeds a query and returns the closest stored chunks


use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::Result;
use crate::config::{Config, DEFAULT_COLLECTION};
use crate::database::{ScoredChunk, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::extract::Metadata;

pub const DEFAULT_TOP_K: usize = 3;

/// A stored chunk returned for a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: Metadata,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

impl From<ScoredChunk> for RetrievedChunk {
    #[inline]
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            text: chunk.payload.text,
            metadata: chunk.payload.metadata,
            score: chunk.score,
        }
    }
}

/// Retrieved chunks, most similar first
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedChunk> {
        self.chunks.iter()
    }
}

#[derive(Clone)]
pub struct Retriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    top_k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embeddings,
            store,
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn from_config(
        config: &Config,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self::new(embeddings, store)
            .with_collection(config.store.collection.clone())
            .with_top_k(config.retrieval.top_k)
    }

    #[inline]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Top-k chunks for `query`; empty when nothing has been indexed
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve_k(query, self.top_k).await
    }

    #[inline]
    pub async fn retrieve_k(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let embedding = self.embeddings.embed(query).await?;
        let mut matches = self.store.query(&self.collection, &embedding, k).await?;

        // Stable, so equal scores keep the store's insertion order
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);

        debug!(
            "Query matched {} chunks in '{}' (k = {})",
            matches.len(),
            self.collection,
            k
        );
        if matches.is_empty() {
            info!("No indexed content matched the query");
        }

        Ok(RetrievalResult {
            chunks: matches.into_iter().map(RetrievedChunk::from).collect(),
        })
    }
}
