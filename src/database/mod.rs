// Database module
// Vector storage behind a trait, with LanceDB and in-memory backends

pub mod lance;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::Result;
use crate::config::{Config, StoreBackend};
use crate::extract::Metadata;

pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;

/// What is stored next to each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub metadata: Metadata,
    pub sequence_index: usize,
    pub created_at: DateTime<Utc>,
}

/// A chunk embedding ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A stored chunk matched by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: Uuid,
    pub payload: ChunkPayload,
    /// Cosine similarity, higher is closer
    pub score: f32,
    /// Position in insertion order within the collection
    pub ordinal: u64,
}

/// Storage backend for chunk vectors, organised in named collections.
///
/// A collection's dimension is fixed by the first `ensure_collection` call;
/// later writes or queries with another dimension fail.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing, or verify its dimension if present
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Append vectors to an existing collection
    async fn upsert(&self, collection: &str, vectors: Vec<IndexedVector>) -> Result<()>;

    /// Up to `k` closest chunks; empty when the collection does not exist
    async fn query(&self, collection: &str, embedding: &[f32], k: usize)
    -> Result<Vec<ScoredChunk>>;

    /// Number of stored vectors; zero when the collection does not exist
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Open the vector store selected in the configuration
#[inline]
pub async fn store_from_config(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.store.backend {
        StoreBackend::Lance => {
            let path = config.vector_database_path();
            info!("Opening LanceDB vector store at {}", path.display());
            Arc::new(LanceVectorStore::open(&path).await?)
        }
        StoreBackend::Memory => {
            info!("Using in-memory vector store; vectors are lost on exit");
            Arc::new(InMemoryVectorStore::new())
        }
    };
    Ok(store)
}

/// Order by descending score, earlier insertions first on ties
#[inline]
pub(crate) fn rank(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
}
