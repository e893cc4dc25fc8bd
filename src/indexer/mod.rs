// Indexer module
// Embeds chunks and writes them to the vector store; hosts the end-to-end ingestion path


use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_COLLECTION};
use crate::database::{ChunkPayload, IndexedVector, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::extract::{ExtractorRegistry, InputDescriptor};
use crate::pipeline::{Chunk, ChunkingConfig, chunk_documents, require_content};
use crate::{GranthError, Result};

const DEFAULT_BATCH_SIZE: usize = 16;

/// Outcome of a successful indexing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReceipt {
    pub documents_processed: usize,
    pub chunks_created: usize,
}

/// Turns inputs into stored chunk vectors.
///
/// Writes are append-only: indexing the same source twice stores its chunks twice.
pub struct Indexer {
    registry: ExtractorRegistry,
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Indexer {
    #[inline]
    pub fn new(
        registry: ExtractorRegistry,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            registry,
            embeddings,
            store,
            collection: DEFAULT_COLLECTION.to_string(),
            chunking: ChunkingConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Build an indexer from configuration, sharing the given provider handles
    #[inline]
    pub fn from_config(
        config: &Config,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let batch_size =
            usize::try_from(config.embedding.batch_size).unwrap_or(DEFAULT_BATCH_SIZE);

        Self::new(ExtractorRegistry::from_config(config), embeddings, store)
            .with_collection(config.store.collection.clone())
            .with_chunking(config.chunking.clone())
            .with_batch_size(batch_size)
    }

    #[inline]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[inline]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Extract, filter, chunk and index a single input.
    ///
    /// Every failure is reported as [`GranthError::Ingest`] naming the input.
    #[inline]
    pub async fn ingest(&self, input: &InputDescriptor) -> Result<IndexReceipt> {
        let description = input.describe();
        self.run_ingest(input, &description)
            .await
            .map_err(|source| GranthError::Ingest {
                input: description,
                source: Box::new(source),
            })
    }

    async fn run_ingest(&self, input: &InputDescriptor, description: &str) -> Result<IndexReceipt> {
        info!("Ingesting {}", description);

        let documents = self.registry.extract(input).await?;
        debug!("Extracted {} documents from {}", documents.len(), description);

        let filtered = require_content(documents, self.chunking.min_content_length, description)?;
        let chunks = chunk_documents(&filtered, &self.chunking);

        let receipt = self.index(&chunks).await?;
        info!(
            "Ingested {}: {} documents, {} chunks",
            description, receipt.documents_processed, receipt.chunks_created
        );
        Ok(receipt)
    }

    /// Embed and store chunks in batches.
    ///
    /// Batches written before a failure stay written.
    #[inline]
    pub async fn index(&self, chunks: &[Chunk]) -> Result<IndexReceipt> {
        let documents_processed = chunks
            .iter()
            .map(|chunk| chunk.document_index)
            .collect::<BTreeSet<_>>()
            .len();

        let mut collection_ready = false;
        let mut chunks_created = 0;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self.embeddings.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(GranthError::EmbeddingService(format!(
                    "Expected {} embeddings, received {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            if !collection_ready {
                let dimension = embeddings.first().map_or(0, Vec::len);
                if dimension == 0 {
                    return Err(GranthError::EmbeddingService(
                        "Embedding service returned an empty vector".to_string(),
                    ));
                }
                self.store
                    .ensure_collection(&self.collection, dimension)
                    .await?;
                collection_ready = true;
            }

            let created_at = Utc::now();
            let vectors: Vec<IndexedVector> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexedVector {
                    id: Uuid::new_v4(),
                    embedding,
                    payload: ChunkPayload {
                        text: chunk.text.clone(),
                        metadata: chunk.metadata.clone(),
                        sequence_index: chunk.sequence_index,
                        created_at,
                    },
                })
                .collect();

            self.store.upsert(&self.collection, vectors).await?;
            chunks_created += batch.len();
            debug!(
                "Indexed {}/{} chunks into '{}'",
                chunks_created,
                chunks.len(),
                self.collection
            );
        }

        Ok(IndexReceipt {
            documents_processed,
            chunks_created,
        })
    }
}
