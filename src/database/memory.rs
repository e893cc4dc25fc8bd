//! In-memory vector store using cosine similarity.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{IndexedVector, ScoredChunk, VectorStore, rank};
use crate::{GranthError, Result};

#[derive(Debug)]
struct Collection {
    dimension: usize,
    entries: Vec<IndexedVector>,
}

/// Vector store backed by a `HashMap` behind a `tokio::sync::RwLock`.
///
/// Suitable for tests and short-lived sessions; nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn dimension_mismatch(collection: &str, expected: usize, actual: usize) -> GranthError {
    GranthError::VectorStore(format!(
        "collection '{collection}' holds {expected}-dimensional vectors, got {actual}"
    ))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    #[inline]
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dimension,
                entries: Vec::new(),
            });

        if collection.dimension != dimension {
            return Err(dimension_mismatch(name, collection.dimension, dimension));
        }
        Ok(())
    }

    #[inline]
    async fn upsert(&self, collection: &str, vectors: Vec<IndexedVector>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| {
            GranthError::VectorStore(format!("collection '{collection}' does not exist"))
        })?;

        if let Some(bad) = vectors
            .iter()
            .find(|vector| vector.embedding.len() != store.dimension)
        {
            return Err(dimension_mismatch(
                collection,
                store.dimension,
                bad.embedding.len(),
            ));
        }

        debug!("Appending {} vectors to '{}'", vectors.len(), collection);
        store.entries.extend(vectors);
        Ok(())
    }

    #[inline]
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.read().await;
        let Some(store) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        if store.entries.is_empty() {
            return Ok(Vec::new());
        }
        if embedding.len() != store.dimension {
            return Err(dimension_mismatch(collection, store.dimension, embedding.len()));
        }

        let mut scored: Vec<ScoredChunk> = store
            .entries
            .iter()
            .zip(0_u64..)
            .map(|(entry, ordinal)| ScoredChunk {
                id: entry.id,
                payload: entry.payload.clone(),
                score: cosine_similarity(&entry.embedding, embedding),
                ordinal,
            })
            .collect();

        rank(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    #[inline]
    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map_or(0, |store| store.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ChunkPayload;
    use crate::extract::Metadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn vector(text: &str, embedding: Vec<f32>) -> IndexedVector {
        IndexedVector {
            id: Uuid::new_v4(),
            embedding,
            payload: ChunkPayload {
                text: text.to_string(),
                metadata: Metadata::new(),
                sequence_index: 0,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2).await.expect("create");
        store
            .upsert(
                "docs",
                vec![
                    vector("orthogonal", vec![0.0, 1.0]),
                    vector("exact", vec![1.0, 0.0]),
                    vector("close", vec![0.9, 0.1]),
                ],
            )
            .await
            .expect("upsert");

        let results = store.query("docs", &[1.0, 0.0], 2).await.expect("query");

        let texts: Vec<&str> = results.iter().map(|r| r.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "close"]);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 2).await.expect("create");
        store
            .upsert(
                "docs",
                vec![
                    vector("first", vec![0.6, 0.8]),
                    vector("second", vec![0.6, 0.8]),
                    vector("third", vec![0.6, 0.8]),
                ],
            )
            .await
            .expect("upsert");

        let results = store.query("docs", &[0.8, 0.6], 3).await.expect("query");

        let texts: Vec<&str> = results.iter().map(|r| r.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn missing_collection_is_empty() {
        let store = InMemoryVectorStore::new();

        assert!(store.query("nope", &[1.0], 3).await.expect("query").is_empty());
        assert_eq!(store.count("nope").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_write() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 3).await.expect("create");

        assert!(matches!(
            store.ensure_collection("docs", 4).await,
            Err(GranthError::VectorStore(_))
        ));
        assert!(matches!(
            store.upsert("docs", vec![vector("wrong", vec![1.0, 0.0])]).await,
            Err(GranthError::VectorStore(_))
        ));
    }

    #[tokio::test]
    async fn upsert_requires_collection() {
        let store = InMemoryVectorStore::new();

        let result = store.upsert("docs", vec![vector("a", vec![1.0])]).await;

        assert!(matches!(result, Err(GranthError::VectorStore(_))));
    }

    #[test]
    fn zero_vector_has_no_similarity() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }
}
