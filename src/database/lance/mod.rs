
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChunkPayload, IndexedVector, ScoredChunk, VectorStore, rank};
use crate::extract::Metadata;
use crate::{GranthError, Result};

/// On-disk vector store using LanceDB tables as collections
pub struct LanceVectorStore {
    connection: Connection,
    // Serializes table creation and appends so insertion ordinals stay unique
    write_lock: Mutex<()>,
}

fn store_error(context: &str, error: impl std::fmt::Display) -> GranthError {
    GranthError::VectorStore(format!("{}: {}", context, error))
}

impl LanceVectorStore {
    /// Connect to (or create) a LanceDB database directory
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            store_error("Failed to create vector database directory", e)
        })?;

        let uri = path.display().to_string();
        debug!("Connecting to LanceDB at {}", uri);

        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_error("Failed to connect to LanceDB", e))?;

        info!("Vector store opened at {}", uri);
        Ok(Self {
            connection,
            write_lock: Mutex::new(()),
        })
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("Failed to list tables", e))?;
        Ok(table_names.iter().any(|table| table == name))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| store_error(&format!("Failed to open collection '{name}'"), e))
    }

    /// Vector dimension of an existing table, read from its schema
    async fn table_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| store_error("Failed to get table schema", e))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                GranthError::VectorStore(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })
    }
}

fn list_size(dimension: usize) -> Result<i32> {
    i32::try_from(dimension)
        .map_err(|_| GranthError::VectorStore(format!("Vector dimension {dimension} is too large")))
}

/// Schema of a collection table with the given vector dimension
fn create_schema(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
        Field::new("text", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("sequence_index", DataType::UInt64, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("ordinal", DataType::UInt64, false),
    ]))
}

fn create_record_batch(
    vectors: &[IndexedVector],
    dimension: i32,
    first_ordinal: u64,
) -> Result<RecordBatch> {
    let len = vectors.len();
    let width = usize::try_from(dimension).unwrap_or_default();

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * width);
    let mut texts = Vec::with_capacity(len);
    let mut metadata = Vec::with_capacity(len);
    let mut sequence_indexes = Vec::with_capacity(len);
    let mut created_ats = Vec::with_capacity(len);

    for vector in vectors {
        ids.push(vector.id.to_string());
        flat_values.extend_from_slice(&vector.embedding);
        texts.push(vector.payload.text.as_str());
        metadata.push(
            serde_json::to_string(&vector.payload.metadata)
                .map_err(|e| store_error("Failed to serialize chunk metadata", e))?,
        );
        sequence_indexes.push(vector.payload.sequence_index as u64);
        created_ats.push(vector.payload.created_at.to_rfc3339());
    }
    let ordinals: Vec<u64> = (first_ordinal..).take(len).collect();

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| store_error("Failed to create vector array", e))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(metadata)),
        Arc::new(UInt64Array::from(sequence_indexes)),
        Arc::new(StringArray::from(created_ats)),
        Arc::new(UInt64Array::from(ordinals)),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| store_error("Failed to create record batch", e))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| GranthError::VectorStore(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| GranthError::VectorStore(format!("Invalid {name} column type")))
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| GranthError::VectorStore(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| GranthError::VectorStore(format!("Invalid {name} column type")))
}

/// Parse a single record batch from search results
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredChunk>> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "text")?;
    let metadata = string_column(batch, "metadata")?;
    let sequence_indexes = u64_column(batch, "sequence_index")?;
    let created_ats = string_column(batch, "created_at")?;
    let ordinals = u64_column(batch, "ordinal")?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        let metadata: Metadata = serde_json::from_str(metadata.value(row))
            .map_err(|e| store_error("Invalid stored metadata", e))?;
        let created_at = DateTime::parse_from_rfc3339(created_ats.value(row))
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .map_err(|e| store_error("Invalid stored timestamp", e))?;
        let id = Uuid::parse_str(ids.value(row)).map_err(|e| store_error("Invalid stored id", e))?;

        results.push(ScoredChunk {
            id,
            payload: ChunkPayload {
                text: texts.value(row).to_string(),
                metadata,
                sequence_index: usize::try_from(sequence_indexes.value(row)).unwrap_or(usize::MAX),
                created_at,
            },
            // Cosine distance to similarity, higher is better
            score: 1.0 - distance,
            ordinal: ordinals.value(row),
        });
    }

    Ok(results)
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    #[inline]
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        // Check and create happen under one lock
        let _guard = self.write_lock.lock().await;
        if self.table_exists(name).await? {
            let table = self.open_table(name).await?;
            let existing = Self::table_dimension(&table).await?;
            if existing != dimension {
                return Err(GranthError::VectorStore(format!(
                    "collection '{name}' holds {existing}-dimensional vectors, got {dimension}"
                )));
            }
            debug!("Collection '{}' exists with {} dimensions", name, existing);
            return Ok(());
        }

        self.connection
            .create_empty_table(name, create_schema(list_size(dimension)?))
            .execute()
            .await
            .map_err(|e| store_error(&format!("Failed to create collection '{name}'"), e))?;

        info!("Created collection '{}' with {} dimensions", name, dimension);
        Ok(())
    }

    #[inline]
    async fn upsert(&self, collection: &str, vectors: Vec<IndexedVector>) -> Result<()> {
        if vectors.is_empty() {
            debug!("No vectors to store");
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let table = self.open_table(collection).await?;
        let dimension = Self::table_dimension(&table).await?;

        if let Some(bad) = vectors.iter().find(|v| v.embedding.len() != dimension) {
            return Err(GranthError::VectorStore(format!(
                "collection '{collection}' holds {dimension}-dimensional vectors, got {}",
                bad.embedding.len()
            )));
        }

        let first_ordinal = table
            .count_rows(None)
            .await
            .map_err(|e| store_error("Failed to count rows", e))? as u64;

        let record_batch = create_record_batch(&vectors, list_size(dimension)?, first_ordinal)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| store_error("Failed to insert vectors", e))?;

        info!("Stored {} vectors in '{}'", vectors.len(), collection);
        Ok(())
    }

    #[inline]
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if !self.table_exists(collection).await? {
            debug!("Collection '{}' does not exist yet", collection);
            return Ok(Vec::new());
        }

        let table = self.open_table(collection).await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| store_error("Failed to count rows", e))?;
        if rows == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let dimension = Self::table_dimension(&table).await?;
        if embedding.len() != dimension {
            return Err(GranthError::VectorStore(format!(
                "collection '{collection}' holds {dimension}-dimensional vectors, query has {}",
                embedding.len()
            )));
        }

        let mut stream = table
            .vector_search(embedding)
            .map_err(|e| store_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            // Lance picks among rows tied at the k-th score before rank() sees them
            .limit(k)
            .execute()
            .await
            .map_err(|e| store_error("Failed to execute search", e))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| store_error("Failed to read result stream", e))?
        {
            results.extend(parse_search_batch(&batch)?);
        }

        if results.len() > k {
            warn!("Search returned {} rows for k = {}", results.len(), k);
        }
        rank(&mut results);
        results.truncate(k);

        debug!("Query on '{}' returned {} chunks", collection, results.len());
        Ok(results)
    }

    #[inline]
    async fn count(&self, collection: &str) -> Result<usize> {
        if !self.table_exists(collection).await? {
            return Ok(0);
        }

        self.open_table(collection)
            .await?
            .count_rows(None)
            .await
            .map_err(|e| store_error("Failed to count rows", e))
    }
}
