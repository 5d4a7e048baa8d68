//! Vector storage contract.
//!
//! A [`VectorStore`] persists [`EmbeddingRecord`]s keyed by
//! `(source_path, chunk_index)` and answers nearest-neighbour queries by
//! cosine distance. Every store is bound to one vector dimensionality;
//! vectors of any other length are rejected with
//! [`StoreError::DimensionMismatch`], never truncated or padded.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`sqlite::SqliteVectorStore`] | SQLite via `sqlx`, durable |
//! | [`memory::InMemoryVectorStore`] | `RwLock<Vec<_>>`, for tests and embedding in other hosts |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::EmbeddingRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector dimensionality mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("corrupt store metadata: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A query hit with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub source_path: String,
    pub source_name: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    /// Cosine distance, `1 - cosine_similarity`. Smaller is closer.
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector length this store accepts.
    fn dims(&self) -> usize;

    /// Insert or replace the record at `(source_path, chunk_index)`.
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError>;

    /// Remove every record of one source. Returns the number removed.
    async fn delete_by_source(&self, source_path: &str) -> Result<u64, StoreError>;

    /// Up to `limit` nearest records, closest first.
    async fn query_scored(&self, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredChunk>, StoreError>;

    /// Chunk texts of the `limit` nearest records, closest first.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .query_scored(vector, limit)
            .await?
            .into_iter()
            .map(|hit| hit.chunk_text)
            .collect())
    }

    async fn count_by_source(&self, source_path: &str) -> Result<u64, StoreError>;
}

pub(crate) fn check_dims(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != expected {
        return Err(StoreError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Sort hits closest first; ties broken by source then chunk index so that
/// results are deterministic.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_path.cmp(&b.source_path))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(limit);
    hits
}
