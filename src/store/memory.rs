//! In-memory [`VectorStore`] for tests and for hosts that bring their own
//! persistence.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine distance over every stored vector.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::EmbeddingRecord;

use super::{check_dims, rank, ScoredChunk, StoreError, VectorStore};

pub struct InMemoryVectorStore {
    dims: usize,
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        check_dims(self.dims, &record.vector)?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.iter_mut().find(|r| {
            r.source_path == record.source_path && r.chunk_index == record.chunk_index
        }) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<u64, StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|r| r.source_path != source_path);
        Ok((before - records.len()) as u64)
    }

    async fn query_scored(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        check_dims(self.dims, vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let hits = records
            .iter()
            .map(|r| ScoredChunk {
                source_path: r.source_path.clone(),
                source_name: r.source_name.clone(),
                chunk_index: r.chunk_index,
                chunk_text: r.chunk_text.clone(),
                distance: cosine_distance(vector, &r.vector),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn count_by_source(&self, source_path: &str) -> Result<u64, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().filter(|r| r.source_path == source_path).count() as u64)
    }
}
