//! SQLite-backed [`VectorStore`].
//!
//! Records live in the `embeddings` table (see [`crate::migrate`]). The
//! store's dimensionality is written to `store_meta` the first time a store
//! is opened on a database and checked on every later open, so a database
//! built for one embedding model cannot silently receive vectors from
//! another.
//!
//! Queries load every vector and rank by cosine distance in process.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::EmbeddingRecord;

use super::{check_dims, rank, ScoredChunk, StoreError, VectorStore};

const METRIC: &str = "cosine";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteVectorStore {
    /// Bind a store to `dims` on a migrated database.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] when the database was
    /// created for a different dimensionality.
    pub async fn open(pool: SqlitePool, dims: usize) -> Result<Self, StoreError> {
        // The first opener records dims; every other opener must agree.
        sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('dims', ?), ('metric', ?)")
            .bind(dims.to_string())
            .bind(METRIC)
            .execute(&pool)
            .await?;

        let stored: String = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'dims'")
            .fetch_one(&pool)
            .await?;
        let expected: usize = stored
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("dims = '{}'", stored)))?;
        if expected != dims {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: dims,
            });
        }

        Ok(Self { pool, dims })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), StoreError> {
        check_dims(self.dims, &record.vector)?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (id, source_path, source_name, chunk_index, chunk_text,
                                    token_count, dims, embedding, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_path, chunk_index) DO UPDATE SET
                source_name = excluded.source_name,
                chunk_text = excluded.chunk_text,
                token_count = excluded.token_count,
                dims = excluded.dims,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.source_path)
        .bind(&record.source_name)
        .bind(record.chunk_index as i64)
        .bind(&record.chunk_text)
        .bind(record.token_count as i64)
        .bind(record.vector.len() as i64)
        .bind(vec_to_blob(&record.vector))
        .bind(content_hash(&record.chunk_text))
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM embeddings WHERE source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
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

        let rows = sqlx::query(
            "SELECT source_path, source_name, chunk_index, chunk_text, embedding FROM embeddings",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            if stored.len() != self.dims {
                return Err(StoreError::Corrupt(format!(
                    "stored vector has {} dims, store expects {}",
                    stored.len(),
                    self.dims
                )));
            }
            let chunk_index: i64 = row.get("chunk_index");
            hits.push(ScoredChunk {
                source_path: row.get("source_path"),
                source_name: row.get("source_name"),
                chunk_index: chunk_index as usize,
                chunk_text: row.get("chunk_text"),
                distance: cosine_distance(vector, &stored),
            });
        }

        Ok(rank(hits, limit))
    }

    async fn count_by_source(&self, source_path: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE source_path = ?")
            .bind(source_path)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn open_store(dir: &tempfile::TempDir, dims: usize) -> SqliteVectorStore {
        let pool = crate::db::connect_path(&dir.path().join("ctx.sqlite"))
            .await
            .unwrap();
        crate::migrate::create_schema(&pool).await.unwrap();
        SqliteVectorStore::open(pool, dims).await.unwrap()
    }

    fn record(source: &str, index: usize, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            source_path: source.to_string(),
            source_name: format!("name-of-{}", source),
            chunk_index: index,
            chunk_text: text.to_string(),
            token_count: 3,
            vector,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_unique_per_source_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 2).await;

        store.upsert(&record("/r/a.rs", 0, "first", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("/r/a.rs", 0, "second", vec![0.0, 1.0])).await.unwrap();
        store.upsert(&record("/r/a.rs", 1, "third", vec![1.0, 1.0])).await.unwrap();

        assert_eq!(store.count_by_source("/r/a.rs").await.unwrap(), 2);
        let hits = store.query_scored(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].chunk_text, "second");
        assert_eq!(hits[0].source_name, "name-of-/r/a.rs");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_ranks_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 2).await;
        store.upsert(&record("a", 0, "east", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("b", 0, "north", vec![0.0, 1.0])).await.unwrap();
        store.upsert(&record("c", 0, "northeast", vec![0.7, 0.7])).await.unwrap();

        let hits = store.query(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits, vec!["east".to_string(), "northeast".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 2).await;
        for i in 0..3 {
            store.upsert(&record("a", i, "x", vec![1.0, 0.0])).await.unwrap();
        }
        store.upsert(&record("b", 0, "y", vec![1.0, 0.0])).await.unwrap();

        assert_eq!(store.delete_by_source("a").await.unwrap(), 3);
        assert_eq!(store.count_by_source("a").await.unwrap(), 0);
        assert_eq!(store.count_by_source("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimensionality() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 3).await;

        let err = store.upsert(&record("a", 0, "x", vec![1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(matches!(
            store.query(&[1.0, 0.0], 5).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_checks_recorded_dims() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 4).await;
        let pool = store.pool().clone();

        assert!(SqliteVectorStore::open(pool.clone(), 4).await.is_ok());
        let err = SqliteVectorStore::open(pool, 8).await.err().unwrap();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 8 }));
    }

    #[tokio::test]
    async fn test_concurrent_open_on_fresh_database() {
        for _ in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let pool = crate::db::connect_path(&dir.path().join("ctx.sqlite"))
                .await
                .unwrap();
            crate::migrate::create_schema(&pool).await.unwrap();

            let (a, b) = tokio::join!(
                SqliteVectorStore::open(pool.clone(), 4),
                SqliteVectorStore::open(pool.clone(), 4)
            );
            assert!(a.is_ok(), "{:?}", a.err());
            assert!(b.is_ok(), "{:?}", b.err());
        }
    }

    #[tokio::test]
    async fn test_concurrent_open_with_conflicting_dims() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("ctx.sqlite"))
            .await
            .unwrap();
        crate::migrate::create_schema(&pool).await.unwrap();

        let (a, b) = tokio::join!(
            SqliteVectorStore::open(pool.clone(), 4),
            SqliteVectorStore::open(pool.clone(), 8)
        );
        assert!(a.is_ok() != b.is_ok());
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }
}
