//! Similarity retrieval.
//!
//! [`Retriever::search`] embeds the query and asks the store for the
//! nearest chunks. Retrieval is best effort: a blank query, an embedding
//! failure or a store failure all produce an empty result instead of an
//! error, logged at `warn`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::store::{ScoredChunk, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<String>,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    model: String,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        let model = embedder.model_name().to_string();
        Self {
            embedder,
            store,
            model,
        }
    }

    /// Query with a model other than the embedder's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Chunk texts nearest to `query`, closest first.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<String> {
        self.search_scored(query, limit)
            .await
            .into_iter()
            .map(|hit| hit.chunk_text)
            .collect()
    }

    /// Like [`search`](Self::search), keeping provenance and distance.
    pub async fn search_scored(&self, query: &str, limit: usize) -> Vec<ScoredChunk> {
        if query.trim().is_empty() || limit == 0 {
            return Vec::new();
        }

        let vector = match self.embedder.embed(query, &self.model).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Retrieval degraded: query embedding failed: {}", e);
                return Vec::new();
            }
        };

        match self.store.query_scored(&vector, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Retrieval degraded: vector query failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn handle(&self, request: &RetrievalRequest) -> RetrievalResponse {
        RetrievalResponse {
            results: self.search(&request.query, request.limit).await,
        }
    }
}
