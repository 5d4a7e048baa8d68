//! Embedding client and vector utilities.
//!
//! [`Embedder`] is the seam the orchestrator and retriever depend on.
//! [`EmbeddingClient`] implements it over HTTP for the two supported
//! backends, chosen once from configuration:
//!
//! - **[`EmbeddingProvider::Local`]**: an Ollama server, `POST {url}/api/embed`.
//! - **[`EmbeddingProvider::Remote`]**: an OpenAI-compatible API,
//!   `POST {url}/v1/embeddings` with a bearer key from `OPENAI_API_KEY`.
//!
//! Each call embeds exactly one text. Retrying is left to the caller; the
//! error type says whether a retry could help ([`EmbedError::is_retryable`]).
//!
//! Also provides [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`]
//! used by the SQLite store.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding service unreachable: {0}")]
    Network(String),
    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

impl EmbedError {
    /// Network failures, rate limiting and server errors may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::Network(_) => true,
            EmbedError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbedError::MalformedResponse(_) => false,
        }
    }
}

/// Turns one text into one vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Default model identifier used when a request doesn't name one.
    fn model_name(&self) -> &str;
    /// Expected vector length.
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Which embedding backend to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Local { url: String },
    Remote { url: String, api_key: String },
}

impl EmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        match config.provider.as_str() {
            "ollama" => Ok(EmbeddingProvider::Local {
                url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string()),
            }),
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
                Ok(EmbeddingProvider::Remote {
                    url: config
                        .url
                        .clone()
                        .unwrap_or_else(|| "https://api.openai.com".to_string()),
                    api_key,
                })
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be ollama or openai.",
                other
            ),
        }
    }

    fn endpoint(&self) -> String {
        match self {
            EmbeddingProvider::Local { url } => {
                format!("{}/api/embed", url.trim_end_matches('/'))
            }
            EmbeddingProvider::Remote { url, .. } => {
                format!("{}/v1/embeddings", url.trim_end_matches('/'))
            }
        }
    }
}

/// HTTP embedding client.
pub struct EmbeddingClient {
    provider: EmbeddingProvider,
    model: String,
    dims: usize,
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(provider: EmbeddingProvider, config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            provider,
            model: config.model.clone(),
            dims: config.dims,
            http,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        Self::new(EmbeddingProvider::from_config(config)?, config)
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedError> {
        let mut request = self.http.post(self.provider.endpoint());
        if let EmbeddingProvider::Remote { api_key, .. } = &self.provider {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let response = request
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::MalformedResponse(e.to_string()))?;

        match self.provider {
            EmbeddingProvider::Local { .. } => parse_ollama_response(&json),
            EmbeddingProvider::Remote { .. } => parse_openai_response(&json),
        }
    }
}

/// Extract the first vector from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| EmbedError::MalformedResponse("missing embeddings array".to_string()))?;
    parse_vector(first)
}

/// Extract `data[0].embedding` from an OpenAI-style response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| EmbedError::MalformedResponse("missing data[0].embedding".to_string()))?;
    parse_vector(first)
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let values = value
        .as_array()
        .ok_or_else(|| EmbedError::MalformedResponse("embedding is not an array".to_string()))?;
    let vector = values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::MalformedResponse("non-numeric component".to_string()))
        })
        .collect::<Result<Vec<f32>, EmbedError>>()?;
    if vector.is_empty() {
        return Err(EmbedError::MalformedResponse("empty embedding".to_string()));
    }
    Ok(vector)
}

/// Encode a float vector as little-endian bytes for BLOB storage.
///
/// ```rust
/// use context_ingest::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty or zero-magnitude vectors and for vectors of
/// different lengths. Callers that care about length mismatches check
/// dimensionality before calling.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// `1 - cosine_similarity`, in `[0.0, 2.0]`. Smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
