//! Core data models used throughout the ingestion and retrieval pipeline.
//!
//! [`TextChunk`] is produced transiently by the chunker, [`EmbeddingRecord`]
//! is what the vector store persists, and [`IngestionJobResult`] is the
//! one-shot report returned for every ingestion job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a chunk came from inside its source document.
///
/// Token offsets are approximate: they are derived from per-chunk token
/// counts, not from a single encoding of the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSource {
    pub source_path: String,
    pub start_token: usize,
    pub end_token: usize,
}

/// A bounded slice of a document's text, sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub source: ChunkSource,
    /// Byte length of the leading text repeated from the previous chunk.
    pub overlap_prefix: usize,
}

impl TextChunk {
    /// The part of this chunk that is not repeated from its predecessor.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_prefix.min(self.text.len())..]
    }
}

/// A stored chunk with its embedding vector.
///
/// `(source_path, chunk_index)` is the unique identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub source_path: String,
    pub source_name: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub token_count: usize,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Why a file did not make it into the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    IgnoreRule,
    SensitiveFile,
    SensitiveContent,
    TooLarge,
    Binary,
    ReadError,
    NoChunks,
    EmbeddingFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::IgnoreRule => "ignore_rule",
            SkipReason::SensitiveFile => "sensitive_file",
            SkipReason::SensitiveContent => "sensitive_content",
            SkipReason::TooLarge => "too_large",
            SkipReason::Binary => "binary",
            SkipReason::ReadError => "read_error",
            SkipReason::NoChunks => "no_chunks",
            SkipReason::EmbeddingFailed => "embedding_failed",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
    pub details: String,
}

impl SkippedFile {
    pub fn new(path: impl Into<String>, reason: SkipReason, details: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub duration_ms: u64,
    pub total_size_bytes: u64,
    pub files_scanned: usize,
}

/// Version-control facts about an ingested repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub branch: Option<String>,
    pub revision_id: Option<String>,
    pub remote_url: Option<String>,
}

/// The response returned once per ingestion job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJobResult {
    pub success: bool,
    pub files_processed: usize,
    pub chunks_created: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub errors: Vec<String>,
    pub message: String,
    pub metrics: JobMetrics,
    pub source_info: Option<SourceInfo>,
}

impl IngestionJobResult {
    /// A job that aborted before touching any file.
    pub fn aborted(error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: format!("Ingestion aborted: {}", error),
            errors: vec![error],
            metrics: JobMetrics {
                duration_ms,
                ..JobMetrics::default()
            },
            ..Self::default()
        }
    }

    pub fn skipped_with(&self, reason: SkipReason) -> impl Iterator<Item = &SkippedFile> {
        self.files_skipped.iter().filter(move |s| s.reason == reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_serializes_snake_case() {
        let json = serde_json::to_string(&SkipReason::SensitiveContent).unwrap();
        assert_eq!(json, "\"sensitive_content\"");
        assert_eq!(SkipReason::IgnoreRule.to_string(), "ignore_rule");
    }

    #[test]
    fn test_job_result_serializes_camel_case() {
        let result = IngestionJobResult {
            success: true,
            files_processed: 1,
            chunks_created: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["filesProcessed"], 1);
        assert_eq!(json["chunksCreated"], 2);
        assert_eq!(json["metrics"]["filesScanned"], 0);
        assert!(json["sourceInfo"].is_null());
    }

    #[test]
    fn test_aborted_result() {
        let result = IngestionJobResult::aborted("path does not exist", 3);
        assert!(!result.success);
        assert_eq!(result.files_processed, 0);
        assert_eq!(result.errors, vec!["path does not exist".to_string()]);
        assert_eq!(result.metrics.duration_ms, 3);
    }

    #[test]
    fn test_fresh_text_strips_overlap() {
        let chunk = TextChunk {
            text: "tail words and new content".to_string(),
            chunk_index: 1,
            token_count: 5,
            source: ChunkSource {
                source_path: "a.md".to_string(),
                start_token: 0,
                end_token: 5,
            },
            overlap_prefix: 11,
        };
        assert_eq!(chunk.fresh_text(), "and new content");
    }
}
