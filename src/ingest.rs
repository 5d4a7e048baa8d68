//! Ingestion orchestration.
//!
//! One call to [`Ingestor::ingest`] is one job: harvest the repository,
//! then for each admitted file in traversal order:
//!
//! 1. optional content scan (`sensitive_content` skip when configured)
//! 2. chunk (a dry run stops here and only counts)
//! 3. `delete_by_source` so re-ingestion fully replaces earlier chunks,
//!    then a `no_chunks` skip when nothing came out
//! 4. embed and upsert each chunk; failures go to `errors` and the job
//!    moves on to the next chunk
//!
//! A file counts as processed when at least one chunk was stored; otherwise
//! it is skipped with `embedding_failed`. The job succeeds iff `errors` is
//! empty. Validation failures, a harvest abort, or a failed
//! `delete_by_source` end the job immediately with `success = false`.
//!
//! All counters live in a per-job [`JobState`], so independent jobs can run
//! concurrently against one shared store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chunk::{chunk_text, ChunkConfig};
use crate::config::{Config, ScanMode};
use crate::embedding::{EmbedError, Embedder};
use crate::git_info;
use crate::harvest::sensitive::{summarize, SensitiveFilter};
use crate::harvest::validate::RepositoryLimits;
use crate::harvest::{HarvestOptions, HarvestedFile, Harvester};
use crate::models::{
    EmbeddingRecord, IngestionJobResult, JobMetrics, SkipReason, SkippedFile, SourceInfo,
};
use crate::store::VectorStore;

const MB: u64 = 1024 * 1024;

/// An ingestion job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub source_path: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_true")]
    pub respect_ignore_rules: bool,
    #[serde(default = "default_true")]
    pub scan_for_secrets: bool,
    #[serde(default = "default_true")]
    pub skip_files_with_secrets: bool,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,
    /// Harvest and chunk, but neither embed nor touch the store.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_true() -> bool {
    true
}

impl IngestRequest {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            model: default_model(),
            respect_ignore_rules: true,
            scan_for_secrets: true,
            skip_files_with_secrets: true,
            max_files: None,
            max_file_size_mb: None,
            dry_run: false,
        }
    }
}

/// Retry with exponential backoff: `base_delay`, 2×, 4×, … capped at 32×.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Embed `text`, retrying transient failures per `policy`.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    model: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, EmbedError> {
    let mut attempt = 0;
    loop {
        match embedder.embed(text, model).await {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::debug!("embed failed ({}), retry {} in {:?}", e, attempt, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Counters and findings for one job.
struct JobState {
    started: Instant,
    files_processed: usize,
    chunks_created: usize,
    files_skipped: Vec<SkippedFile>,
    errors: Vec<String>,
    files_scanned: usize,
    total_size_bytes: u64,
}

impl JobState {
    fn new(started: Instant) -> Self {
        Self {
            started,
            files_processed: 0,
            chunks_created: 0,
            files_skipped: Vec::new(),
            errors: Vec::new(),
            files_scanned: 0,
            total_size_bytes: 0,
        }
    }

    fn skip(&mut self, path: &str, reason: SkipReason, details: impl Into<String>) {
        self.files_skipped.push(SkippedFile::new(path, reason, details));
    }

    fn finish(self, source_info: Option<SourceInfo>, aborted: bool) -> IngestionJobResult {
        let success = !aborted && self.errors.is_empty();
        let message = if aborted {
            format!(
                "Ingestion aborted after {} file(s): {}",
                self.files_processed,
                self.errors.last().map(String::as_str).unwrap_or("critical error")
            )
        } else {
            format!(
                "Processed {} file(s), created {} chunk(s), skipped {} file(s){}",
                self.files_processed,
                self.chunks_created,
                self.files_skipped.len(),
                if self.errors.is_empty() {
                    String::new()
                } else {
                    format!(", {} error(s)", self.errors.len())
                }
            )
        };

        IngestionJobResult {
            success,
            files_processed: self.files_processed,
            chunks_created: self.chunks_created,
            files_skipped: self.files_skipped,
            errors: self.errors,
            message,
            metrics: JobMetrics {
                duration_ms: self.started.elapsed().as_millis() as u64,
                total_size_bytes: self.total_size_bytes,
                files_scanned: self.files_scanned,
            },
            source_info,
        }
    }
}

enum FileOutcome {
    Done,
    Critical(String),
}

pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    limits: RepositoryLimits,
    chunking: ChunkConfig,
    harvest: HarvestOptions,
    scan_mode: ScanMode,
    retry: RetryPolicy,
    filter: SensitiveFilter,
}

impl Ingestor {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            limits: RepositoryLimits::default(),
            chunking: ChunkConfig::default(),
            harvest: HarvestOptions::default(),
            scan_mode: ScanMode::Full,
            retry: RetryPolicy::default(),
            filter: SensitiveFilter::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::new(store, embedder)
            .with_limits(config.limits.to_limits())
            .with_chunking(config.chunking.to_chunk_config())
            .with_harvest_options(HarvestOptions {
                respect_ignore_rules: true,
                exclude_globs: config.harvest.exclude_globs.clone(),
                global_ignore_file: config.harvest.global_ignore_file.clone(),
            })
            .with_scan_mode(config.security.scan_mode)
            .with_retry(RetryPolicy {
                max_retries: config.embedding.max_retries,
                ..RetryPolicy::default()
            })
    }

    pub fn with_limits(mut self, limits: RepositoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_harvest_options(mut self, options: HarvestOptions) -> Self {
        self.harvest = options;
        self
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one ingestion job. Never fails; problems are reported in the
    /// result.
    pub async fn ingest(&self, request: &IngestRequest) -> IngestionJobResult {
        let started = Instant::now();

        let mut limits = self.limits.clone();
        if let Some(max_files) = request.max_files {
            limits.max_files = max_files;
        }
        if let Some(mb) = request.max_file_size_mb {
            limits.max_file_size_bytes = mb.saturating_mul(MB);
        }
        let options = HarvestOptions {
            respect_ignore_rules: request.respect_ignore_rules,
            ..self.harvest.clone()
        };

        let source_path = request.source_path.clone();
        let harvested = tokio::task::spawn_blocking(move || {
            Harvester::new(limits, options).harvest(&source_path)
        })
        .await;

        let harvest = match harvested {
            Ok(Ok(harvest)) => harvest,
            Ok(Err(e)) => {
                tracing::warn!("Ingestion of {} aborted: {}", request.source_path, e);
                return IngestionJobResult::aborted(e.to_string(), elapsed_ms(started));
            }
            Err(e) => {
                return IngestionJobResult::aborted(
                    format!("harvest task failed: {}", e),
                    elapsed_ms(started),
                );
            }
        };

        let root = harvest.root.clone();
        let source_info = tokio::task::spawn_blocking(move || git_info::probe(&root))
            .await
            .ok();

        let mut job = JobState::new(started);
        job.files_skipped = harvest.skipped;
        job.files_scanned = harvest.files_scanned;
        job.total_size_bytes = harvest.total_size_bytes;

        let model = if request.model.trim().is_empty() {
            self.embedder.model_name().to_string()
        } else {
            request.model.clone()
        };

        for file in &harvest.files {
            if let FileOutcome::Critical(error) =
                self.ingest_file(file, request, &model, &mut job).await
            {
                tracing::warn!("Ingestion of {} aborted: {}", request.source_path, error);
                job.errors.push(error);
                return job.finish(source_info, true);
            }
        }

        let result = job.finish(source_info, false);
        tracing::info!(
            "ingest {}: processed={} chunks={} skipped={} errors={} in {}ms",
            request.source_path,
            result.files_processed,
            result.chunks_created,
            result.files_skipped.len(),
            result.errors.len(),
            result.metrics.duration_ms
        );
        result
    }

    async fn ingest_file(
        &self,
        file: &HarvestedFile,
        request: &IngestRequest,
        model: &str,
        job: &mut JobState,
    ) -> FileOutcome {
        let name = file.relative_path.as_str();
        let source_path = file.path.to_string_lossy().to_string();

        if request.scan_for_secrets {
            let found = self.filter.detect(&file.content, self.scan_mode);
            if !found.is_empty() {
                let summary = summarize(&found);
                if request.skip_files_with_secrets {
                    tracing::warn!("Skipping {}: {}", name, summary);
                    job.skip(name, SkipReason::SensitiveContent, summary);
                    return FileOutcome::Done;
                }
                tracing::warn!("Ingesting {} despite {}", name, summary);
            }
        }

        let chunks = chunk_text(&file.content, &source_path, &self.chunking);

        if request.dry_run {
            if chunks.is_empty() {
                job.skip(name, SkipReason::NoChunks, "file has no text content");
            } else {
                job.files_processed += 1;
                job.chunks_created += chunks.len();
            }
            return FileOutcome::Done;
        }

        if let Err(e) = self.store.delete_by_source(&source_path).await {
            return FileOutcome::Critical(format!(
                "failed to clear existing chunks for {}: {}",
                name, e
            ));
        }

        if chunks.is_empty() {
            job.skip(name, SkipReason::NoChunks, "file has no text content");
            return FileOutcome::Done;
        }

        let mut stored = 0usize;
        for chunk in &chunks {
            let vector =
                match embed_with_retry(self.embedder.as_ref(), &chunk.text, model, &self.retry)
                    .await
                {
                    Ok(vector) => vector,
                    Err(e) => {
                        job.errors.push(format!(
                            "{} chunk {}: embedding failed: {}",
                            name, chunk.chunk_index, e
                        ));
                        continue;
                    }
                };

            let record = EmbeddingRecord {
                source_path: source_path.clone(),
                source_name: name.to_string(),
                chunk_index: chunk.chunk_index,
                chunk_text: chunk.text.clone(),
                token_count: chunk.token_count,
                vector,
                created_at: Utc::now(),
            };

            match self.store.upsert(&record).await {
                Ok(()) => stored += 1,
                Err(e) => job.errors.push(format!(
                    "{} chunk {}: storage failed: {}",
                    name, chunk.chunk_index, e
                )),
            }
        }

        if stored > 0 {
            job.files_processed += 1;
            job.chunks_created += stored;
        } else {
            job.skip(
                name,
                SkipReason::EmbeddingFailed,
                format!("0 of {} chunks stored", chunks.len()),
            );
        }
        FileOutcome::Done
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
