//! # `ctx`: repository ingestion and retrieval CLI
//!
//! ## Usage
//!
//! ```bash
//! ctx --config ./config/ctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctx init` | Create the SQLite database and schema |
//! | `ctx ingest <path>` | Harvest, chunk, embed and store a git repository |
//! | `ctx search "<query>"` | Print the nearest chunks as JSON |
//! | `ctx forget <source_path>` | Delete every stored chunk of one file |
//!
//! `ingest` prints the job result as JSON on stdout and exits with status 1
//! when the job did not succeed. Logs go to stderr; raise verbosity with
//! `-v`/`-vv` or `RUST_LOG`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use context_ingest::config::{self, Config};
use context_ingest::db;
use context_ingest::embedding::{Embedder, EmbeddingClient};
use context_ingest::ingest::{IngestRequest, Ingestor};
use context_ingest::migrate;
use context_ingest::search::{RetrievalResponse, Retriever};
use context_ingest::store::sqlite::SqliteVectorStore;
use context_ingest::store::VectorStore;

/// Ingest git repositories into a local vector store and query it.
#[derive(Parser)]
#[command(name = "ctx", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    /// More log output on stderr (-v info, -vv debug). Ignored when RUST_LOG is set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest one git repository.
    Ingest {
        /// Repository directory (must contain `.git`).
        path: String,

        /// Embedding model name passed to the embedding service.
        #[arg(long)]
        model: Option<String>,

        /// Do not apply .gitignore, .git/info/exclude or global excludes.
        #[arg(long)]
        no_ignore_rules: bool,

        /// Do not scan file content for secrets.
        #[arg(long)]
        no_secret_scan: bool,

        /// Ingest files even when the secret scan finds something.
        #[arg(long)]
        keep_files_with_secrets: bool,

        /// Stop after admitting this many files.
        #[arg(long)]
        max_files: Option<usize>,

        /// Per-file size limit in megabytes.
        #[arg(long)]
        max_file_size_mb: Option<u64>,

        /// Harvest and chunk only; nothing is embedded or stored.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search stored chunks by similarity.
    Search {
        query: String,

        /// Number of results (default from `[retrieval] default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Include source path and distance for every hit.
        #[arg(long)]
        scored: bool,
    },

    /// Delete every stored chunk for one source path.
    Forget { source_path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            model,
            no_ignore_rules,
            no_secret_scan,
            keep_files_with_secrets,
            max_files,
            max_file_size_mb,
            dry_run,
        } => {
            let mut request = IngestRequest::new(path);
            request.model = model.unwrap_or_else(|| cfg.embedding.model.clone());
            request.respect_ignore_rules = !no_ignore_rules;
            request.scan_for_secrets = cfg.security.scan_for_secrets && !no_secret_scan;
            request.skip_files_with_secrets =
                cfg.security.skip_files_with_secrets && !keep_files_with_secrets;
            request.max_files = max_files;
            request.max_file_size_mb = max_file_size_mb;
            request.dry_run = dry_run;

            let (store, embedder) = open_backends(&cfg).await?;
            let ingestor = Ingestor::from_config(&cfg, store, embedder);
            let result = ingestor.ingest(&request).await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Search {
            query,
            limit,
            scored,
        } => {
            let (store, embedder) = open_backends(&cfg).await?;
            let retriever = Retriever::new(embedder, store).with_model(cfg.embedding.model.clone());
            let limit = limit.unwrap_or(cfg.retrieval.default_limit);

            if scored {
                let hits = retriever.search_scored(&query, limit).await;
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "results": hits }))?);
            } else {
                let response = RetrievalResponse {
                    results: retriever.search(&query, limit).await,
                };
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Commands::Forget { source_path } => {
            let store = open_store(&cfg).await?;
            let removed = store
                .delete_by_source(&source_path)
                .await
                .with_context(|| format!("Failed to delete chunks for {}", source_path))?;
            println!("Removed {} chunk(s) for {}", removed, source_path);
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn VectorStore>> {
    let pool = db::connect(cfg).await?;
    migrate::create_schema(&pool).await?;
    let store = SqliteVectorStore::open(pool, cfg.embedding.dims)
        .await
        .context("Failed to open vector store")?;
    Ok(Arc::new(store))
}

async fn open_backends(cfg: &Config) -> Result<(Arc<dyn VectorStore>, Arc<dyn Embedder>)> {
    let store = open_store(cfg).await?;
    let embedder = EmbeddingClient::from_config(&cfg.embedding)?;
    Ok((store, Arc::new(embedder)))
}
