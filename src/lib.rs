//! # context-ingest
//!
//! Ingestion and retrieval core for retrieval-augmented generation over
//! git repositories.
//!
//! A repository is validated, walked with ignore rules and secret filters
//! applied, split into token-bounded overlapping chunks, embedded one chunk
//! at a time, and stored in a vector store keyed by
//! `(source_path, chunk_index)`. Retrieval embeds a query and returns the
//! nearest chunk texts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Harvester                │──▶│ Ingestor         │──▶│ VectorStore  │
//! │ validate · ignore_rules  │   │ chunk · embed    │   │ SQLite / mem │
//! │ sensitive                │   │ (retry)          │   └──────┬───────┘
//! └──────────────────────────┘   └──────────────────┘          │
//!                                                               ▼
//!                                                       ┌──────────────┐
//!                                                       │ Retriever    │
//!                                                       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tokenizer`] | Token counting |
//! | [`chunk`] | Token-aware chunking with overlap |
//! | [`embedding`] | Embedding client and vector helpers |
//! | [`store`] | Vector store trait, SQLite and in-memory stores |
//! | [`harvest`] | Path validation, ignore rules, secret filtering, traversal |
//! | [`ingest`] | Ingestion jobs |
//! | [`search`] | Similarity retrieval |
//! | [`git_info`] | Branch, revision and remote of a repository |
//! | [`config`] | TOML configuration |
//! | [`models`] | Shared data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod git_info;
pub mod harvest;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenizer;
