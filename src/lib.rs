//! Layered knowledge packs with graceful degradation.
//!
//! A knowledge pack is a directory of markdown plus optional embedding sources,
//! split into a shared **base** layer and any number of named **contexts**
//! (teams, products, tenants). At startup the pack is assembled into two
//! partitioned stores:
//!
//! | Store | Partition keys | Source |
//! |-------|----------------|--------|
//! | [`markdown::MarkdownKnowledgeStore`] | `__base__`, `<ctx>` | `<root>/*.md`, `<root>/contexts/<ctx>/*.md` |
//! | [`index::EmbeddingIndex`] | `__base__`, `<ctx>` | `<root>/embeddings/`, `<root>/contexts/<ctx>/embeddings/` |
//!
//! Any layer may be absent. A missing directory is reported as an
//! `optional_source_missing` analytics event and the rest of the pack still
//! loads; every other failure stops initialization.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine distance over chunk embeddings
//! - **Embeddings**: local ONNX Runtime (all-MiniLM-L6-v2) or an Ollama server
//! - **Transport**: a small JSON API over HTTP for context selection and browsing
//!
//! # Modules
//!
//! - [`config`]: TOML + environment configuration and the [`config::ConfigSource`] seam
//! - [`pack`]: on-disk layout, context discovery and partition keys
//! - [`markdown`]: the partitioned markdown store
//! - [`index`]: the partitioned embedding index
//! - [`orchestrator`]: ordered, degradable assembly and the active context
//! - [`events`]: analytics sinks
//! - [`server`]: HTTP API

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;
pub mod index;
pub mod markdown;
pub mod orchestrator;
pub mod pack;
pub mod server;

pub use error::{KnowledgePackError, LoadError};
pub use orchestrator::KnowledgeOrchestrator;
pub use pack::BASE_PARTITION;
