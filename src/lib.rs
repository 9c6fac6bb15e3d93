//! # RAG Harness
//!
//! Deduplicating document ingestion and a metadata-aware retrieval
//! augmented query pipeline.
//!
//! Documents are staged into object storage, checked against the metadata
//! store by content hash and embedding model, extracted, chunked, embedded
//! and upserted into a vector index under deterministic point ids. Queries
//! run through intent classification, history-aware rewriting, metadata
//! filtering with an unfiltered fallback, reranking and budgeted context
//! assembly before generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ObjectStore  │──▶│  Ingestion   │──▶│ VectorIndex  │
//! │ local / S3   │   │ dedup+embed  │   │ memory/Qdrant│
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           ▼                  │
//!                    ┌──────────────┐          ▼
//!                    │   SQLite     │◀──┌──────────────┐
//!                    │ meta+history │   │  RAG query   │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! The pure pipeline logic (addressing, dedup decisions, filters,
//! reranking, context assembly) lives in `rag-harness-core`; this crate
//! supplies the I/O backends and the `rag` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Backend wiring from config |
//! | [`commands`] | CLI subcommand implementations |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Metadata and chat history on SQLite |
//! | [`object_store`] | Local and S3 object storage |
//! | [`aws`] | SigV4 request signing |
//! | [`extract`] | File type detection and text extraction |
//! | [`providers`] | Bedrock, OpenAI and Ollama model clients |
//! | [`qdrant`] | Qdrant REST vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`rag`] | Query pipeline |

pub mod app;
pub mod aws;
pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod object_store;
pub mod providers;
pub mod qdrant;
pub mod rag;
pub mod sqlite_store;
