//! # RAG Harness Core
//!
//! Shared, I/O-free logic for RAG Harness: data models, content addressing,
//! word chunking, store abstractions, the duplicate-check state machine,
//! metadata filtering, reranking, and context assembly.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Backends that talk to real services live in the `rag-harness` crate and
//! implement the traits defined in [`store`] and [`model`].

pub mod address;
pub mod chunk;
pub mod context;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod model;
pub mod models;
pub mod prompt;
pub mod query;
pub mod rerank;
pub mod response;
pub mod store;

pub use error::{RagError, Result};
