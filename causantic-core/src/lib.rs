//! Core causal-memory engine for LLM coding-assistant transcripts.
//!
//! This crate holds pure domain logic and I/O-free algorithms: the
//! transcript parser, chunker, edge builder, clusterer, retriever, and
//! the `Store`/`VectorIndex`/`Embedder`/`Labeler` trait boundaries other
//! crates implement. It never touches the filesystem or a database
//! directly except to read a transcript file or stat its metadata.

pub mod api;
pub mod chunker;
pub mod clusterer;
pub mod edges;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod labeler;
pub mod parser;
pub mod retriever;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod vector_index;

pub use error::{Error, Result};
