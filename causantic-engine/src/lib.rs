//! Ingest orchestration, maintenance scheduling, and the query-API
//! facade for the causal-memory engine. `causantic-core` defines the
//! domain types and algorithms; this crate wires a concrete `Store`,
//! `VectorIndex`, and `Embedder` together behind [`Engine`] and exposes
//! them through the `causantic` binary.

pub mod config;
pub mod engine;
pub mod error;
pub mod output;

pub use config::CausanticConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
