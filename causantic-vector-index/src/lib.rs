//! Flat-file packed vector index: a persistent dense-vector store keyed
//! by chunk id, with exact brute-force cosine KNN. The on-disk layout is
//! a fixed header, an id index, and a row-major matrix of little-endian
//! `f32`s — see [`format`] for the exact bytes.
//!
//! State lives in memory and is mirrored to that single file on a
//! background interval, the same shape the teacher crate used for its
//! redb-backed cache layer, just over a flat file instead of a
//! transactional embedded database.

mod format;
mod index;
mod persistence;

pub use index::PackedVectorIndex;
pub use persistence::{PersistenceConfig, PersistenceManager};
