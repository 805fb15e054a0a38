//! Error kinds for the causal-memory engine.
//!
//! Mirrors the abstract kinds from the engine's error-handling design:
//! `NotFound`, `InvalidInput`, `Transient`, `Corruption`, `CryptoError`,
//! and `External`. Each variant reports whether retrying with backoff is
//! worthwhile via [`Error::is_recoverable`], which the retry policy in
//! [`crate::retry`] consults.

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the store, vector index, parser, chunker, edge
/// builder, clusterer, and retriever.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested chunk, session, or cluster does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed query, filter, or configuration value supplied by a caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network, database-busy, or rate-limited failure; safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Schema/version mismatch, torn row, or embedding dimension mismatch.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Missing encryption key, cipher mismatch, or failed decrypt.
    #[error("crypto error: {0}")]
    CryptoError(String),

    /// Embedder or labeler (external collaborator) failure.
    #[error("external error: {0}")]
    External(String),

    /// Underlying storage engine failure not otherwise classified.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O failure reading a transcript or persisted file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether this error is worth retrying with exponential backoff.
    ///
    /// `Transient` failures are retried; `Corruption` and `CryptoError` are
    /// fatal for the affected operation; `NotFound`/`InvalidInput` are
    /// caller errors, not transient ones.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::External(_))
    }

    /// Maps this error onto one of the engine's CLI exit codes: 1
    /// operational, 2 user/argument, 3 configuration.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 2,
            Error::Configuration(_) => 3,
            _ => 1,
        }
    }
}
