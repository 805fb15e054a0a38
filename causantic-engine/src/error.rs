//! The engine's CLI-facing error type, mapping the core error kinds and
//! this crate's own configuration failures onto the exit codes from
//! spec section 6: 0 success, 1 operational, 2 user/argument, 3
//! configuration.

/// Errors surfaced by the engine facade and the `causantic` binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Propagated unchanged from `causantic-core` (store, vector index,
    /// retriever, ingest, or scheduler failures).
    #[error(transparent)]
    Core(#[from] causantic_core::Error),

    /// A config file failed to parse, or a loaded value failed
    /// validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A CLI argument combination was invalid (e.g. a selector with no
    /// session id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reading or writing a file outside the store (config file,
    /// transcript root).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Maps this error onto one of the four CLI exit codes.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Core(inner) => inner.exit_code(),
            EngineError::Configuration(_) => 3,
            EngineError::InvalidArgument(_) => 2,
            EngineError::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
