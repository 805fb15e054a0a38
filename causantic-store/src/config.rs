//! Connection-time configuration for [`crate::CausanticStore`].

use std::path::PathBuf;

use crate::encryption::KeySources;

/// Which cipher protects the database file at rest, mirroring the
/// engine's documented default plus an escape hatch for databases
/// migrated in from a `sqlcipher`-keyed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cipher {
    /// ChaCha20-Poly1305, the engine's default.
    #[default]
    ChaCha20Poly1305,
    /// Accept a `sqlcipher`-compatible key for databases created outside
    /// the engine.
    SqlCipherCompat,
}

/// At-rest encryption settings. When `enabled`, the cipher pragma MUST
/// be applied before any other pragma or query; failing to resolve a
/// key is a fatal [`causantic_core::error::Error::CryptoError`] at open
/// time.
#[derive(Debug, Clone, Default)]
pub struct EncryptionSettings {
    pub enabled: bool,
    pub cipher: Cipher,
    pub key_sources: KeySources,
}

/// Configuration the store needs to open its database file.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database file, inside the engine's configured root.
    pub db_path: PathBuf,
    /// At-rest encryption settings.
    pub encryption: EncryptionSettings,
    /// Busy-timeout applied before a write is treated as lock contention
    /// and surfaced as [`causantic_core::error::Error::Transient`].
    pub busy_timeout_ms: u32,
}

impl StoreConfig {
    /// Builds an unencrypted config pointing at `db_path` with the
    /// default busy timeout.
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), encryption: EncryptionSettings::default(), busy_timeout_ms: 5_000 }
    }

    /// Enables at-rest encryption with the given key sources.
    #[must_use]
    pub fn with_encryption(mut self, cipher: Cipher, key_sources: KeySources) -> Self {
        self.encryption = EncryptionSettings { enabled: true, cipher, key_sources };
        self
    }
}
