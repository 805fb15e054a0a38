//! At-rest encryption key resolution. When enabled, the database MUST be
//! opened with a cipher pragma before any other pragma or query; failing
//! to obtain a key is fatal at open time, per spec section 4.1.
//!
//! The key itself can come from three places, tried in the order the
//! caller configures: the OS keystore (via `keyring`), an environment
//! variable, or an interactive prompt. A copy of the resolved key is
//! optionally sealed with ChaCha20-Poly1305 under a passphrase and
//! written to a key-backup file, so a keystore wipe doesn't strand an
//! encrypted database.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use std::io::Write;
use std::path::Path;

use causantic_core::error::{Error, Result};

const KEYRING_SERVICE: &str = "causantic";
const KEYRING_USER: &str = "store-encryption-key";
const ENV_VAR: &str = "CAUSANTIC_ENCRYPTION_KEY";

/// Four-byte magic prefixing an encrypted key-backup archive.
pub const KEY_BACKUP_MAGIC: &[u8; 4] = b"ECM\0";

/// Where the at-rest encryption key is read from, tried in order until
/// one succeeds.
#[derive(Debug, Clone, Default)]
pub struct KeySources {
    /// Try the OS keystore first (`keyring` crate).
    pub try_keystore: bool,
    /// Then an environment variable.
    pub try_env_var: bool,
    /// Finally, an interactive prompt (only meaningful for a CLI caller).
    pub try_prompt: bool,
}

impl KeySources {
    /// All three sources, in the spec's enumerated order.
    #[must_use]
    pub fn all() -> Self {
        Self { try_keystore: true, try_env_var: true, try_prompt: true }
    }
}

/// Resolves the at-rest encryption key from the configured sources.
///
/// # Errors
/// Returns [`Error::CryptoError`] if every configured source fails to
/// produce a key; this is fatal at database-open time.
pub fn resolve_key(sources: &KeySources) -> Result<String> {
    if sources.try_keystore {
        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
            if let Ok(key) = entry.get_password() {
                return Ok(key);
            }
        }
    }
    if sources.try_env_var {
        if let Ok(key) = std::env::var(ENV_VAR) {
            if !key.is_empty() {
                return Ok(key);
            }
        }
    }
    if sources.try_prompt {
        if let Ok(key) = prompt_for_key() {
            return Ok(key);
        }
    }
    Err(Error::CryptoError(
        "encryption is enabled but no key could be obtained from the keystore, environment, or prompt".into(),
    ))
}

fn prompt_for_key() -> std::io::Result<String> {
    use std::io::BufRead;
    eprint!("enter the causantic store encryption key: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty key"));
    }
    Ok(trimmed)
}

/// Saves `entry.get_password()` into the OS keystore so future opens
/// don't require the prompt.
///
/// # Errors
/// Returns [`Error::CryptoError`] if the keystore write fails.
pub fn persist_to_keystore(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| Error::CryptoError(format!("failed opening OS keystore: {e}")))?;
    entry.set_password(key).map_err(|e| Error::CryptoError(format!("failed writing to OS keystore: {e}")))
}

/// Seals `key` under `passphrase` with ChaCha20-Poly1305 and writes a
/// `"ECM\0"`-prefixed archive to `path`, so the key survives a keystore
/// wipe.
///
/// # Errors
/// Returns [`Error::CryptoError`] if the passphrase fails to derive a
///32-byte key, or [`Error::Io`] if the write fails.
pub fn write_key_backup(path: &Path, key: &str, passphrase: &[u8; 32]) -> Result<()> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(passphrase));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, key.as_bytes())
        .map_err(|e| Error::CryptoError(format!("failed sealing key backup: {e}")))?;

    let mut bytes = Vec::with_capacity(4 + nonce.len() + ciphertext.len());
    bytes.extend_from_slice(KEY_BACKUP_MAGIC);
    bytes.extend_from_slice(&nonce);
    bytes.extend_from_slice(&ciphertext);
    std::fs::write(path, bytes).map_err(Error::Io)
}

/// Opens and decrypts a key-backup archive written by
/// [`write_key_backup`].
///
/// # Errors
/// Returns [`Error::CryptoError`] if the magic header is missing, the
/// archive is truncated, or decryption fails (wrong passphrase).
pub fn read_key_backup(path: &Path, passphrase: &[u8; 32]) -> Result<String> {
    let bytes = std::fs::read(path).map_err(Error::Io)?;
    if bytes.len() < 4 + 12 || &bytes[0..4] != KEY_BACKUP_MAGIC {
        return Err(Error::CryptoError("key backup file is missing its ECM magic header".into()));
    }
    let nonce = Nonce::from_slice(&bytes[4..16]);
    let ciphertext = &bytes[16..];
    let cipher = ChaCha20Poly1305::new(Key::from_slice(passphrase));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::CryptoError("failed decrypting key backup: wrong passphrase or corrupted file".into()))?;
    String::from_utf8(plaintext).map_err(|_| Error::CryptoError("key backup did not contain valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_backup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ecm");
        let passphrase = [7u8; 32];
        write_key_backup(&path, "super-secret-db-key", &passphrase).unwrap();
        let recovered = read_key_backup(&path, &passphrase).unwrap();
        assert_eq!(recovered, "super-secret-db-key");
    }

    #[test]
    fn key_backup_rejects_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ecm");
        write_key_backup(&path, "super-secret-db-key", &[1u8; 32]).unwrap();
        assert!(read_key_backup(&path, &[2u8; 32]).is_err());
    }

    #[test]
    fn key_backup_rejects_missing_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ecm");
        std::fs::write(&path, b"not an archive").unwrap();
        assert!(read_key_backup(&path, &[1u8; 32]).is_err());
    }

    #[test]
    fn resolve_key_fails_with_no_sources_configured() {
        let result = resolve_key(&KeySources::default());
        assert!(result.is_err());
    }

    #[test]
    fn resolve_key_reads_env_var() {
        std::env::set_var(ENV_VAR, "from-env");
        let result = resolve_key(&KeySources { try_keystore: false, try_env_var: true, try_prompt: false });
        std::env::remove_var(ENV_VAR);
        assert_eq!(result.unwrap(), "from-env");
    }
}
