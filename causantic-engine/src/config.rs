//! Layered configuration: a config file (JSON or TOML, detected by
//! extension), overridden by `CAUSANTIC_*` environment variables,
//! overridden in turn by explicit CLI flags. Mirrors the teacher crate's
//! file-then-env-then-flag layering, minus the interactive wizard.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Root configuration for the engine: where its state lives, how it's
/// encrypted, and the tunables the retriever/chunker/clusterer/scheduler
/// default to when a caller doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausanticConfig {
    /// Directory holding `store.db` and the packed vector-index file.
    pub data_dir: PathBuf,
    /// Embedding model identifier passed to the configured `Embedder`.
    pub model_id: String,
    /// At-rest encryption settings.
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Chunk-packing tunables.
    #[serde(default)]
    pub chunker: ChunkerSettings,
    /// Retrieval tunables.
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    /// Clusterer tunables.
    #[serde(default)]
    pub clusterer: ClustererSettings,
    /// Maintenance-task tunables.
    #[serde(default)]
    pub maintenance: MaintenanceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// `"chacha20poly1305"` (default) or `"sqlcipher-compat"`.
    pub cipher: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { enabled: false, cipher: "chacha20poly1305".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerSettings {
    pub max_tokens: u32,
    pub include_thinking: bool,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        let defaults = causantic_core::chunker::ChunkerConfig::default();
        Self { max_tokens: defaults.max_tokens, include_thinking: defaults.include_thinking }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub k: usize,
    pub mmr_lambda: f32,
    pub max_chain_depth: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        let defaults = causantic_core::retriever::RetrievalConfig::default();
        Self { k: defaults.k, mmr_lambda: defaults.mmr_lambda, max_chain_depth: defaults.max_chain_depth }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustererSettings {
    pub min_cluster_size: usize,
    pub exemplar_count: usize,
}

impl Default for ClustererSettings {
    fn default() -> Self {
        let defaults = causantic_core::clusterer::ClustererConfig::default();
        Self { min_cluster_size: defaults.min_cluster_size, exemplar_count: defaults.exemplar_count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    /// `refresh-labels` requests allowed per 60-second window.
    pub refresh_labels_per_minute: u32,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self { refresh_labels_per_minute: 30 }
    }
}

impl Default for CausanticConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model_id: "default".to_string(),
            encryption: EncryptionConfig::default(),
            chunker: ChunkerSettings::default(),
            retrieval: RetrievalSettings::default(),
            clusterer: ClustererSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("CAUSANTIC_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".causantic"))
}

impl CausanticConfig {
    /// Loads a config file (JSON or TOML, chosen by extension; JSON if
    /// ambiguous) layered on top of the defaults, then applies
    /// `CAUSANTIC_*` environment overrides.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if the file can't be parsed,
    /// or [`EngineError::Io`] if it can't be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if is_toml {
            toml::from_str(&content).map_err(|e| EngineError::Configuration(format!("{}: {e}", path.display())))
        } else {
            serde_json::from_str(&content).map_err(|e| EngineError::Configuration(format!("{}: {e}", path.display())))
        }
    }

    fn from_default_locations() -> Result<Self> {
        for candidate in ["causantic.toml", "causantic.json", ".causantic.toml", ".causantic.json"] {
            let candidate = Path::new(candidate);
            if candidate.exists() {
                return Self::from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CAUSANTIC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(model_id) = std::env::var("CAUSANTIC_MODEL_ID") {
            self.model_id = model_id;
        }
        if let Ok(flag) = std::env::var("CAUSANTIC_ENCRYPTION_ENABLED") {
            self.encryption.enabled = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
    }

    /// Validates cross-field invariants a caller could otherwise hit as
    /// a confusing storage-layer failure.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] on the first invariant
    /// violated.
    pub fn validate(&self) -> Result<()> {
        Validator::new(self).run()
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("store.db")
    }

    pub fn vector_index_path(&self) -> PathBuf {
        self.data_dir.join("vectors.cavi")
    }
}

/// Runs the validation rules against a loaded config, collecting the
/// first failure. Mirrors the teacher crate's rule-module shape at a
/// scale that fits the causantic config's smaller surface.
struct Validator<'a> {
    config: &'a CausanticConfig,
}

impl<'a> Validator<'a> {
    fn new(config: &'a CausanticConfig) -> Self {
        Self { config }
    }

    fn run(&self) -> Result<()> {
        self.check_model_id()?;
        self.check_chunker()?;
        self.check_retrieval()?;
        self.check_clusterer()?;
        self.check_encryption()?;
        Ok(())
    }

    fn fail(message: impl Into<String>) -> Result<()> {
        Err(EngineError::Configuration(message.into()))
    }

    fn check_model_id(&self) -> Result<()> {
        if self.config.model_id.trim().is_empty() {
            return Self::fail("model_id must not be empty");
        }
        Ok(())
    }

    fn check_chunker(&self) -> Result<()> {
        if self.config.chunker.max_tokens == 0 {
            return Self::fail("chunker.max_tokens must be greater than zero");
        }
        Ok(())
    }

    fn check_retrieval(&self) -> Result<()> {
        if self.config.retrieval.k == 0 {
            return Self::fail("retrieval.k must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.config.retrieval.mmr_lambda) {
            return Self::fail("retrieval.mmr_lambda must be within [0.0, 1.0]");
        }
        if self.config.retrieval.max_chain_depth == 0 {
            return Self::fail("retrieval.max_chain_depth must be greater than zero");
        }
        Ok(())
    }

    fn check_clusterer(&self) -> Result<()> {
        if self.config.clusterer.min_cluster_size < 2 {
            return Self::fail("clusterer.min_cluster_size must be at least 2");
        }
        if self.config.clusterer.exemplar_count == 0 {
            return Self::fail("clusterer.exemplar_count must be greater than zero");
        }
        Ok(())
    }

    fn check_encryption(&self) -> Result<()> {
        if self.config.encryption.enabled
            && self.config.encryption.cipher != "chacha20poly1305"
            && self.config.encryption.cipher != "sqlcipher-compat"
        {
            return Self::fail(format!("encryption.cipher '{}' is not recognized", self.config.encryption.cipher));
        }
        Ok(())
    }
}
