use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::embedding::{EmbeddingModelSpec, ProviderKind};

/// Default upper bound on the size of a single embedded chunk, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// Where the orchestrator gets its knowledge-pack location and embedding model.
///
/// [`KpackConfig`] is the production implementation; tests and embedders can
/// provide their own.
pub trait ConfigSource {
    /// Root directory of the knowledge pack.
    fn load_knowledge_pack_path(&self) -> PathBuf;

    /// Resolve the embedding model used to vectorize pack content.
    fn load_embedding_model(&self) -> Result<EmbeddingModelSpec>;

    /// Storage options for the embedding index.
    fn index_options(&self) -> IndexOptions {
        IndexOptions::default()
    }
}

/// Resolved embedding-index options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// SQLite file backing the index. `None` keeps the index in memory.
    pub path: Option<PathBuf>,
    pub max_chunk_chars: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            path: None,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KpackConfig {
    pub server: ServerConfig,
    pub pack: PackConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PackConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local` (ONNX Runtime) or `ollama`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    /// Base URL of the Ollama server, used by the `ollama` provider.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Empty keeps the index in memory for the lifetime of the process.
    pub path: String,
    pub max_chunk_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8720,
        }
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        let path = default_kpack_dir()
            .join("pack")
            .to_string_lossy()
            .into_owned();
        Self { path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_kpack_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            base_url: "http://localhost:11434".into(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

impl EmbeddingConfig {
    /// Validate the provider name and expand paths into a model spec.
    pub fn to_spec(&self) -> Result<EmbeddingModelSpec> {
        let provider: ProviderKind = self
            .provider
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        anyhow::ensure!(!self.model.trim().is_empty(), "embedding model must not be empty");

        Ok(EmbeddingModelSpec {
            provider,
            model: self.model.clone(),
            cache_dir: expand_tilde(&self.cache_dir),
            base_url: self.base_url.clone(),
        })
    }
}

/// Returns `~/.kpack/`, or `./.kpack` when no home directory is known.
pub fn default_kpack_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kpack")
}

/// Returns the default config file path: `~/.kpack/config.toml`
pub fn default_config_path() -> PathBuf {
    default_kpack_dir().join("config.toml")
}

impl KpackConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            KpackConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// `KPACK_PACK_PATH`, `KPACK_EMBEDDING_PROVIDER`, `KPACK_EMBEDDING_MODEL`,
    /// `KPACK_INDEX_PATH`, `KPACK_LOG_LEVEL`.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KPACK_PACK_PATH") {
            self.pack.path = val;
        }
        if let Ok(val) = std::env::var("KPACK_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("KPACK_EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = std::env::var("KPACK_INDEX_PATH") {
            self.index.path = val;
        }
        if let Ok(val) = std::env::var("KPACK_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the knowledge pack root, expanding `~` if needed.
    pub fn resolved_pack_path(&self) -> PathBuf {
        expand_tilde(&self.pack.path)
    }
}

impl ConfigSource for KpackConfig {
    fn load_knowledge_pack_path(&self) -> PathBuf {
        self.resolved_pack_path()
    }

    fn load_embedding_model(&self) -> Result<EmbeddingModelSpec> {
        self.embedding.to_spec()
    }

    fn index_options(&self) -> IndexOptions {
        let path = match self.index.path.trim() {
            "" | ":memory:" => None,
            p => Some(expand_tilde(p)),
        };
        IndexOptions {
            path,
            max_chunk_chars: self.index.max_chunk_chars.max(1),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
