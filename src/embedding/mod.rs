//! Text-to-vector embedding clients.
//!
//! Provides the [`EmbeddingProvider`] trait, a local ONNX implementation
//! (all-MiniLM-L6-v2, 384 dimensions, L2-normalized) and an Ollama client.
//! Providers are created via [`create_provider`] from an [`EmbeddingModelSpec`].

pub mod local;
pub mod ollama;

use anyhow::Result;
use std::path::PathBuf;

/// Which backend produces embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// ONNX Runtime with model files under the cache directory.
    Local,
    /// HTTP calls to an Ollama server.
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "ollama" => Ok(Self::Ollama),
            _ => Err(format!(
                "unknown embedding provider: {s}. Supported: local, ollama"
            )),
        }
    }
}

/// A resolved embedding model selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingModelSpec {
    pub provider: ProviderKind,
    pub model: String,
    /// Directory holding `model.onnx` and `tokenizer.json` for the local provider.
    pub cache_dir: PathBuf,
    /// Ollama server URL.
    pub base_url: String,
}

/// Trait for embedding text into vectors.
///
/// All methods are synchronous. Callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
    }

    /// Embed a batch of text strings, one vector per input in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Identifier of the model producing the vectors, recorded in the index.
    fn model_id(&self) -> &str;
}

/// Create an embedding provider from a model spec.
///
/// The local provider returns an error if model files are not found; run
/// `kpack model download` first.
pub fn create_provider(spec: &EmbeddingModelSpec) -> Result<Box<dyn EmbeddingProvider>> {
    let provider: Box<dyn EmbeddingProvider> = match spec.provider {
        ProviderKind::Local => Box::new(local::LocalEmbeddingProvider::new(spec)?),
        ProviderKind::Ollama => Box::new(ollama::OllamaEmbeddingProvider::new(spec)?),
    };
    tracing::info!(provider = %spec.provider, model = %spec.model, "embedding provider ready");
    Ok(provider)
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
