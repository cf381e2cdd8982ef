#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use kpack::config::{ConfigSource, IndexOptions, KpackConfig};
use kpack::embedding::{l2_normalize, EmbeddingProvider};
use kpack::error::Result;
use kpack::events::EventSink;
use kpack::index::EmbeddingIndex;
use kpack::markdown::MarkdownKnowledgeStore;
use kpack::KnowledgeOrchestrator;
use tempfile::TempDir;

pub const HASH_DIM: usize = 16;

/// Deterministic bag-of-words embedder: each lowercase word bumps one of
/// `HASH_DIM` buckets. Texts sharing words land close together.
pub struct HashEmbeddingProvider;

impl HashEmbeddingProvider {
    fn bucket(word: &str) -> usize {
        let hash = word
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        hash as usize % HASH_DIM
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; HASH_DIM];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[Self::bucket(&word.to_lowercase())] += 1.0;
                }
                // keep blank chunks off the origin
                if v.iter().all(|x| *x == 0.0) {
                    v[0] = 1.0;
                }
                l2_normalize(&v)
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        "hash-16"
    }
}

/// A knowledge pack laid out in a temp directory.
pub struct TestPack {
    pub dir: TempDir,
}

impl TestPack {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn file(&self, relative: &str, contents: &str) -> &Self {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
        self
    }

    pub fn mkdir(&self, relative: &str) -> &Self {
        std::fs::create_dir_all(self.root().join(relative)).unwrap();
        self
    }

    pub fn manifest(&self, toml: &str) -> &Self {
        self.file("knowledge-pack.toml", toml)
    }

    pub fn config(&self) -> KpackConfig {
        config_for(self.root())
    }
}

/// Default config pointed at `root`, with an in-memory index.
pub fn config_for(root: &Path) -> KpackConfig {
    let mut config = KpackConfig::default();
    config.pack.path = root.to_string_lossy().into_owned();
    config.index.path = String::new();
    config
}

pub fn hash_index(options: &IndexOptions) -> anyhow::Result<EmbeddingIndex> {
    EmbeddingIndex::open(Arc::new(HashEmbeddingProvider), options)
}

/// Assemble `config` with real stores and the hash embedder, honouring the
/// configured index location.
pub fn assemble_with_fake(config: &KpackConfig, sink: &dyn EventSink) -> Result<KnowledgeOrchestrator> {
    let options = config.index_options();
    KnowledgeOrchestrator::assemble(
        config,
        MarkdownKnowledgeStore::new(),
        |_| hash_index(&options),
        sink,
    )
}
