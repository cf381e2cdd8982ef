//! Knowledge pack layout: the base layer, declared contexts, and the
//! partition keys both stores use.
//!
//! A pack is a directory:
//!
//! ```text
//! <root>/                               base markdown
//! <root>/embeddings/                    base embedding sources
//! <root>/contexts/<ctx>/                context markdown
//! <root>/contexts/<ctx>/embeddings/     context embedding sources
//! <root>/knowledge-pack.toml            optional context manifest
//! ```

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{KnowledgePackError, Result};

/// Partition key of the base layer in every store.
pub const BASE_PARTITION: &str = "__base__";

/// Manifest file name at the pack root.
pub const MANIFEST_FILE: &str = "knowledge-pack.toml";

pub const CONTEXTS_DIR: &str = "contexts";
pub const EMBEDDINGS_DIR: &str = "embeddings";

/// The slice of a store owned by the base layer or by one context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Base,
    Context(String),
}

impl Partition {
    pub fn context(name: impl Into<String>) -> Self {
        Self::Context(name.into())
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Base => BASE_PARTITION,
            Self::Context(name) => name,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.key())
    }
}

/// A named context and where it lives under `<root>/contexts/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDescriptor {
    pub name: String,
    pub relative_path: PathBuf,
}

impl ContextDescriptor {
    pub fn new(name: impl Into<String>, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            relative_path: relative_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    contexts: Vec<ManifestContext>,
}

#[derive(Debug, Deserialize)]
struct ManifestContext {
    name: String,
    /// Defaults to `name`.
    path: Option<PathBuf>,
}

/// The validated shape of a knowledge pack on disk. Immutable once opened.
#[derive(Debug, Clone)]
pub struct KnowledgePackDescriptor {
    root: PathBuf,
    contexts: Vec<ContextDescriptor>,
}

impl KnowledgePackDescriptor {
    /// Open the pack at `root` and discover its contexts.
    ///
    /// A missing root is fatal ([`KnowledgePackError::PackNotFound`]). A missing
    /// `contexts/` directory just yields no contexts.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(KnowledgePackError::PackNotFound {
                path: root.to_path_buf(),
            });
        }

        let manifest_path = root.join(MANIFEST_FILE);
        let contexts = if manifest_path.is_file() {
            read_manifest(&manifest_path)?
        } else {
            scan_contexts_dir(&root.join(CONTEXTS_DIR))?
        };

        Self::from_parts(root, contexts)
    }

    /// Build a descriptor from an explicit context list, validating it.
    pub fn from_parts(root: impl Into<PathBuf>, contexts: Vec<ContextDescriptor>) -> Result<Self> {
        validate_contexts(&contexts)?;
        let root = root.into();
        tracing::debug!(
            root = %root.display(),
            contexts = contexts.len(),
            "knowledge pack descriptor ready"
        );
        Ok(Self { root, contexts })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contexts(&self) -> &[ContextDescriptor] {
        &self.contexts
    }

    pub fn context(&self, name: &str) -> Option<&ContextDescriptor> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.context(name).is_some()
    }

    pub fn base_markdown_path(&self) -> PathBuf {
        self.root.clone()
    }

    pub fn base_embeddings_path(&self) -> PathBuf {
        self.root.join(EMBEDDINGS_DIR)
    }

    pub fn context_markdown_path(&self, context: &ContextDescriptor) -> PathBuf {
        self.root.join(CONTEXTS_DIR).join(&context.relative_path)
    }

    pub fn context_embeddings_path(&self, context: &ContextDescriptor) -> PathBuf {
        self.context_markdown_path(context).join(EMBEDDINGS_DIR)
    }
}

fn read_manifest(path: &Path) -> Result<Vec<ContextDescriptor>> {
    let manifest_err = |message: String| KnowledgePackError::Manifest {
        path: path.to_path_buf(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| manifest_err(e.to_string()))?;
    let manifest: Manifest = toml::from_str(&contents).map_err(|e| manifest_err(e.to_string()))?;

    Ok(manifest
        .contexts
        .into_iter()
        .map(|c| {
            let relative_path = c.path.unwrap_or_else(|| PathBuf::from(&c.name));
            ContextDescriptor::new(c.name, relative_path)
        })
        .collect())
}

/// Every non-hidden sub-directory of `contexts/`, sorted by name.
fn scan_contexts_dir(dir: &Path) -> Result<Vec<ContextDescriptor>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "no contexts directory");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(KnowledgePackError::InvalidContext {
                name: CONTEXTS_DIR.into(),
                reason: format!("cannot read {}: {e}", dir.display()),
            })
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| ContextDescriptor::new(name.clone(), name))
        .collect())
}

fn validate_contexts(contexts: &[ContextDescriptor]) -> Result<()> {
    let invalid = |name: &str, reason: &str| KnowledgePackError::InvalidContext {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut seen = HashSet::new();
    for context in contexts {
        let name = context.name.as_str();
        if name.trim().is_empty() {
            return Err(invalid(name, "name must not be empty"));
        }
        if name == BASE_PARTITION {
            return Err(invalid(name, "name is reserved for the base layer"));
        }
        if !seen.insert(name) {
            return Err(invalid(name, "declared more than once"));
        }
        let path = &context.relative_path;
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.as_os_str().is_empty() || escapes {
            return Err(invalid(name, "path must be relative to the contexts directory"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keys() {
        assert_eq!(Partition::Base.key(), "__base__");
        assert_eq!(Partition::context("team-a").key(), "team-a");
        assert_eq!(format!("{:>10}", Partition::Base), "  __base__");
    }

    #[test]
    fn layout_paths() {
        let ctx = ContextDescriptor::new("Team A", "team-a");
        let pack = KnowledgePackDescriptor::from_parts("/packs/demo", vec![ctx.clone()]).unwrap();
        assert_eq!(pack.base_markdown_path(), PathBuf::from("/packs/demo"));
        assert_eq!(pack.base_embeddings_path(), PathBuf::from("/packs/demo/embeddings"));
        assert_eq!(
            pack.context_markdown_path(&ctx),
            PathBuf::from("/packs/demo/contexts/team-a")
        );
        assert_eq!(
            pack.context_embeddings_path(&ctx),
            PathBuf::from("/packs/demo/contexts/team-a/embeddings")
        );
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let reserved = vec![ContextDescriptor::new(BASE_PARTITION, "x")];
        assert!(matches!(
            KnowledgePackDescriptor::from_parts("/p", reserved),
            Err(KnowledgePackError::InvalidContext { .. })
        ));

        let dupes = vec![
            ContextDescriptor::new("a", "a"),
            ContextDescriptor::new("a", "b"),
        ];
        assert!(KnowledgePackDescriptor::from_parts("/p", dupes).is_err());
    }

    #[test]
    fn rejects_paths_escaping_contexts_dir() {
        for path in ["../secrets", "/etc", ""] {
            let contexts = vec![ContextDescriptor::new("a", path)];
            assert!(
                KnowledgePackDescriptor::from_parts("/p", contexts).is_err(),
                "{path:?} should be rejected"
            );
        }
        let nested = vec![ContextDescriptor::new("a", "teams/a")];
        assert!(KnowledgePackDescriptor::from_parts("/p", nested).is_ok());
    }
}
