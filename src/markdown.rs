//! Markdown knowledge documents, partitioned by base layer and context.
//!
//! Each partition is read from the top level of one directory: every `*.md`
//! file becomes a [`KnowledgeDocument`]. Optional YAML frontmatter supplies
//! `key`, `title` and `description`; otherwise the file stem and first
//! heading are used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::pack::Partition;

/// A store that accepts base and per-context markdown loads.
pub trait MarkdownStore {
    /// Load `path` into the base partition. Returns the document count.
    fn load_base_knowledge(&mut self, path: &Path) -> Result<usize, LoadError>;

    /// Load `path` into the partition of context `name`. Returns the document count.
    fn load_context_knowledge(&mut self, name: &str, path: &Path) -> Result<usize, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeDocument {
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Body with frontmatter removed.
    pub content: String,
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    key: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarkdownPartition {
    pub source: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub documents: Vec<KnowledgeDocument>,
}

#[derive(Debug, Default)]
pub struct MarkdownKnowledgeStore {
    partitions: BTreeMap<String, MarkdownPartition>,
}

impl MarkdownKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `path` and replace `partition` with its documents.
    ///
    /// On error the previous contents of the partition are left untouched.
    pub fn load_partition(&mut self, partition: &Partition, path: &Path) -> Result<usize, LoadError> {
        let documents = read_documents(path, &["md"])?;
        let count = documents.len();
        self.partitions.insert(
            partition.key().to_string(),
            MarkdownPartition {
                source: path.to_path_buf(),
                loaded_at: Utc::now(),
                documents,
            },
        );
        tracing::info!(partition = %partition, documents = count, "markdown partition loaded");
        Ok(count)
    }

    pub fn partition(&self, key: &str) -> Option<&MarkdownPartition> {
        self.partitions.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.partitions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    pub fn documents(&self, key: &str) -> &[KnowledgeDocument] {
        self.partitions
            .get(key)
            .map(|p| p.documents.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl MarkdownStore for MarkdownKnowledgeStore {
    fn load_base_knowledge(&mut self, path: &Path) -> Result<usize, LoadError> {
        self.load_partition(&Partition::Base, path)
    }

    fn load_context_knowledge(&mut self, name: &str, path: &Path) -> Result<usize, LoadError> {
        self.load_partition(&Partition::context(name), path)
    }
}

/// Parse every top-level file in `dir` whose extension is in `extensions`,
/// ordered by file name.
pub fn read_documents(dir: &Path, extensions: &[&str]) -> Result<Vec<KnowledgeDocument>, LoadError> {
    if dir.exists() && !dir.is_dir() {
        return Err(LoadError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(dir).map_err(|e| LoadError::from_io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| LoadError::from_io(dir, e))?.path();
        let wanted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)));
        if wanted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let raw = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(file = %path.display(), bytes = raw.len(), "read knowledge document");
            parse_document(&path, &raw)
        })
        .collect()
}

/// Parse one markdown file, splitting off optional `---` frontmatter.
pub fn parse_document(path: &Path, raw: &str) -> Result<KnowledgeDocument, LoadError> {
    let frontmatter_err = |message: String| LoadError::Frontmatter {
        path: path.to_path_buf(),
        message,
    };

    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let (meta, body) = match split_frontmatter(raw) {
        Some(Ok((yaml, body))) if yaml.trim().is_empty() => (Frontmatter::default(), body),
        Some(Ok((yaml, body))) => {
            let meta: Frontmatter =
                serde_yaml::from_str(yaml).map_err(|e| frontmatter_err(e.to_string()))?;
            (meta, body)
        }
        Some(Err(message)) => return Err(frontmatter_err(message)),
        None => (Frontmatter::default(), raw),
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let content = body.trim().to_string();
    let title = meta
        .title
        .or_else(|| first_heading(&content))
        .unwrap_or_else(|| stem.clone());

    Ok(KnowledgeDocument {
        key: meta.key.unwrap_or(stem),
        title,
        description: meta.description,
        content,
        path: path.to_path_buf(),
    })
}

/// `None` when there is no frontmatter, `Some(Err)` when it is never closed.
fn split_frontmatter(raw: &str) -> Option<Result<(&str, &str), String>> {
    let rest = raw.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(Ok((&rest[..offset], &rest[offset + line.len()..])));
        }
        offset += line.len();
    }
    Some(Err("unclosed frontmatter".to_string()))
}

fn first_heading(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}
