//! Embedding index: chunked pack content and its vectors, partitioned like
//! the markdown store.
//!
//! Sources are the top-level `*.md` / `*.txt` files of a partition's
//! `embeddings/` directory. Each document is split into paragraph-aligned
//! chunks, embedded in batches, and written to SQLite. Reloading a partition
//! replaces it in a single transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::IndexOptions;
use crate::db;
use crate::embedding::EmbeddingProvider;
use crate::error::LoadError;
use crate::markdown::{self, KnowledgeDocument};
use crate::pack::Partition;

/// File extensions read from an `embeddings/` directory.
pub const SOURCE_EXTENSIONS: [&str; 2] = ["md", "txt"];

const BATCH_SIZE: usize = 32;

/// An index that accepts base and per-context embedding loads.
pub trait KnowledgeIndex {
    /// Vectorize `path` into the base partition. Returns the document count.
    fn load_knowledge_base(&mut self, path: &Path) -> Result<usize, LoadError>;

    /// Vectorize `path` into the partition of context `name`. Returns the document count.
    fn load_knowledge_context(&mut self, name: &str, path: &Path) -> Result<usize, LoadError>;

    /// Drop every partition whose key is not in `keys`. Returns how many were dropped.
    ///
    /// Indexes that start empty on every run have nothing to prune.
    fn retain_partitions(&mut self, keys: &[&str]) -> Result<usize, LoadError> {
        let _ = keys;
        Ok(0)
    }
}

/// Summary of one loaded partition.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPartition {
    pub key: String,
    pub source_path: PathBuf,
    pub document_count: usize,
    pub chunk_count: usize,
    /// `None` for an empty partition.
    pub dimensions: Option<usize>,
    pub model: String,
    pub loaded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedChunk {
    pub id: String,
    pub document: String,
    pub ordinal: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub chunk: IndexedChunk,
    /// Cosine distance; lower is closer.
    pub distance: f64,
}

struct PendingChunk {
    document: String,
    ordinal: usize,
    content: String,
}

pub struct EmbeddingIndex {
    conn: Connection,
    provider: Arc<dyn EmbeddingProvider>,
    max_chunk_chars: usize,
}

impl EmbeddingIndex {
    /// Open the index described by `options`, backed by `provider`.
    pub fn open(provider: Arc<dyn EmbeddingProvider>, options: &IndexOptions) -> Result<Self> {
        let conn = match &options.path {
            Some(path) => db::open_database(path)?,
            None => db::open_memory_database()?,
        };

        let model = provider.model_id();
        if let Some(stored) = db::get_embedding_model(&conn)? {
            if stored != model {
                tracing::warn!(
                    stored = %stored,
                    configured = %model,
                    "embedding model changed; partitions are re-embedded as they reload"
                );
            }
        }
        db::set_embedding_model(&conn, model)?;

        Ok(Self {
            conn,
            provider,
            max_chunk_chars: options.max_chunk_chars.max(1),
        })
    }

    /// Read, chunk and embed `path`, then replace `partition` with the result.
    ///
    /// Embedding happens before the transaction opens, so a failure leaves the
    /// previous contents of the partition in place. A missing source removes
    /// the partition.
    pub fn load_partition(&mut self, partition: &Partition, path: &Path) -> Result<usize, LoadError> {
        let documents = match markdown::read_documents(path, &SOURCE_EXTENSIONS) {
            Ok(documents) => documents,
            Err(err) if err.is_not_found() => {
                self.remove_partition(partition.key())?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let pending = chunk_documents(&documents, self.max_chunk_chars);
        let vectors = self.embed_chunks(&pending)?;
        let dimensions = vectors.first().map(Vec::len);

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM partitions WHERE key = ?1", [partition.key()])?;
        tx.execute(
            "INSERT INTO partitions (key, source_path, document_count, chunk_count, dimensions, model, loaded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                partition.key(),
                path.to_string_lossy().into_owned(),
                documents.len() as i64,
                pending.len() as i64,
                dimensions.map(|d| d as i64),
                self.provider.model_id(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO chunks (id, partition, document, ordinal, content, embedding) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (chunk, vector) in pending.iter().zip(&vectors) {
                insert.execute(params![
                    uuid::Uuid::now_v7().to_string(),
                    partition.key(),
                    chunk.document,
                    chunk.ordinal as i64,
                    chunk.content,
                    db::embedding_to_blob(vector),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            partition = %partition,
            documents = documents.len(),
            chunks = pending.len(),
            "embedding partition loaded"
        );
        Ok(documents.len())
    }

    /// Delete partition `key` and its chunks. Returns whether it existed.
    pub fn remove_partition(&mut self, key: &str) -> rusqlite::Result<bool> {
        let removed = self.conn.execute("DELETE FROM partitions WHERE key = ?1", [key])?;
        if removed > 0 {
            tracing::info!(partition = %key, "stale embedding partition removed");
        }
        Ok(removed > 0)
    }

    fn embed_chunks(&self, pending: &[PendingChunk]) -> Result<Vec<Vec<f32>>, LoadError> {
        let mut vectors = Vec::with_capacity(pending.len());
        for batch in pending.chunks(BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embedded = self
                .provider
                .embed_batch(&texts)
                .map_err(LoadError::Embedding)?;
            if embedded.len() != texts.len() {
                return Err(LoadError::Embedding(anyhow::anyhow!(
                    "provider returned {} vectors for {} chunks",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
        }

        if let Some(first) = vectors.first() {
            let dims = first.len();
            if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
                return Err(LoadError::Embedding(anyhow::anyhow!(
                    "provider returned vectors of inconsistent dimensions"
                )));
            }
        }
        Ok(vectors)
    }

    pub fn partition(&self, key: &str) -> rusqlite::Result<Option<IndexPartition>> {
        self.conn
            .query_row(
                "SELECT key, source_path, document_count, chunk_count, dimensions, model, loaded_at \
                 FROM partitions WHERE key = ?1",
                [key],
                |row| {
                    Ok(IndexPartition {
                        key: row.get(0)?,
                        source_path: PathBuf::from(row.get::<_, String>(1)?),
                        document_count: row.get::<_, i64>(2)? as usize,
                        chunk_count: row.get::<_, i64>(3)? as usize,
                        dimensions: row.get::<_, Option<i64>>(4)?.map(|d| d as usize),
                        model: row.get(5)?,
                        loaded_at: row.get(6)?,
                    })
                },
            )
            .optional()
    }

    pub fn contains(&self, key: &str) -> rusqlite::Result<bool> {
        Ok(self.partition(key)?.is_some())
    }

    pub fn partition_keys(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM partitions ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    pub fn chunks(&self, key: &str) -> rusqlite::Result<Vec<IndexedChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document, ordinal, content FROM chunks WHERE partition = ?1 \
             ORDER BY document, ordinal",
        )?;
        let chunks = stmt
            .query_map([key], |row| {
                Ok(IndexedChunk {
                    id: row.get(0)?,
                    document: row.get(1)?,
                    ordinal: row.get::<_, i64>(2)? as usize,
                    content: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Chunks of partition `key` closest to `query` by cosine distance.
    ///
    /// Returns an empty list for an absent or empty partition.
    pub fn nearest(&self, key: &str, query: &str, limit: usize) -> Result<Vec<ChunkMatch>> {
        let Some(dimensions) = self.partition(key)?.and_then(|p| p.dimensions) else {
            return Ok(Vec::new());
        };

        let query_vec = self.provider.embed(query)?;
        anyhow::ensure!(
            query_vec.len() == dimensions,
            "query has {} dimensions, partition {key} has {dimensions}",
            query_vec.len()
        );

        let mut stmt = self.conn.prepare(
            "SELECT id, document, ordinal, content, vec_distance_cosine(embedding, ?1) AS distance \
             FROM chunks WHERE partition = ?2 ORDER BY distance LIMIT ?3",
        )?;
        let matches = stmt
            .query_map(
                params![db::embedding_to_blob(&query_vec), key, limit as i64],
                |row| {
                    Ok(ChunkMatch {
                        chunk: IndexedChunk {
                            id: row.get(0)?,
                            document: row.get(1)?,
                            ordinal: row.get::<_, i64>(2)? as usize,
                            content: row.get(3)?,
                        },
                        distance: row.get(4)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }
}

impl KnowledgeIndex for EmbeddingIndex {
    fn load_knowledge_base(&mut self, path: &Path) -> Result<usize, LoadError> {
        self.load_partition(&Partition::Base, path)
    }

    fn load_knowledge_context(&mut self, name: &str, path: &Path) -> Result<usize, LoadError> {
        self.load_partition(&Partition::context(name), path)
    }

    fn retain_partitions(&mut self, keys: &[&str]) -> Result<usize, LoadError> {
        let mut dropped = 0;
        for key in self.partition_keys()? {
            if !keys.contains(&key.as_str()) && self.remove_partition(&key)? {
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

fn chunk_documents(documents: &[KnowledgeDocument], max_chars: usize) -> Vec<PendingChunk> {
    documents
        .iter()
        .flat_map(|doc| {
            chunk_text(&doc.content, max_chars)
                .into_iter()
                .enumerate()
                .map(|(ordinal, content)| PendingChunk {
                    document: doc.key.clone(),
                    ordinal,
                    content,
                })
        })
        .collect()
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are packed together while they fit; a
/// paragraph longer than the limit is cut on character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let len = paragraph.chars().count();
        let joined_len = if current.is_empty() { len } else { current_len + 2 + len };

        if joined_len <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_len = joined_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if len <= max_chars {
            current.push_str(paragraph);
            current_len = len;
        } else {
            let chars: Vec<char> = paragraph.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|piece| piece.iter().collect::<String>()));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_under_limit() {
        let chunks = chunk_text("alpha\n\nbeta\n\ngamma", 12);
        assert_eq!(chunks, vec!["alpha\n\nbeta", "gamma"]);
    }

    #[test]
    fn splits_oversized_paragraph() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn respects_multibyte_boundaries() {
        let chunks = chunk_text("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("  \n\n \n\n", 100).is_empty());
    }
}
