pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) an index database at the given path with sqlite-vec
/// loaded and the schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open index database at {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    prepare(&conn)?;

    tracing::info!(path = %path.display(), "index database initialized");
    Ok(conn)
}

/// Open a process-local in-memory index database.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(conn).context("failed to initialize schema")?;
    Ok(())
}

/// Version string reported by sqlite-vec.
pub fn sqlite_vec_version(conn: &Connection) -> rusqlite::Result<String> {
    conn.query_row("SELECT vec_version()", [], |row| row.get(0))
}

/// Get the embedding model that produced the stored vectors, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM index_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

/// Record the embedding model that produced the stored vectors.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Encode an f32 vector as the little-endian blob sqlite-vec expects.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_file_in_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("index.db");
        assert!(!db_path.exists());

        let conn = open_database(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(!sqlite_vec_version(&conn).unwrap().is_empty());
    }

    #[test]
    fn embedding_model_round_trips() {
        let conn = open_memory_database().unwrap();
        assert_eq!(get_embedding_model(&conn).unwrap(), None);

        set_embedding_model(&conn, "all-MiniLM-L6-v2").unwrap();
        set_embedding_model(&conn, "nomic-embed-text").unwrap();
        assert_eq!(
            get_embedding_model(&conn).unwrap().as_deref(),
            Some("nomic-embed-text")
        );
    }

    #[test]
    fn blob_encoding_matches_sqlite_vec() {
        let conn = open_memory_database().unwrap();
        let blob = embedding_to_blob(&[1.0, 0.0, 0.0]);
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());

        let distance: f64 = conn
            .query_row(
                "SELECT vec_distance_cosine(?1, ?2)",
                rusqlite::params![blob, embedding_to_blob(&[0.0, 1.0, 0.0])],
                |row| row.get(0),
            )
            .unwrap();
        assert!((distance - 1.0).abs() < 1e-6);
    }
}
