//! SQLite chunk store with migrations
//!
//! Holds files and their chunks; metadata is stored as JSON text.

use super::{Chunk, ChunkStore, StoreStats};
use crate::error::{ConfluxError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const CHUNK_COLUMNS: &str = "chunk_id, file_id, content, content_type, chunk_index, metadata";

/// SQLite-backed [`ChunkStore`]
pub struct SqliteChunkStore {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteChunkStore {
    /// Open (or create) the store at `db_path` and apply pending migrations
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfluxError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection pragmas must run on every pooled connection
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| ConfluxError::Storage(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| ConfluxError::Storage(format!("Failed to get connection: {}", e)))?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| ConfluxError::Storage(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    fn file_size(&self) -> u64 {
        let wal = PathBuf::from(format!("{}-wal", self.db_path.display()));
        [&self.db_path, &wal]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<(Chunk, Option<String>)> {
    let chunk_index: i64 = row.get(4)?;
    Ok((
        Chunk {
            chunk_id: row.get(0)?,
            file_id: row.get(1)?,
            content: row.get(2)?,
            content_type: row.get(3)?,
            chunk_index: chunk_index.max(0) as usize,
            metadata: HashMap::new(),
        },
        row.get(5)?,
    ))
}

fn decode_metadata((mut chunk, metadata): (Chunk, Option<String>)) -> Result<Chunk> {
    if let Some(json) = metadata {
        chunk.metadata = serde_json::from_str(&json).map_err(|e| ConfluxError::Json {
            source: e,
            context: format!("Invalid metadata for chunk {}", chunk.chunk_id),
        })?;
    }
    Ok(chunk)
}

impl ChunkStore for SqliteChunkStore {
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;

        {
            let mut insert_file = tx.prepare(
                "INSERT OR IGNORE INTO files (file_id, filename, content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_chunk = tx.prepare(
                "INSERT OR IGNORE INTO chunks
                 (chunk_id, file_id, content, content_type, chunk_index, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for chunk in chunks {
                insert_file.execute(params![
                    chunk.file_id,
                    chunk.filename(),
                    chunk.content_type,
                    now
                ])?;

                let metadata = serde_json::to_string(&chunk.metadata).map_err(|e| {
                    ConfluxError::Json {
                        source: e,
                        context: format!("Failed to encode metadata for chunk {}", chunk.chunk_id),
                    }
                })?;
                inserted += insert_chunk.execute(params![
                    chunk.chunk_id,
                    chunk.file_id,
                    chunk.content,
                    chunk.content_type,
                    chunk.chunk_index as i64,
                    metadata
                ])?;
            }
        }

        tx.commit()?;
        if inserted < chunks.len() {
            tracing::debug!(
                "Skipped {} already-stored chunks",
                chunks.len() - inserted
            );
        }
        Ok(inserted)
    }

    fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE chunk_id = ?1",
            CHUNK_COLUMNS
        ))?;

        let mut chunks = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            if let Some(raw) = stmt.query_row(params![id], row_to_chunk).optional()? {
                chunks.push(decode_metadata(raw)?);
            }
        }
        Ok(chunks)
    }

    fn remove_file(&self, file_id: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let known: Option<String> = tx
            .query_row(
                "SELECT file_id FROM files WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Ok(Vec::new());
        }

        let ids = {
            let mut stmt = tx.prepare("SELECT chunk_id FROM chunks WHERE file_id = ?1 ORDER BY seq")?;
            let rows = stmt.query_map(params![file_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        // chunks cascade from files
        tx.execute("DELETE FROM files WHERE file_id = ?1", params![file_id])?;
        tx.commit()?;

        tracing::debug!("Removed file {} with {} chunks from store", file_id, ids.len());
        Ok(ids)
    }

    fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM chunks ORDER BY seq", CHUNK_COLUMNS))?;
        let rows = stmt.query_map([], row_to_chunk)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(decode_metadata(row?)?);
        }
        Ok(chunks)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT content_type, COUNT(*) FROM chunks GROUP BY content_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut content_types = BTreeMap::new();
        for row in rows {
            let (content_type, count) = row?;
            content_types.insert(content_type, count as usize);
        }

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            content_types,
            size_bytes: self.file_size(),
        })
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE files (
        file_id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        content_type TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT NOT NULL UNIQUE,
        file_id TEXT NOT NULL,
        content TEXT NOT NULL,
        content_type TEXT NOT NULL,
        chunk_index INTEGER NOT NULL DEFAULT 0,
        metadata TEXT,  -- JSON metadata
        FOREIGN KEY (file_id) REFERENCES files(file_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_file ON chunks(file_id);
    CREATE INDEX idx_chunks_content_type ON chunks(content_type);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteChunkStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteChunkStore::new(&temp.path().join("chunks.db")).unwrap();
        (temp, store)
    }

    fn sample(chunk_id: &str, file_id: &str, index: usize) -> Chunk {
        Chunk::new(chunk_id, file_id, format!("content of {}", chunk_id), "pdf")
            .with_index(index)
            .with_metadata("filename", format!("{}.pdf", file_id))
    }

    #[test]
    fn test_migrations() {
        let (_temp, store) = store();
        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_add_and_get_preserves_order() {
        let (_temp, store) = store();
        let inserted = store
            .add_chunks(&[sample("a", "f1", 0), sample("b", "f1", 1), sample("c", "f2", 0)])
            .unwrap();
        assert_eq!(inserted, 3);

        let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let chunks = store.get_chunks(&ids).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, "c");
        assert_eq!(chunks[1].chunk_id, "a");
        assert_eq!(chunks[1].filename(), "f1.pdf");
    }

    #[test]
    fn test_duplicate_chunks_skipped() {
        let (_temp, store) = store();
        store.add_chunks(&[sample("a", "f1", 0)]).unwrap();
        assert_eq!(store.add_chunks(&[sample("a", "f1", 0)]).unwrap(), 0);
        assert_eq!(store.all_chunks().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_file() {
        let (_temp, store) = store();
        store
            .add_chunks(&[sample("a", "f1", 1), sample("b", "f1", 0), sample("c", "f2", 0)])
            .unwrap();

        let removed = store.remove_file("f1").unwrap();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove_file("f1").unwrap().is_empty());
        assert_eq!(store.all_chunks().unwrap().len(), 1);
    }

    #[test]
    fn test_stats() {
        let (_temp, store) = store();
        store
            .add_chunks(&[
                sample("a", "f1", 0),
                Chunk::new("b", "f2", "plain", "text"),
                Chunk::new("c", "f2", "more plain", "text"),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.content_types.get("text"), Some(&2));
        assert_eq!(stats.content_types.get("pdf"), Some(&1));
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let (_temp, store) = store();
        let chunk = Chunk::new("a", "f1", "body", "text")
            .with_metadata("author", "Ada")
            .with_metadata("pages", 12);
        store.add_chunks(&[chunk.clone()]).unwrap();

        let loaded = store.get_chunks(&["a".to_string()]).unwrap();
        assert_eq!(loaded[0], chunk);
    }
}
