//! Storage layer for Conflux
//!
//! The chunk store is the source of truth for chunk content and metadata;
//! both retrieval indexes can be rebuilt from it. Snapshots persist index
//! state that is expensive to recompute.

pub mod database;
pub mod snapshot;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use database::{DbPool, SqliteChunkStore};
pub use snapshot::{SnapshotError, SnapshotStore};

/// The atomic retrievable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique; the join key between both indexes
    #[serde(default)]
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
    pub content_type: String,
    /// Position within the source file
    #[serde(default)]
    pub chunk_index: usize,
    /// Open key-value map (`filename`, `upload_time`, `author`, extraction data)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn new(
        chunk_id: impl Into<String>,
        file_id: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            file_id: file_id.into(),
            content: content.into(),
            content_type: content_type.into(),
            chunk_index: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_index(mut self, chunk_index: usize) -> Self {
        self.chunk_index = chunk_index;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// String-valued metadata entry
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Filename from metadata, falling back to the file id
    pub fn filename(&self) -> &str {
        self.metadata_str("filename").unwrap_or(&self.file_id)
    }
}

/// Contract between the core and whatever owns chunk records
pub trait ChunkStore: Send + Sync {
    /// Insert chunks; already-known chunk ids are skipped. Returns the number inserted.
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Fetch chunks by id, in the order given; unknown ids are skipped
    fn get_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>>;

    /// Delete a file and its chunks, returning the removed chunk ids
    fn remove_file(&self, file_id: &str) -> Result<Vec<String>>;

    /// Every chunk, in insertion order
    fn all_chunks(&self) -> Result<Vec<Chunk>>;

    fn stats(&self) -> Result<StoreStats>;
}

/// Chunk store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    /// Chunk counts per content type
    pub content_types: BTreeMap<String, usize>,
    pub size_bytes: u64,
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
