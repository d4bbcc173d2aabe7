//! Index maintenance
//!
//! Keeps the chunk store, the dense index and the lexical index in step as
//! documents are added and deleted. Writes go to the store first; the two
//! indexes are then updated independently and a failure in either is
//! reported as a partial write rather than rolled back.

use crate::embedding::{DenseDocument, DenseIndex, LexicalEntry, LexicalIndex};
use crate::error::{ConfluxError, IndexKind, Result};
use crate::storage::{Chunk, ChunkStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

impl From<&Chunk> for DenseDocument {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            file_id: chunk.file_id.clone(),
            content: chunk.content.clone(),
        }
    }
}

impl From<&Chunk> for LexicalEntry {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            file_id: chunk.file_id.clone(),
            content: chunk.content.clone(),
        }
    }
}

/// Counts from a successful add
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub chunks_stored: usize,
    pub dense_added: usize,
    pub lexical_added: usize,
}

/// Counts from a full rebuild
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    pub chunks: usize,
    pub dense: usize,
    pub lexical: usize,
}

/// Per-index outcome of one maintenance operation
struct WriteOutcome {
    succeeded: Vec<IndexKind>,
    failed: Vec<(IndexKind, String)>,
}

impl WriteOutcome {
    fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record<T, E: std::fmt::Display>(
        &mut self,
        kind: IndexKind,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.succeeded.push(kind);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("{} index write failed: {}", kind, e);
                self.failed.push((kind, e.to_string()));
                None
            }
        }
    }

    fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(ConfluxError::PartialIndexWrite {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

/// Drives both indexes from chunk store mutations
///
/// Maintenance operations are serialized with each other; queries are not
/// blocked and see each index either before or after a given write.
pub struct IndexMaintainer {
    dense: Arc<DenseIndex>,
    lexical: Option<Arc<LexicalIndex>>,
    store: Arc<dyn ChunkStore>,
    writes: Mutex<()>,
}

impl IndexMaintainer {
    pub fn new(
        dense: Arc<DenseIndex>,
        lexical: Option<Arc<LexicalIndex>>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            dense,
            lexical,
            store,
            writes: Mutex::new(()),
        }
    }

    /// Store `chunks` and append them to both indexes.
    ///
    /// Chunks already known to the store are not stored again, but are still
    /// offered to the indexes so a previously failed index write can catch up.
    /// Returns `PartialIndexWrite` if either index rejected the batch; the
    /// other index keeps what it absorbed.
    pub async fn on_document_indexed(&self, chunks: &[Chunk]) -> Result<IndexReport> {
        if chunks.is_empty() {
            return Ok(IndexReport::default());
        }
        let _writes = self.writes.lock().await;

        let chunks_stored = self.store.add_chunks(chunks)?;
        tracing::debug!("Stored {} of {} chunks", chunks_stored, chunks.len());

        let mut outcome = WriteOutcome::new();

        let dense_added = outcome
            .record(
                IndexKind::Dense,
                self.dense
                    .insert_batch(chunks.iter().map(DenseDocument::from).collect())
                    .await,
            )
            .unwrap_or(0);

        let lexical_added = match &self.lexical {
            Some(lexical) => outcome
                .record(
                    IndexKind::Lexical,
                    lexical
                        .update(chunks.iter().map(LexicalEntry::from).collect())
                        .await,
                )
                .unwrap_or(0),
            None => 0,
        };

        outcome.into_result()?;

        tracing::info!(
            "Indexed {} chunks (dense +{}, lexical +{})",
            chunks.len(),
            dense_added,
            lexical_added
        );
        Ok(IndexReport {
            chunks_stored,
            dense_added,
            lexical_added,
        })
    }

    /// Delete `file_id` from the store and both indexes.
    ///
    /// Returns `Ok(false)` when nothing anywhere referenced the file. Both
    /// index rebuilds have completed when this returns.
    pub async fn on_document_deleted(&self, file_id: &str) -> Result<bool> {
        let _writes = self.writes.lock().await;

        let removed_chunks = self.store.remove_file(file_id)?;
        let mut outcome = WriteOutcome::new();

        let dense_removed = outcome
            .record(IndexKind::Dense, self.dense.remove_file(file_id).await)
            .unwrap_or(0);

        let lexical_removed = match &self.lexical {
            Some(lexical) => outcome
                .record(IndexKind::Lexical, lexical.remove(file_id).await)
                .unwrap_or(0),
            None => 0,
        };

        outcome.into_result()?;

        let found = !removed_chunks.is_empty() || dense_removed > 0 || lexical_removed > 0;
        if found {
            tracing::info!(
                "Removed file {} ({} chunks; dense -{}, lexical -{})",
                file_id,
                removed_chunks.len(),
                dense_removed,
                lexical_removed
            );
        } else {
            tracing::debug!("File {} not found", file_id);
        }
        Ok(found)
    }

    /// Re-embed and re-index every chunk in the store
    pub async fn rebuild_all(&self) -> Result<RebuildReport> {
        let _writes = self.writes.lock().await;

        let chunks = self.store.all_chunks()?;
        tracing::info!("Rebuilding indexes from {} stored chunks", chunks.len());

        let mut outcome = WriteOutcome::new();

        let dense = outcome
            .record(
                IndexKind::Dense,
                self.dense
                    .rebuild(chunks.iter().map(DenseDocument::from).collect())
                    .await,
            )
            .unwrap_or(0);

        let lexical = match &self.lexical {
            Some(index) => outcome
                .record(
                    IndexKind::Lexical,
                    index
                        .build(chunks.iter().map(LexicalEntry::from).collect())
                        .await,
                )
                .unwrap_or(0),
            None => 0,
        };

        outcome.into_result()?;

        Ok(RebuildReport {
            chunks: chunks.len(),
            dense,
            lexical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DenseIndexConfig, HashEmbedProvider};
    use crate::storage::SqliteChunkStore;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        dense: Arc<DenseIndex>,
        lexical: Arc<LexicalIndex>,
        store: Arc<SqliteChunkStore>,
        maintainer: IndexMaintainer,
    }

    async fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteChunkStore::new(&temp.path().join("chunks.db")).unwrap());
        let dense = Arc::new(
            DenseIndex::open(
                Arc::new(HashEmbedProvider::new(32).unwrap()),
                DenseIndexConfig {
                    dimension: 32,
                    max_elements: 1_000,
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap(),
        );
        let lexical = Arc::new(LexicalIndex::in_memory().unwrap());
        let maintainer =
            IndexMaintainer::new(dense.clone(), Some(lexical.clone()), store.clone());

        Harness {
            _temp: temp,
            dense,
            lexical,
            store,
            maintainer,
        }
    }

    fn doc(file_id: &str, texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Chunk::new(format!("{}-{}", file_id, i), file_id, *text, "text").with_index(i)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_add_reaches_store_and_both_indexes() {
        let h = harness().await;
        let report = h
            .maintainer
            .on_document_indexed(&doc("f1", &["alpha beta", "gamma delta"]))
            .await
            .unwrap();

        assert_eq!(
            report,
            IndexReport {
                chunks_stored: 2,
                dense_added: 2,
                lexical_added: 2
            }
        );
        assert_eq!(h.store.all_chunks().unwrap().len(), 2);
        assert_eq!(h.dense.len().await, 2);
        assert_eq!(h.lexical.len().await, 2);
    }

    #[tokio::test]
    async fn test_dense_failure_is_partial_write() {
        let h = harness().await;
        // punctuation only: nothing for the hashing embedder to embed
        let err = h
            .maintainer
            .on_document_indexed(&doc("f1", &["!!!"]))
            .await
            .unwrap_err();

        match err {
            ConfluxError::PartialIndexWrite { succeeded, failed } => {
                assert_eq!(succeeded, vec![IndexKind::Lexical]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, IndexKind::Dense);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.dense.len().await, 0);
        assert_eq!(h.lexical.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_reaches_both_indexes() {
        let h = harness().await;
        h.maintainer
            .on_document_indexed(&doc("f1", &["alpha beta"]))
            .await
            .unwrap();
        h.maintainer
            .on_document_indexed(&doc("f2", &["gamma delta"]))
            .await
            .unwrap();

        assert!(h.maintainer.on_document_deleted("f1").await.unwrap());
        assert!(!h.dense.contains("f1-0").await);
        assert!(!h.lexical.contains("f1-0").await);
        assert!(h.dense.contains("f2-0").await);
        assert!(h.lexical.contains("f2-0").await);

        assert!(!h.maintainer.on_document_deleted("f1").await.unwrap());
        assert!(!h.maintainer.on_document_deleted("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_all_restores_indexes() {
        let h = harness().await;
        h.maintainer
            .on_document_indexed(&doc("f1", &["alpha beta", "gamma delta"]))
            .await
            .unwrap();
        h.dense.remove_file("f1").await.unwrap();
        h.lexical.remove("f1").await.unwrap();

        let report = h.maintainer.rebuild_all().await.unwrap();
        assert_eq!(
            report,
            RebuildReport {
                chunks: 2,
                dense: 2,
                lexical: 2
            }
        );
        assert!(h.dense.contains("f1-1").await);
        assert!(h.lexical.contains("f1-1").await);
    }
}
