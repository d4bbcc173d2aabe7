/// HNSW dense index over unit-normalized chunk embeddings
use super::provider::normalize;
use super::{EmbeddingError, EmbeddingProvider};
use crate::storage::{SnapshotError, SnapshotStore};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

const SNAPSHOT_NAME: &str = "dense";
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum DenseIndexError {
    #[error("Dense index is not initialized")]
    NotInitialized,

    #[error("Dense index is corrupted: {0}")]
    Corrupted(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl From<SnapshotError> for DenseIndexError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Corrupted { .. } => DenseIndexError::Corrupted(err.to_string()),
            SnapshotError::Io { .. } => DenseIndexError::Persistence(err.to_string()),
        }
    }
}

/// HNSW parameters for the dense index
#[derive(Debug, Clone)]
pub struct DenseIndexConfig {
    /// Vector dimension (must match the embedding provider)
    pub dimension: usize,
    /// Connections per layer
    pub hnsw_m: usize,
    /// Construction beam width (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Search beam width; raised to `k` when smaller
    pub ef_search: usize,
    /// Capacity hint for the graph
    pub max_elements: usize,
    /// Texts per provider call
    pub batch_size: usize,
}

impl Default for DenseIndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            hnsw_m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
            batch_size: 32,
        }
    }
}

/// A chunk to be embedded into the dense index
#[derive(Debug, Clone)]
pub struct DenseDocument {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
}

/// Stored entry: the unit vector plus a content copy for hydration and rebuilds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseEntry {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
    pub vector: Vec<f32>,
}

/// Nearest-neighbour hit with cosine similarity in [-1, 1]
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    model: &'a str,
    dimension: usize,
    entries: Vec<&'a DenseEntry>,
}

#[derive(Deserialize)]
struct SnapshotIn {
    model: String,
    dimension: usize,
    entries: Vec<DenseEntry>,
}

struct Graph {
    entries: Vec<DenseEntry>,
    positions: HashMap<String, usize>,
    hnsw: Hnsw<'static, f32, DistCosine>,
}

impl Graph {
    fn build(entries: Vec<DenseEntry>, config: &DenseIndexConfig) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            config.hnsw_m,
            config.max_elements.max(entries.len()),
            MAX_LAYERS,
            config.ef_construction,
            DistCosine,
        );
        let mut positions = HashMap::with_capacity(entries.len());
        for (pos, entry) in entries.iter().enumerate() {
            hnsw.insert((entry.vector.as_slice(), pos));
            positions.insert(entry.chunk_id.clone(), pos);
        }
        Self {
            entries,
            positions,
            hnsw,
        }
    }

    fn append(&mut self, entry: DenseEntry) {
        let pos = self.entries.len();
        self.hnsw.insert((entry.vector.as_slice(), pos));
        self.positions.insert(entry.chunk_id.clone(), pos);
        self.entries.push(entry);
    }
}

enum DenseState {
    Unloaded,
    Ready(Graph),
    Corrupted(String),
}

/// Dense retrieval index
///
/// Readers share the graph through an async `RwLock`; writers are serialized
/// by `write_gate`. Every mutation is persisted to the snapshot store before
/// it becomes visible, and deletions rebuild the graph aside and swap it in.
/// Snapshot writes and graph rebuilds run on the blocking pool.
pub struct DenseIndex {
    provider: Arc<dyn EmbeddingProvider>,
    config: DenseIndexConfig,
    snapshots: Option<SnapshotStore>,
    state: RwLock<DenseState>,
    write_gate: Mutex<()>,
}

impl DenseIndex {
    /// Create an unloaded dense index. Call [`DenseIndex::load`] before use.
    ///
    /// With `snapshots` set to `None` the index lives only in memory.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: DenseIndexConfig,
        snapshots: Option<SnapshotStore>,
    ) -> Result<Self, DenseIndexError> {
        if provider.dimension() != config.dimension {
            return Err(DenseIndexError::InvalidDimension {
                expected: config.dimension,
                actual: provider.dimension(),
            });
        }

        Ok(Self {
            provider,
            config,
            snapshots,
            state: RwLock::new(DenseState::Unloaded),
            write_gate: Mutex::new(()),
        })
    }

    /// Create and load in one step
    pub async fn open(
        provider: Arc<dyn EmbeddingProvider>,
        config: DenseIndexConfig,
        snapshots: Option<SnapshotStore>,
    ) -> Result<Self, DenseIndexError> {
        let index = Self::new(provider, config, snapshots)?;
        index.load().await?;
        Ok(index)
    }

    /// Load persisted state, or start empty when nothing was persisted.
    ///
    /// An unreadable snapshot leaves the index in the corrupted state; it
    /// stays unusable until [`DenseIndex::rebuild`] succeeds.
    pub async fn load(&self) -> Result<usize, DenseIndexError> {
        let _gate = self.write_gate.lock().await;

        let loaded = match self.read_snapshot() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Dense index failed to load: {}", e);
                if let DenseIndexError::Corrupted(reason) = &e {
                    *self.state.write().await = DenseState::Corrupted(reason.clone());
                }
                return Err(e);
            }
        };

        let count = loaded.len();
        let config = self.config.clone();
        let graph = tokio::task::spawn_blocking(move || Graph::build(loaded, &config))
            .await
            .map_err(|e| DenseIndexError::Persistence(format!("graph build failed: {}", e)))?;
        *self.state.write().await = DenseState::Ready(graph);

        tracing::info!("Dense index loaded with {} vectors", count);
        Ok(count)
    }

    fn read_snapshot(&self) -> Result<Vec<DenseEntry>, DenseIndexError> {
        let Some(store) = &self.snapshots else {
            return Ok(Vec::new());
        };
        let Some(bytes) = store.read(SNAPSHOT_NAME)? else {
            return Ok(Vec::new());
        };

        let snapshot: SnapshotIn = serde_json::from_slice(&bytes)
            .map_err(|e| DenseIndexError::Corrupted(format!("undecodable snapshot: {}", e)))?;

        if snapshot.dimension != self.config.dimension {
            return Err(DenseIndexError::Corrupted(format!(
                "snapshot dimension {} does not match configured {}",
                snapshot.dimension, self.config.dimension
            )));
        }
        if snapshot.model != self.provider.model_name() {
            return Err(DenseIndexError::Corrupted(format!(
                "snapshot was built with model '{}', provider is '{}'",
                snapshot.model,
                self.provider.model_name()
            )));
        }
        if let Some(bad) = snapshot
            .entries
            .iter()
            .find(|e| e.vector.len() != self.config.dimension)
        {
            return Err(DenseIndexError::Corrupted(format!(
                "entry {} has dimension {}",
                bad.chunk_id,
                bad.vector.len()
            )));
        }

        Ok(snapshot.entries)
    }

    /// Write `entries` to the snapshot store on the blocking pool, handing them back
    async fn persist(&self, entries: Vec<DenseEntry>) -> Result<Vec<DenseEntry>, DenseIndexError> {
        let Some(store) = self.snapshots.clone() else {
            return Ok(entries);
        };
        let model = self.provider.model_name().to_string();
        let dimension = self.config.dimension;

        tokio::task::spawn_blocking(move || {
            write_snapshot(&store, &model, dimension, &entries)?;
            Ok::<_, DenseIndexError>(entries)
        })
        .await
        .map_err(|e| DenseIndexError::Persistence(format!("snapshot task failed: {}", e)))?
    }

    /// Persist `entries` and build the graph that will replace the current one
    async fn persist_and_build(&self, entries: Vec<DenseEntry>) -> Result<Graph, DenseIndexError> {
        let entries = self.persist(entries).await?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || Graph::build(entries, &config))
            .await
            .map_err(|e| DenseIndexError::Persistence(format!("graph build failed: {}", e)))
    }

    /// Embed texts off the async executor and normalize to unit length
    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, DenseIndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let provider = Arc::clone(&self.provider);
        let expected = texts.len();
        let batch_size = self.config.batch_size.max(1);
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut out = Vec::with_capacity(texts.len());
            for batch in texts.chunks(batch_size) {
                out.extend(provider.embed_batch(batch)?);
            }
            Ok::<_, EmbeddingError>(out)
        })
        .await
        .map_err(|e| EmbeddingError::GenerationError(format!("embedding task failed: {}", e)))??;

        if vectors.len() != expected {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                expected,
                vectors.len()
            ))
            .into());
        }

        for vector in vectors.iter_mut() {
            if vector.len() != self.config.dimension {
                return Err(DenseIndexError::InvalidDimension {
                    expected: self.config.dimension,
                    actual: vector.len(),
                });
            }
            if !normalize(vector) {
                return Err(EmbeddingError::GenerationError(
                    "Provider returned a zero vector".to_string(),
                )
                .into());
            }
        }

        Ok(vectors)
    }

    /// Embed a query into a unit vector
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, DenseIndexError> {
        let mut vectors = self.embed_all(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embedding generated".to_string()).into())
    }

    /// Embed and insert a single chunk
    pub async fn insert(
        &self,
        chunk_id: &str,
        file_id: &str,
        text: &str,
    ) -> Result<usize, DenseIndexError> {
        self.insert_batch(vec![DenseDocument {
            chunk_id: chunk_id.to_string(),
            file_id: file_id.to_string(),
            content: text.to_string(),
        }])
        .await
    }

    /// Embed and append chunks; chunk ids already present are skipped.
    ///
    /// Returns the number of vectors added. Nothing is added if any embedding fails.
    pub async fn insert_batch(&self, documents: Vec<DenseDocument>) -> Result<usize, DenseIndexError> {
        let _gate = self.write_gate.lock().await;

        let fresh: Vec<DenseDocument> = {
            let state = self.state.read().await;
            let graph = ready(&state)?;
            let mut seen = HashSet::new();
            documents
                .into_iter()
                .filter(|d| {
                    let new = !graph.positions.contains_key(&d.chunk_id)
                        && seen.insert(d.chunk_id.clone());
                    if !new {
                        tracing::warn!("Chunk {} already in dense index, skipping", d.chunk_id);
                    }
                    new
                })
                .collect()
        };

        if fresh.is_empty() {
            return Ok(0);
        }

        let texts = fresh.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embed_all(texts).await?;

        let new_entries: Vec<DenseEntry> = fresh
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| DenseEntry {
                chunk_id: doc.chunk_id,
                file_id: doc.file_id,
                content: doc.content,
                vector,
            })
            .collect();

        let (base, mut corpus) = {
            let state = self.state.read().await;
            let graph = ready(&state)?;
            let mut corpus = Vec::with_capacity(graph.entries.len() + new_entries.len());
            corpus.extend(graph.entries.iter().cloned());
            (graph.entries.len(), corpus)
        };
        corpus.extend(new_entries);
        let mut corpus = self.persist(corpus).await?;
        let new_entries = corpus.split_off(base);

        let added = new_entries.len();
        let mut state = self.state.write().await;
        let DenseState::Ready(graph) = &mut *state else {
            return Err(DenseIndexError::NotInitialized);
        };
        for entry in new_entries {
            graph.append(entry);
        }

        tracing::info!(
            "Added {} vectors to dense index ({} total)",
            added,
            graph.entries.len()
        );
        Ok(added)
    }

    /// Rebuild the graph without the given chunk ids, then swap it in.
    ///
    /// Surviving chunks keep their stored unit vectors. Returns the number removed.
    pub async fn remove_all(&self, chunk_ids: &HashSet<String>) -> Result<usize, DenseIndexError> {
        let _gate = self.write_gate.lock().await;

        let survivors: Vec<DenseEntry> = {
            let state = self.state.read().await;
            let graph = ready(&state)?;
            graph
                .entries
                .iter()
                .filter(|e| !chunk_ids.contains(&e.chunk_id))
                .cloned()
                .collect()
        };

        let removed = {
            let state = self.state.read().await;
            ready(&state)?.entries.len() - survivors.len()
        };
        if removed == 0 {
            return Ok(0);
        }

        let graph = self.persist_and_build(survivors).await?;
        let remaining = graph.entries.len();
        *self.state.write().await = DenseState::Ready(graph);

        tracing::info!(
            "Rebuilt dense index: removed {} vectors, {} remain",
            removed,
            remaining
        );
        Ok(removed)
    }

    /// Remove every chunk belonging to `file_id`
    pub async fn remove_file(&self, file_id: &str) -> Result<usize, DenseIndexError> {
        let ids: HashSet<String> = {
            let state = self.state.read().await;
            ready(&state)?
                .entries
                .iter()
                .filter(|e| e.file_id == file_id)
                .map(|e| e.chunk_id.clone())
                .collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }
        self.remove_all(&ids).await
    }

    /// Replace the whole index by re-embedding `documents`.
    ///
    /// This is the recovery path from a corrupted snapshot.
    pub async fn rebuild(&self, documents: Vec<DenseDocument>) -> Result<usize, DenseIndexError> {
        let _gate = self.write_gate.lock().await;

        let mut seen = HashSet::new();
        let documents: Vec<DenseDocument> = documents
            .into_iter()
            .filter(|d| seen.insert(d.chunk_id.clone()))
            .collect();

        let texts = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embed_all(texts).await?;

        let entries: Vec<DenseEntry> = documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| DenseEntry {
                chunk_id: doc.chunk_id,
                file_id: doc.file_id,
                content: doc.content,
                vector,
            })
            .collect();

        let count = entries.len();
        let graph = self.persist_and_build(entries).await?;
        *self.state.write().await = DenseState::Ready(graph);

        tracing::info!("Dense index rebuilt from {} chunks", count);
        Ok(count)
    }

    /// Search for the `k` chunks most similar to `query`
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<DenseHit>, DenseIndexError> {
        {
            let state = self.state.read().await;
            if ready(&state)?.entries.is_empty() || k == 0 {
                return Ok(Vec::new());
            }
        }
        let vector = self.embed_query(query).await?;
        self.search_vector(&vector, k).await
    }

    /// Search with an already-normalized query vector
    pub async fn search_vector(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<DenseHit>, DenseIndexError> {
        if query.len() != self.config.dimension {
            return Err(DenseIndexError::InvalidDimension {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }

        let state = self.state.read().await;
        let graph = ready(&state)?;
        if graph.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let k = k.min(graph.entries.len());
        let ef_search = self.config.ef_search.max(k);
        let neighbours = graph.hnsw.search(query, k, ef_search);

        let mut hits: Vec<DenseHit> = neighbours
            .into_iter()
            .filter_map(|n| {
                graph.entries.get(n.d_id).map(|entry| DenseHit {
                    chunk_id: entry.chunk_id.clone(),
                    score: 1.0 - n.distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Cosine similarity between a unit query vector and a stored chunk
    pub async fn similarity(
        &self,
        query: &[f32],
        chunk_id: &str,
    ) -> Result<Option<f32>, DenseIndexError> {
        let state = self.state.read().await;
        let graph = ready(&state)?;
        Ok(graph.positions.get(chunk_id).map(|&pos| {
            graph.entries[pos]
                .vector
                .iter()
                .zip(query.iter())
                .map(|(a, b)| a * b)
                .sum()
        }))
    }

    /// Number of indexed vectors (0 unless ready)
    pub async fn len(&self) -> usize {
        match &*self.state.read().await {
            DenseState::Ready(graph) => graph.entries.len(),
            _ => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the chunk id is indexed
    pub async fn contains(&self, chunk_id: &str) -> bool {
        match &*self.state.read().await {
            DenseState::Ready(graph) => graph.positions.contains_key(chunk_id),
            _ => false,
        }
    }

    /// Current availability, with the reason when unusable
    pub async fn status(&self) -> Result<(), DenseIndexError> {
        ready(&*self.state.read().await).map(|_| ())
    }

    /// Bytes used by the persisted snapshot
    pub fn disk_size(&self) -> u64 {
        self.snapshots
            .as_ref()
            .map(|s| s.size(SNAPSHOT_NAME))
            .unwrap_or(0)
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

fn write_snapshot(
    store: &SnapshotStore,
    model: &str,
    dimension: usize,
    entries: &[DenseEntry],
) -> Result<(), DenseIndexError> {
    let snapshot = SnapshotOut {
        model,
        dimension,
        entries: entries.iter().collect(),
    };
    let bytes =
        serde_json::to_vec(&snapshot).map_err(|e| DenseIndexError::Persistence(e.to_string()))?;
    store.write(SNAPSHOT_NAME, &bytes)?;
    Ok(())
}

fn ready(state: &DenseState) -> Result<&Graph, DenseIndexError> {
    match state {
        DenseState::Ready(graph) => Ok(graph),
        DenseState::Unloaded => Err(DenseIndexError::NotInitialized),
        DenseState::Corrupted(reason) => Err(DenseIndexError::Corrupted(reason.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedProvider;
    use tempfile::TempDir;

    const DIM: usize = 64;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbedProvider::new(DIM).unwrap())
    }

    fn config() -> DenseIndexConfig {
        DenseIndexConfig {
            dimension: DIM,
            max_elements: 1_000,
            ..Default::default()
        }
    }

    fn doc(chunk_id: &str, file_id: &str, content: &str) -> DenseDocument {
        DenseDocument {
            chunk_id: chunk_id.to_string(),
            file_id: file_id.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unloaded_index_rejects_queries() {
        let index = DenseIndex::new(provider(), config(), None).unwrap();
        let err = index.search("anything", 5).await.unwrap_err();
        assert!(matches!(err, DenseIndexError::NotInitialized));
    }

    #[tokio::test]
    async fn test_dimension_validation() {
        let cfg = DenseIndexConfig {
            dimension: 128,
            ..config()
        };
        assert!(DenseIndex::new(provider(), cfg, None).is_err());
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        assert!(index.search("apple", 5).await.unwrap().is_empty());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_and_exact_match() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        index
            .insert("c1", "f1", "ripe yellow banana bread")
            .await
            .unwrap();
        index
            .insert("c2", "f1", "volcanic rock formations")
            .await
            .unwrap();

        let hits = index.search("ripe yellow banana bread", 2).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].score > 0.99);
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_ids_skipped() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        let added = index
            .insert_batch(vec![doc("c1", "f1", "alpha"), doc("c1", "f1", "alpha again")])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(index.insert("c1", "f1", "alpha").await.unwrap(), 0);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_embedding_adds_nothing() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        let err = index
            .insert_batch(vec![doc("c1", "f1", "valid text"), doc("c2", "f1", "!!!")])
            .await
            .unwrap_err();
        assert!(matches!(err, DenseIndexError::Embedding(_)));
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_remove_file_rebuilds() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        index
            .insert_batch(vec![
                doc("a1", "fa", "unique marmalade content"),
                doc("a2", "fa", "another piece of file a"),
                doc("b1", "fb", "file b keeps living"),
            ])
            .await
            .unwrap();

        assert_eq!(index.remove_file("fa").await.unwrap(), 2);
        assert_eq!(index.len().await, 1);
        assert!(!index.contains("a1").await);

        let hits = index.search("unique marmalade content", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk_id != "a1"));
        assert_eq!(index.remove_file("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        {
            let index = DenseIndex::open(provider(), config(), Some(store.clone()))
                .await
                .unwrap();
            index.insert("c1", "f1", "persisted words").await.unwrap();
            index.insert("c2", "f2", "more persisted words").await.unwrap();
            index.remove_file("f2").await.unwrap();
        }

        let reopened = DenseIndex::open(provider(), config(), Some(store))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
        let hits = reopened.search("persisted words", 1).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_until_rebuild() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();
        std::fs::write(temp.path().join("dense.snap"), b"garbage that is long enough to pass the length check").unwrap();

        let index = DenseIndex::new(provider(), config(), Some(store)).unwrap();
        assert!(matches!(
            index.load().await,
            Err(DenseIndexError::Corrupted(_))
        ));
        assert!(matches!(
            index.search("x", 1).await,
            Err(DenseIndexError::Corrupted(_))
        ));

        index
            .rebuild(vec![doc("c1", "f1", "recovered text")])
            .await
            .unwrap();
        assert!(index.status().await.is_ok());
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_similarity_of_stored_chunk() {
        let index = DenseIndex::open(provider(), config(), None).await.unwrap();
        index.insert("c1", "f1", "cosine check").await.unwrap();

        let query = index.embed_query("cosine check").await.unwrap();
        let sim = index.similarity(&query, "c1").await.unwrap().unwrap();
        assert!((sim - 1.0).abs() < 1e-4);
        assert!(index.similarity(&query, "nope").await.unwrap().is_none());
    }
}
