//! Search service facade
//!
//! Owns one instance of every component, wired together at construction,
//! and exposes the operations callers use: search, hybrid search, index
//! add/remove, stats, health and explanations.

use crate::config::Config;
use crate::embedding::{
    create_provider, DenseIndex, DenseIndexConfig, DenseIndexError, LexicalIndex,
    LexicalIndexConfig,
};
use crate::error::Result;
use crate::indexing::{IndexMaintainer, IndexReport, RebuildReport};
use crate::retrieval::{
    Explanation, HybridSearcher, ResultCache, SearchRequest, SearchResponse, SearchSettings,
};
use crate::storage::{Chunk, ChunkStore, SnapshotStore, SqliteChunkStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DATABASE_FILE: &str = "chunks.db";
const SNAPSHOT_DIR: &str = "snapshots";
const LEXICAL_DIR: &str = "lexical";

/// Whether an index can serve queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
}

/// Overall service state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Both paths serving
    Healthy,
    /// One path down, serving with reduced confidence
    Degraded,
    /// Neither path can serve
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub dense_index: Availability,
    pub lexical_index: Availability,
    pub overall: HealthStatus,
    /// Why an index is unavailable
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub document_count: usize,
    pub chunk_count: usize,
    /// Bytes on disk across the chunk store and both indexes
    pub index_size: u64,
    pub content_types: BTreeMap<String, usize>,
    pub dense_vectors: usize,
    pub lexical_documents: usize,
    pub cached_responses: usize,
}

/// Defaults applied to requests built by [`SearchService::request`]
#[derive(Debug, Clone)]
struct RequestDefaults {
    limit: usize,
    threshold: f32,
    dense_weight: f32,
    lexical_weight: f32,
}

pub struct SearchService {
    dense: Arc<DenseIndex>,
    lexical: Option<Arc<LexicalIndex>>,
    store: Arc<dyn ChunkStore>,
    searcher: HybridSearcher,
    maintainer: IndexMaintainer,
    cache: Option<ResultCache>,
    defaults: RequestDefaults,
}

impl SearchService {
    /// Open every component under the configured data directory.
    ///
    /// A corrupted dense snapshot or lexical index does not prevent startup:
    /// the affected index reports unavailable until [`SearchService::rebuild`].
    pub async fn open(config: &Config) -> Result<Self> {
        let data_dir = config.resolved_data_dir()?;
        tracing::info!("Opening search service at {:?}", data_dir);

        let store: Arc<dyn ChunkStore> =
            Arc::new(SqliteChunkStore::new(&data_dir.join(DATABASE_FILE))?);

        let provider = create_provider(&config.embedding)?;
        let snapshots = SnapshotStore::new(data_dir.join(SNAPSHOT_DIR))?;
        let dense = Arc::new(DenseIndex::new(
            provider,
            DenseIndexConfig::from_config(&config.embedding, &config.indexing),
            Some(snapshots),
        )?);
        match dense.load().await {
            Ok(_) => {}
            Err(DenseIndexError::Corrupted(reason)) => {
                tracing::warn!("Dense index unavailable until rebuilt: {}", reason);
            }
            Err(e) => return Err(e.into()),
        }

        let lexical = if config.indexing.lexical_enabled {
            Some(Arc::new(LexicalIndex::open(LexicalIndexConfig {
                path: Some(data_dir.join(LEXICAL_DIR)),
                writer_heap_bytes: config.indexing.lexical_writer_heap_bytes,
            })?))
        } else {
            tracing::info!("Lexical index disabled; hybrid search will be dense-only");
            None
        };

        Ok(Self::from_parts(dense, lexical, store, config))
    }

    /// Assemble a service from already-constructed components
    pub fn from_parts(
        dense: Arc<DenseIndex>,
        lexical: Option<Arc<LexicalIndex>>,
        store: Arc<dyn ChunkStore>,
        config: &Config,
    ) -> Self {
        let search = &config.search;
        let searcher = HybridSearcher::new(
            Arc::clone(&dense),
            lexical.clone(),
            Arc::clone(&store),
            SearchSettings::from_config(search),
        );
        let maintainer = IndexMaintainer::new(Arc::clone(&dense), lexical.clone(), Arc::clone(&store));
        let cache = search.cache_enabled.then(|| {
            ResultCache::new(
                Duration::from_secs(search.cache_ttl_secs),
                search.cache_capacity,
            )
        });

        Self {
            dense,
            lexical,
            store,
            searcher,
            maintainer,
            cache,
            defaults: RequestDefaults {
                limit: search.default_limit,
                threshold: search.default_threshold,
                dense_weight: search.dense_weight,
                lexical_weight: search.lexical_weight,
            },
        }
    }

    /// A request for `query` carrying the configured defaults
    pub fn request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query, self.defaults.limit)
            .with_threshold(self.defaults.threshold)
            .with_weights(self.defaults.dense_weight, self.defaults.lexical_weight)
    }

    /// Semantic-only search
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        Ok(self.searcher.search(request).await?)
    }

    /// Hybrid search, served from the result cache when possible
    pub async fn hybrid_search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(request).await {
                tracing::debug!("Cache hit for '{}'", request.query);
                return Ok(cached);
            }
        }

        let response = self.searcher.hybrid_search(request).await?;

        if let Some(cache) = &self.cache {
            cache.insert(request, &response).await;
        }
        Ok(response)
    }

    pub async fn explain(&self, query: &str, chunk_id: &str) -> Result<Explanation> {
        Ok(self.searcher.explain(query, chunk_id).await?)
    }

    /// Store and index `chunks`
    pub async fn index_add(&self, chunks: &[Chunk]) -> Result<IndexReport> {
        let outcome = self.maintainer.on_document_indexed(chunks).await;
        self.invalidate_cache().await;
        outcome
    }

    /// Remove a file everywhere; `false` when the file was unknown
    pub async fn index_remove(&self, file_id: &str) -> Result<bool> {
        let outcome = self.maintainer.on_document_deleted(file_id).await;
        self.invalidate_cache().await;
        outcome
    }

    /// Rebuild both indexes from the chunk store
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let outcome = self.maintainer.rebuild_all().await;
        self.invalidate_cache().await;
        outcome
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        let store = self.store.stats()?;
        let (lexical_documents, lexical_size) = match &self.lexical {
            Some(index) => (index.len().await, index.disk_size()),
            None => (0, 0),
        };
        let cached_responses = match &self.cache {
            Some(cache) => cache.len().await,
            None => 0,
        };

        Ok(ServiceStats {
            document_count: store.document_count,
            chunk_count: store.chunk_count,
            index_size: store.size_bytes + self.dense.disk_size() + lexical_size,
            content_types: store.content_types,
            dense_vectors: self.dense.len().await,
            lexical_documents,
            cached_responses,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let mut issues = Vec::new();

        let dense_index = match self.dense.status().await {
            Ok(()) => Availability::Available,
            Err(e) => {
                issues.push(format!("dense: {}", e));
                Availability::Unavailable
            }
        };

        let lexical_index = match &self.lexical {
            Some(index) => match index.status().await {
                Ok(()) => Availability::Available,
                Err(e) => {
                    issues.push(format!("lexical: {}", e));
                    Availability::Unavailable
                }
            },
            None => {
                issues.push("lexical: disabled".to_string());
                Availability::Unavailable
            }
        };

        let overall = match (dense_index, lexical_index) {
            (Availability::Available, Availability::Available) => HealthStatus::Healthy,
            (Availability::Unavailable, Availability::Unavailable) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        if overall != HealthStatus::Healthy {
            tracing::warn!("Search service is {:?}: {}", overall, issues.join("; "));
        }

        HealthReport {
            dense_index,
            lexical_index,
            overall,
            issues,
        }
    }
}
