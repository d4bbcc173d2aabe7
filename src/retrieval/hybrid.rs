//! Hybrid search combining dense and lexical retrieval

use crate::config::SearchConfig;
use crate::embedding::{DenseHit, DenseIndex, DenseIndexError, LexicalHit, LexicalIndex, Tokenizer};
use crate::error::IndexKind;
use crate::retrieval::{
    apply_filters, fuse, generate_facets, generate_suggestions, normalize_dense, sort_results,
    ComponentScores, Degradation, Explanation, FusedCandidate, FusionWeights, LexicalNormalization,
    SearchRequest, SearchResponse, SearchResult, SearchType,
};
use crate::storage::{Chunk, ChunkStore};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not initialized")]
    NotInitialized(String),

    #[error("All retrieval paths failed: dense: {dense}; lexical: {lexical}")]
    AllPathsFailed { dense: String, lexical: String },

    #[error("Dense search failed: {0}")]
    Dense(#[from] DenseIndexError),

    #[error("Unknown chunk: {0}")]
    UnknownChunk(String),

    #[error("Chunk store error: {0}")]
    Store(String),
}

/// Query-time tuning for the fusion engine
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Each path is asked for `limit * over_fetch_factor` candidates
    pub over_fetch_factor: usize,
    pub normalization: LexicalNormalization,
    /// Per-path deadline; a path that misses it is dropped from the response
    pub path_timeout: Option<Duration>,
    /// Weights used by `explain`
    pub default_weights: FusionWeights,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            over_fetch_factor: 2,
            normalization: LexicalNormalization::MinMax,
            path_timeout: None,
            default_weights: FusionWeights {
                dense: super::DEFAULT_DENSE_WEIGHT,
                lexical: super::DEFAULT_LEXICAL_WEIGHT,
            },
        }
    }
}

impl SearchSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            over_fetch_factor: config.over_fetch_factor.max(1),
            normalization: LexicalNormalization::from_config(config),
            path_timeout: config.query_timeout_ms.map(Duration::from_millis),
            default_weights: FusionWeights::normalized(config.dense_weight, config.lexical_weight)
                .unwrap_or_else(|_| Self::default().default_weights),
        }
    }
}

/// The fusion engine
///
/// Holds shared handles to both indexes and the chunk store; no state is
/// kept between queries. The lexical index is optional: without it every
/// hybrid query runs dense-only.
pub struct HybridSearcher {
    dense: Arc<DenseIndex>,
    lexical: Option<Arc<LexicalIndex>>,
    store: Arc<dyn ChunkStore>,
    tokenizer: Tokenizer,
    settings: SearchSettings,
}

impl HybridSearcher {
    pub fn new(
        dense: Arc<DenseIndex>,
        lexical: Option<Arc<LexicalIndex>>,
        store: Arc<dyn ChunkStore>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            dense,
            lexical,
            store,
            tokenizer: Tokenizer::new(),
            settings,
        }
    }

    /// Dense-only search. Index errors propagate.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        request.validate()?;

        let fetch = request.limit.saturating_mul(self.settings.over_fetch_factor);
        let hits = self.dense.search(&request.query, fetch).await?;

        let candidates = fuse(
            &hits,
            &[],
            FusionWeights::dense_only(),
            self.settings.normalization,
        );
        self.finish(request, candidates, SearchType::Semantic, Vec::new(), start)
    }

    /// Run both paths concurrently and fuse their hits.
    ///
    /// A failing or timed-out path is recorded as a degradation and the
    /// response is built from the other one, with the weights renormalized
    /// onto the path that answered. Only when no path can answer is this an error.
    pub async fn hybrid_search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let requested_weights = request.validate()?;
        let fetch = request.limit.saturating_mul(self.settings.over_fetch_factor);

        let mut degradations = Vec::new();

        let lexical = match &self.lexical {
            Some(index) => match index.status().await {
                Ok(()) => {
                    if index.is_empty().await {
                        None
                    } else {
                        Some(Arc::clone(index))
                    }
                }
                Err(e) => {
                    tracing::warn!("Lexical path unavailable: {}", e);
                    degradations.push(Degradation {
                        path: IndexKind::Lexical,
                        reason: e.to_string(),
                    });
                    None
                }
            },
            None => None,
        };

        let dense_path = self.timed(self.dense.search(&request.query, fetch));
        let lexical_path = async {
            match &lexical {
                Some(index) => Some(self.timed(index.search(&request.query, fetch)).await),
                None => None,
            }
        };
        let (dense_outcome, lexical_outcome) = tokio::join!(dense_path, lexical_path);

        let dense_hits: Option<Vec<DenseHit>> = match dense_outcome {
            Ok(hits) => Some(hits),
            Err(PathFailure::Failed(DenseIndexError::NotInitialized)) => {
                return Err(SearchError::NotInitialized("dense index".to_string()));
            }
            Err(failure) => {
                let reason = failure.to_string();
                tracing::warn!("Dense path failed, continuing without it: {}", reason);
                degradations.push(Degradation {
                    path: IndexKind::Dense,
                    reason,
                });
                None
            }
        };

        let lexical_hits: Option<Vec<LexicalHit>> = match lexical_outcome {
            None => None,
            Some(Ok(hits)) => Some(hits),
            Some(Err(failure)) => {
                let reason = failure.to_string();
                tracing::warn!("Lexical path failed, continuing without it: {}", reason);
                degradations.push(Degradation {
                    path: IndexKind::Lexical,
                    reason,
                });
                None
            }
        };

        let (search_type, weights) = match (&dense_hits, &lexical_hits) {
            (Some(_), Some(_)) => (SearchType::Hybrid, requested_weights),
            (Some(_), None) => (SearchType::Semantic, FusionWeights::dense_only()),
            (None, Some(_)) => (
                SearchType::Keyword,
                FusionWeights {
                    dense: 0.0,
                    lexical: 1.0,
                },
            ),
            (None, None) => {
                let reason_for = |kind: IndexKind, fallback: &str| {
                    degradations
                        .iter()
                        .find(|d| d.path == kind)
                        .map(|d| d.reason.clone())
                        .unwrap_or_else(|| fallback.to_string())
                };
                return Err(SearchError::AllPathsFailed {
                    dense: reason_for(IndexKind::Dense, "no result"),
                    lexical: reason_for(IndexKind::Lexical, "lexical index unavailable"),
                });
            }
        };

        let candidates = fuse(
            dense_hits.as_deref().unwrap_or(&[]),
            lexical_hits.as_deref().unwrap_or(&[]),
            weights,
            self.settings.normalization,
        );

        tracing::debug!(
            "Fused {} candidates for '{}' ({})",
            candidates.len(),
            request.query,
            search_type
        );

        self.finish(request, candidates, search_type, degradations, start)
    }

    /// Hydrate, filter, facet, sort and truncate fused candidates
    fn finish(
        &self,
        request: &SearchRequest,
        candidates: Vec<FusedCandidate>,
        search_type: SearchType,
        degradations: Vec<Degradation>,
        start: Instant,
    ) -> Result<SearchResponse, SearchError> {
        let hydrated = self.hydrate(candidates)?;
        let mut filtered = apply_filters(hydrated, &request.filters, request.threshold);

        let facets = request.facets.then(|| generate_facets(&filtered));

        sort_results(&mut filtered, request.sort_by);
        let total_results = filtered.len();
        filtered.truncate(request.limit);

        let suggestions = generate_suggestions(&self.tokenizer, &request.query, &filtered);

        Ok(SearchResponse {
            query: request.query.clone(),
            results: filtered,
            total_results,
            search_type,
            facets,
            suggestions,
            degradations,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Attach chunk content and metadata from the store, keeping candidate order
    fn hydrate(&self, candidates: Vec<FusedCandidate>) -> Result<Vec<SearchResult>, SearchError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let mut chunks: HashMap<String, Chunk> = self
            .store
            .get_chunks(&ids)
            .map_err(|e| SearchError::Store(format!("Failed to get chunks: {}", e)))?
            .into_iter()
            .map(|c| (c.chunk_id.clone(), c))
            .collect();

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match chunks.remove(&candidate.chunk_id) {
                Some(chunk) => results.push(SearchResult::from_chunk(chunk, candidate)),
                None => tracing::debug!(
                    "Chunk {} is indexed but missing from the store",
                    candidate.chunk_id
                ),
            }
        }
        Ok(results)
    }

    /// Break down how `chunk_id` scores against `query`
    pub async fn explain(&self, query: &str, chunk_id: &str) -> Result<Explanation, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidRequest(
                "Query text cannot be empty".to_string(),
            ));
        }

        let chunk = self
            .store
            .get_chunks(&[chunk_id.to_string()])
            .map_err(|e| SearchError::Store(e.to_string()))?
            .pop()
            .ok_or_else(|| SearchError::UnknownChunk(chunk_id.to_string()))?;

        let dense_similarity = match self.dense_similarity(query, chunk_id).await {
            Ok(similarity) => similarity,
            Err(DenseIndexError::NotInitialized) => {
                return Err(SearchError::NotInitialized("dense index".to_string()))
            }
            Err(e) => {
                tracing::warn!("Dense explanation unavailable: {}", e);
                None
            }
        };

        let (lexical_raw, lexical_score) = self.explain_lexical(query, chunk_id).await;

        let dense_score = dense_similarity.map(normalize_dense).unwrap_or(0.0);
        let weights = self.settings.default_weights;
        let combined_score =
            (weights.dense * dense_score + weights.lexical * lexical_score).clamp(0.0, 1.0);

        let query_terms = distinct(self.tokenizer.tokenize(query));
        let chunk_terms: HashSet<String> = self.tokenizer.tokenize(&chunk.content).into_iter().collect();
        let matching_terms: Vec<String> = query_terms
            .iter()
            .filter(|t| chunk_terms.contains(*t))
            .cloned()
            .collect();
        let match_ratio = if query_terms.is_empty() {
            0.0
        } else {
            matching_terms.len() as f32 / query_terms.len() as f32
        };

        Ok(Explanation {
            query: query.to_string(),
            chunk_id: chunk_id.to_string(),
            dense_similarity,
            lexical_raw,
            component_scores: ComponentScores {
                dense: dense_score,
                lexical: lexical_score,
            },
            combined_score,
            matching_terms,
            match_ratio,
        })
    }

    async fn dense_similarity(
        &self,
        query: &str,
        chunk_id: &str,
    ) -> Result<Option<f32>, DenseIndexError> {
        self.dense.status().await?;
        let vector = self.dense.embed_query(query).await?;
        self.dense.similarity(&vector, chunk_id).await
    }

    /// Raw BM25 score of the chunk and its normalized value over the full match set
    async fn explain_lexical(&self, query: &str, chunk_id: &str) -> (Option<f32>, f32) {
        let Some(index) = &self.lexical else {
            return (None, 0.0);
        };
        let corpus = index.len().await;
        let hits = match index.search(query, corpus).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Lexical explanation unavailable: {}", e);
                return (None, 0.0);
            }
        };

        let raw: Vec<f32> = hits.iter().map(|h| h.score).collect();
        let normalized = self.settings.normalization.apply(&raw);
        hits.iter()
            .zip(normalized)
            .find(|(hit, _)| hit.chunk_id == chunk_id)
            .map(|(hit, score)| (Some(hit.score), score))
            .unwrap_or((None, 0.0))
    }

    /// Bound a path by the configured deadline
    async fn timed<T, E>(&self, path: impl Future<Output = Result<T, E>>) -> Result<T, PathFailure<E>> {
        match self.settings.path_timeout {
            Some(limit) => match tokio::time::timeout(limit, path).await {
                Ok(outcome) => outcome.map_err(PathFailure::Failed),
                Err(_) => Err(PathFailure::TimedOut(limit)),
            },
            None => path.await.map_err(PathFailure::Failed),
        }
    }
}

enum PathFailure<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for PathFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathFailure::Failed(e) => write!(f, "{}", e),
            PathFailure::TimedOut(limit) => write!(f, "timed out after {} ms", limit.as_millis()),
        }
    }
}

fn distinct(terms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    terms.into_iter().filter(|t| seen.insert(t.clone())).collect()
}
