//! Hybrid retrieval
//!
//! This module implements the fusion engine: both retrieval paths run
//! concurrently, their hits are reconciled by chunk id and combined with
//! normalized weights, then filtered, faceted and sorted.

mod cache;
mod filters;
mod fusion;
mod hybrid;
mod suggestions;

pub use cache::ResultCache;
pub use filters::{apply_filters, generate_facets, sort_results};
pub use fusion::{
    fuse, normalize_dense, FusedCandidate, FusionError, FusionWeights, LexicalNormalization,
    DEFAULT_DENSE_WEIGHT, DEFAULT_LEXICAL_WEIGHT,
};
pub use hybrid::{HybridSearcher, SearchError, SearchSettings};
pub use suggestions::generate_suggestions;

use crate::error::IndexKind;
use crate::storage::Chunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Predicates applied after fusion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// File extensions without the dot; any may match
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Content types; any may match
    #[serde(default)]
    pub content_types: Vec<String>,
    /// Every key must be present with an equal value
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Inclusive bounds on the `upload_time` metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
}

/// Result ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum SortBy {
    /// Combined score, descending
    #[default]
    Relevance,
    /// `upload_time` metadata, newest first
    Date,
    /// Filename, ascending
    Filename,
}

impl From<&str> for SortBy {
    /// Unknown keys fall back to relevance
    fn from(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "date" => SortBy::Date,
            "filename" => SortBy::Filename,
            _ => SortBy::Relevance,
        }
    }
}

impl From<String> for SortBy {
    fn from(key: String) -> Self {
        SortBy::from(key.as_str())
    }
}

/// Hybrid search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    /// Minimum combined score, applied after every other filter
    pub threshold: f32,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub sort_by: SortBy,
    /// Compute facets over the filtered result set
    #[serde(default)]
    pub facets: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            threshold: 0.0,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            filters: SearchFilters::default(),
            sort_by: SortBy::Relevance,
            facets: false,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_weights(mut self, dense_weight: f32, lexical_weight: f32) -> Self {
        self.dense_weight = dense_weight;
        self.lexical_weight = lexical_weight;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_sort(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_facets(mut self, facets: bool) -> Self {
        self.facets = facets;
        self
    }

    /// Reject malformed requests before any index is touched
    pub fn validate(&self) -> Result<FusionWeights, SearchError> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidRequest(
                "Query text cannot be empty".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(SearchError::InvalidRequest(
                "Limit must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SearchError::InvalidRequest(format!(
                "Threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        FusionWeights::normalized(self.dense_weight, self.lexical_weight)
            .map_err(|e| SearchError::InvalidRequest(e.to_string()))
    }
}

/// Which retrieval paths produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Both paths contributed
    Hybrid,
    /// Dense only: semantic search, or the lexical path was absent or failed
    Semantic,
    /// Lexical only: the dense path failed
    Keyword,
    /// Served from the result cache
    HybridCached,
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            SearchType::Hybrid => "hybrid",
            SearchType::Semantic => "semantic",
            SearchType::Keyword => "keyword",
            SearchType::HybridCached => "hybrid_cached",
        };
        write!(f, "{}", tag)
    }
}

/// A retrieval path that did not contribute, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub path: IndexKind,
    pub reason: String,
}

/// Normalized per-path scores kept for explainability
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub dense: f32,
    pub lexical: f32,
}

/// A fused, hydrated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_id: String,
    pub filename: String,
    pub content: String,
    pub content_type: String,
    pub chunk_index: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Weighted combination of the component scores, in [0, 1]
    pub score: f32,
    pub component_scores: ComponentScores,
}

impl SearchResult {
    pub fn from_chunk(chunk: Chunk, candidate: &FusedCandidate) -> Self {
        Self {
            filename: chunk.filename().to_string(),
            chunk_id: chunk.chunk_id,
            file_id: chunk.file_id,
            content: chunk.content,
            content_type: chunk.content_type,
            chunk_index: chunk.chunk_index,
            metadata: chunk.metadata,
            score: candidate.combined_score,
            component_scores: ComponentScores {
                dense: candidate.dense_score,
                lexical: candidate.lexical_score,
            },
        }
    }

    /// Lowercased extension of the filename, if it has one
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .map(|(_, ext)| ext.to_lowercase())
    }

    /// Parsed `upload_time` metadata
    pub fn upload_time(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get("upload_time")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Aggregate counts over a filtered result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    pub file_types: BTreeMap<String, usize>,
    pub content_types: BTreeMap<String, usize>,
    pub authors: BTreeMap<String, usize>,
    pub date_ranges: BTreeMap<String, usize>,
}

/// Hybrid search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Matches after filtering, before the limit
    pub total_results: usize,
    pub search_type: SearchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Facets>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Paths that failed or timed out; empty on full-confidence responses
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    pub processing_time_ms: u64,
}

impl SearchResponse {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Score breakdown for one chunk against one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub query: String,
    pub chunk_id: String,
    /// Raw cosine similarity, when the chunk is in the dense index
    pub dense_similarity: Option<f32>,
    /// Raw BM25 score, when the chunk matches any query term
    pub lexical_raw: Option<f32>,
    pub component_scores: ComponentScores,
    /// Combined score under the configured default weights
    pub combined_score: f32,
    pub matching_terms: Vec<String>,
    /// Share of distinct query terms found in the chunk
    pub match_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_parsing() {
        assert_eq!(SortBy::from("date"), SortBy::Date);
        assert_eq!(SortBy::from("Filename"), SortBy::Filename);
        assert_eq!(SortBy::from("popularity"), SortBy::Relevance);

        let parsed: SortBy = serde_json::from_str("\"size\"").unwrap();
        assert_eq!(parsed, SortBy::Relevance);
    }

    #[test]
    fn test_request_validation() {
        assert!(SearchRequest::new("apple", 5).validate().is_ok());
        assert!(SearchRequest::new("   ", 5).validate().is_err());
        assert!(SearchRequest::new("apple", 0).validate().is_err());
        assert!(SearchRequest::new("apple", 5)
            .with_weights(-1.0, 1.0)
            .validate()
            .is_err());
        assert!(SearchRequest::new("apple", 5)
            .with_threshold(1.5)
            .validate()
            .is_err());

        let weights = SearchRequest::new("apple", 5)
            .with_weights(0.0, 0.0)
            .validate()
            .unwrap();
        assert_eq!(weights.dense, DEFAULT_DENSE_WEIGHT);
    }

    #[test]
    fn test_extension() {
        let chunk = Chunk::new("c", "f", "text", "pdf").with_metadata("filename", "Report.Final.PDF");
        let result = SearchResult::from_chunk(
            chunk,
            &FusedCandidate {
                chunk_id: "c".to_string(),
                dense_score: 0.0,
                lexical_score: 0.0,
                combined_score: 0.0,
            },
        );
        assert_eq!(result.extension().as_deref(), Some("pdf"));

        let mut bare = result.clone();
        bare.filename = "README".to_string();
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn test_search_type_tags() {
        assert_eq!(SearchType::HybridCached.to_string(), "hybrid_cached");
        assert_eq!(
            serde_json::to_string(&SearchType::Semantic).unwrap(),
            "\"semantic\""
        );
    }
}
