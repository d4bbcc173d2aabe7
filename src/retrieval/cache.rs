//! In-memory TTL cache of hybrid search responses

use super::{SearchRequest, SearchResponse, SearchType};
use ahash::{HashMap, HashMapExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CacheEntry {
    response: SearchResponse,
    inserted_at: Instant,
}

/// Request-keyed response cache
///
/// Keys are BLAKE3 digests of a canonical encoding of the request. Entries
/// expire after `ttl`; at capacity the oldest entry is evicted.
pub struct ResultCache {
    entries: Mutex<HashMap<blake3::Hash, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

/// Field order is fixed and metadata is sorted so equal requests hash equally
#[derive(Serialize)]
struct CacheKey<'a> {
    query: &'a str,
    limit: usize,
    threshold: u32,
    dense_weight: u32,
    lexical_weight: u32,
    file_types: &'a [String],
    content_types: &'a [String],
    metadata: BTreeMap<&'a String, &'a serde_json::Value>,
    date_from: Option<i64>,
    date_to: Option<i64>,
    sort_by: super::SortBy,
    facets: bool,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn key(request: &SearchRequest) -> Option<blake3::Hash> {
        let key = CacheKey {
            query: request.query.trim(),
            limit: request.limit,
            threshold: request.threshold.to_bits(),
            dense_weight: request.dense_weight.to_bits(),
            lexical_weight: request.lexical_weight.to_bits(),
            file_types: &request.filters.file_types,
            content_types: &request.filters.content_types,
            metadata: request.filters.metadata.iter().collect(),
            date_from: request.filters.date_from.map(|t| t.timestamp_millis()),
            date_to: request.filters.date_to.map(|t| t.timestamp_millis()),
            sort_by: request.sort_by,
            facets: request.facets,
        };
        serde_json::to_vec(&key).ok().map(|bytes| blake3::hash(&bytes))
    }

    /// Cached response for `request`, tagged as served from cache
    pub async fn get(&self, request: &SearchRequest) -> Option<SearchResponse> {
        let key = Self::key(request)?;
        let mut entries = self.entries.lock().await;

        let expired = entries
            .get(&key)
            .map(|e| e.inserted_at.elapsed() > self.ttl)?;
        if expired {
            entries.remove(&key);
            return None;
        }

        entries.get(&key).map(|entry| {
            let mut response = entry.response.clone();
            response.search_type = SearchType::HybridCached;
            response
        })
    }

    /// Store a response. Degraded responses are not cached.
    pub async fn insert(&self, request: &SearchRequest, response: &SearchResponse) {
        if response.is_degraded() {
            return;
        }
        let Some(key) = Self::key(request) else {
            return;
        };

        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.inserted_at.elapsed() <= self.ttl);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        if !entries.is_empty() {
            tracing::debug!("Invalidating {} cached responses", entries.len());
        }
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexKind;
    use crate::retrieval::Degradation;

    fn response(query: &str) -> SearchResponse {
        SearchResponse {
            query: query.to_string(),
            results: Vec::new(),
            total_results: 0,
            search_type: SearchType::Hybrid,
            facets: None,
            suggestions: Vec::new(),
            degradations: Vec::new(),
            processing_time_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_hit_is_tagged_cached() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        let request = SearchRequest::new("apple", 5);

        assert!(cache.get(&request).await.is_none());
        cache.insert(&request, &response("apple")).await;

        let hit = cache.get(&request).await.unwrap();
        assert_eq!(hit.search_type, SearchType::HybridCached);
        assert!(cache.get(&SearchRequest::new("apple", 6)).await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_order_irrelevant() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        let mut a = SearchRequest::new("q", 5);
        let mut b = SearchRequest::new("q", 5);
        for (k, v) in [("x", 1), ("y", 2), ("z", 3)] {
            a.filters.metadata.insert(k.to_string(), v.into());
        }
        for (k, v) in [("z", 3), ("y", 2), ("x", 1)] {
            b.filters.metadata.insert(k.to_string(), v.into());
        }

        cache.insert(&a, &response("q")).await;
        assert!(cache.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = ResultCache::new(Duration::from_millis(0), 8);
        let request = SearchRequest::new("apple", 5);
        cache.insert(&request, &response("apple")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&request).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        let first = SearchRequest::new("one", 5);
        cache.insert(&first, &response("one")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert(&SearchRequest::new("two", 5), &response("two")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert(&SearchRequest::new("three", 5), &response("three")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&first).await.is_none());
    }

    #[tokio::test]
    async fn test_degraded_not_cached_and_clear() {
        let cache = ResultCache::new(Duration::from_secs(60), 8);
        let request = SearchRequest::new("apple", 5);

        let mut degraded = response("apple");
        degraded.degradations.push(Degradation {
            path: IndexKind::Lexical,
            reason: "timed out".to_string(),
        });
        cache.insert(&request, &degraded).await;
        assert!(cache.is_empty().await);

        cache.insert(&request, &response("apple")).await;
        cache.clear().await;
        assert!(cache.get(&request).await.is_none());
    }
}
