/// Embedding and indexing
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - HashEmbedProvider for deterministic offline embedding
/// - DenseIndex: HNSW over unit vectors, persisted as a checksummed snapshot
/// - LexicalIndex: Tantivy BM25, analyzed with the shared Tokenizer
mod dense_index;
mod lexical_index;
mod provider;
mod tokenizer;

pub use dense_index::{DenseDocument, DenseEntry, DenseHit, DenseIndex, DenseIndexConfig, DenseIndexError};
pub use lexical_index::{LexicalEntry, LexicalHit, LexicalIndex, LexicalIndexConfig, LexicalIndexError};
pub use provider::{normalize, EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashEmbedProvider};
pub use tokenizer::Tokenizer;

use crate::config::{EmbeddingConfig, IndexingConfig};
use std::sync::Arc;

/// Construct the provider named by `config.provider`
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "fastembed" => {
            let provider = FastEmbedProvider::new(&config.model)?;
            if provider.dimension() != config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: config.dimension,
                    actual: provider.dimension(),
                });
            }
            Ok(Arc::new(provider))
        }
        "hashing" => Ok(Arc::new(HashEmbedProvider::new(config.dimension)?)),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

impl DenseIndexConfig {
    pub fn from_config(embedding: &EmbeddingConfig, indexing: &IndexingConfig) -> Self {
        Self {
            dimension: embedding.dimension,
            hnsw_m: indexing.hnsw_m,
            ef_construction: indexing.hnsw_ef_construction,
            ef_search: indexing.hnsw_ef_search,
            max_elements: indexing.max_elements,
            batch_size: embedding.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_hashing_provider() {
        let config = EmbeddingConfig {
            provider: "hashing".to_string(),
            model: "unused".to_string(),
            dimension: 128,
            batch_size: 8,
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dimension(), 128);
        assert_eq!(provider.model_name(), "hashing-128");
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "remote".to_string(),
            model: "x".to_string(),
            dimension: 8,
            batch_size: 1,
        };
        assert!(create_provider(&config).is_err());
    }
}
