use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{ConfluxError, Result, ValidationError};

const PROVIDERS: [&str; 2] = ["fastembed", "hashing"];
const NORMALIZATIONS: [&str; 2] = ["min_max", "divisor"];
/// Tantivy refuses smaller writer budgets
const MIN_WRITER_HEAP: usize = 15_000_000;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfluxError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if !PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be one of {:?}, got '{}'", PROVIDERS, provider),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        for (path, value) in [
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
            ("indexing.max_elements", indexing.max_elements),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }

        if indexing.lexical_writer_heap_bytes < MIN_WRITER_HEAP {
            errors.push(ValidationError::new(
                "indexing.lexical_writer_heap_bytes",
                format!(
                    "Writer heap must be at least {} bytes, got {}",
                    MIN_WRITER_HEAP, indexing.lexical_writer_heap_bytes
                ),
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if search.default_limit == 0 {
            errors.push(ValidationError::new(
                "search.default_limit",
                "Default limit must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&search.default_threshold) {
            errors.push(ValidationError::new(
                "search.default_threshold",
                format!(
                    "Threshold must be between 0.0 and 1.0, got {}",
                    search.default_threshold
                ),
            ));
        }

        for (path, weight) in [
            ("search.dense_weight", search.dense_weight),
            ("search.lexical_weight", search.lexical_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }

        if search.over_fetch_factor == 0 {
            errors.push(ValidationError::new(
                "search.over_fetch_factor",
                "Over-fetch factor must be greater than 0",
            ));
        }

        let normalization = &search.lexical_normalization;
        if !NORMALIZATIONS.contains(&normalization.as_str()) {
            errors.push(ValidationError::new(
                "search.lexical_normalization",
                format!(
                    "Normalization must be one of {:?}, got '{}'",
                    NORMALIZATIONS, normalization
                ),
            ));
        }

        if !search.lexical_divisor.is_finite() || search.lexical_divisor <= 0.0 {
            errors.push(ValidationError::new(
                "search.lexical_divisor",
                "Divisor must be greater than 0",
            ));
        }

        if search.query_timeout_ms == Some(0) {
            errors.push(ValidationError::new(
                "search.query_timeout_ms",
                "Timeout must be greater than 0 when set",
            ));
        }

        if search.cache_enabled && search.cache_capacity == 0 {
            errors.push(ValidationError::new(
                "search.cache_capacity",
                "Cache capacity must be greater than 0 when the cache is enabled",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.search.dense_weight = -1.0;
        config.search.lexical_normalization = "zscore".to_string();
        config.indexing.hnsw_m = 0;

        match ConfigValidator::validate(&config) {
            Err(ConfluxError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.path == "search.dense_weight"));
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_small_writer_heap_rejected() {
        let mut config = Config::default();
        config.indexing.lexical_writer_heap_bytes = 1_000;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
