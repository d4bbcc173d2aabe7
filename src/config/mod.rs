//! Configuration management for Conflux
//!
//! Configuration lives in a single TOML file. Values can be overridden per
//! named profile and through `CONFLUX_SECTION__KEY` environment variables;
//! every load is validated before use.

use crate::error::{ConfluxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the chunk database, dense snapshot and lexical index
    pub data_dir: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" or "hashing"
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

/// Index construction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
    /// Disabling the lexical index makes every query dense-only
    pub lexical_enabled: bool,
    pub lexical_writer_heap_bytes: usize,
}

/// Query-time configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub default_threshold: f32,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    /// Each path is asked for `limit * over_fetch_factor` candidates
    pub over_fetch_factor: usize,
    /// "min_max" or "divisor"
    pub lexical_normalization: String,
    pub lexical_divisor: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_normalization: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfluxError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfluxError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from `path` when it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfluxError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfluxError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| ConfluxError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(weight) = overrides.dense_weight {
            self.search.dense_weight = weight;
        }
        if let Some(weight) = overrides.lexical_weight {
            self.search.lexical_weight = weight;
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(normalization) = overrides.lexical_normalization {
            self.search.lexical_normalization = normalization;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CONFLUX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CONFLUX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "INDEXING__LEXICAL_ENABLED" => {
                self.indexing.lexical_enabled = parse_env(path, value)?
            }
            "SEARCH__DEFAULT_LIMIT" => self.search.default_limit = parse_env(path, value)?,
            "SEARCH__DENSE_WEIGHT" => self.search.dense_weight = parse_env(path, value)?,
            "SEARCH__LEXICAL_WEIGHT" => self.search.lexical_weight = parse_env(path, value)?,
            "SEARCH__LEXICAL_NORMALIZATION" => {
                self.search.lexical_normalization = value.to_string()
            }
            "SEARCH__QUERY_TIMEOUT_MS" => {
                self.search.query_timeout_ms = Some(parse_env(path, value)?)
            }
            "SEARCH__CACHE_ENABLED" => self.search.cache_enabled = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Data directory with a leading `~/` expanded
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        expand_home(&self.storage.data_dir)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfluxError::Config("Cannot determine config directory".to_string()))?;
        Ok(config_dir.join("conflux").join("config.toml"))
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ConfluxError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ConfluxError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.conflux"),
            },
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                batch_size: 32,
            },
            indexing: IndexingConfig {
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
                max_elements: 100_000,
                lexical_enabled: true,
                lexical_writer_heap_bytes: 50_000_000,
            },
            search: SearchConfig {
                default_limit: 10,
                default_threshold: 0.7,
                dense_weight: 0.7,
                lexical_weight: 0.3,
                over_fetch_factor: 2,
                lexical_normalization: "min_max".to_string(),
                lexical_divisor: 10.0,
                query_timeout_ms: None,
                cache_enabled: true,
                cache_ttl_secs: 3600,
                cache_capacity: 256,
            },
            profiles: HashMap::new(),
        }
    }
}
