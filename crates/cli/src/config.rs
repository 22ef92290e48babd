use anyhow::{Context, Result};
use extract::RetryPolicy;
use index::PipelineConfig;
use ingest::ChunkerConfig;
use query::RetrievalConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub work_dir: PathBuf,
    pub models: ModelConfig,
    pub chunking: ChunkingConfig,
    pub extraction: ExtractionConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // no refinement rounds, wide fan-out
    Accurate, // refinement rounds, narrow fan-out, patient retries
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub ollama_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_rounds: usize,
    pub merge_threshold: f32,
    pub summary_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Unset means every chunk extracts at once.
    pub max_concurrent_extractions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON files under `work_dir`.
    Local,
    /// Qdrant for vectors, Neo4j for the graph.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub qdrant_url: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            work_dir: PathBuf::from("data"),
            models: ModelConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            chat_model: "llama3".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let defaults = ChunkerConfig::default();
        Self {
            max_tokens: defaults.max_tokens,
            overlap_tokens: defaults.overlap_tokens,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            max_rounds: defaults.max_rounds,
            merge_threshold: defaults.merge_threshold,
            summary_tokens: defaults.summary_tokens,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: Some(5),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            qdrant_url: "http://localhost:6333".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Read `path` if it exists, then apply `GRAPHRAG_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GRAPHRAG_OLLAMA_URL") {
            self.models.ollama_url = url;
        }
        if let Some(password) = lookup("GRAPHRAG_NEO4J_PASSWORD") {
            self.storage.neo4j_password = password;
        }
        if let Some(dir) = lookup("GRAPHRAG_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
    }

    /// Replace the mode-dependent sections with the preset for `mode`.
    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        let preset = match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        };
        self.mode = mode;
        self.extraction.max_rounds = preset.extraction.max_rounds;
        self.concurrency = preset.concurrency;
        self.retry = preset.retry;
        self.cache = preset.cache;
        self.models.request_timeout_secs = preset.models.request_timeout_secs;
        self
    }

    pub fn fast_mode() -> Self {
        let mut config = Self::default();
        config.mode = OperationMode::Fast;
        config.extraction.max_rounds = 0;
        config.concurrency.max_concurrent_extractions = Some(20);
        config.retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        };
        config.cache.max_entries = 50000;
        config.models.request_timeout_secs = 30;
        config
    }

    pub fn accurate_mode() -> Self {
        let mut config = Self::default();
        config.mode = OperationMode::Accurate;
        config.extraction.max_rounds = 2;
        config.concurrency.max_concurrent_extractions = Some(3);
        config.retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 2000,
            max_backoff_ms: 20000,
        };
        config.cache = CacheConfig {
            enabled: false,
            max_entries: 0,
        };
        config.models.request_timeout_secs = 120;
        config
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_rounds: self.extraction.max_rounds,
            merge_threshold: self.extraction.merge_threshold,
            summary_tokens: self.extraction.summary_tokens,
            max_concurrent_chunks: self.concurrency.max_concurrent_extractions,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.mode, OperationMode::Balanced);
        assert_eq!(config.chunking.max_tokens, 1024);
        assert_eq!(config.retrieval.beam_width, 5);
        assert_eq!(config.pipeline_config().merge_threshold, 0.8);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphrag.toml");
        std::fs::write(
            &path,
            r#"
work_dir = "/tmp/kg"

[retrieval]
max_paths = 7

[storage]
backend = "remote"

[logging]
json = true
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.retrieval.max_paths, 7);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.storage.backend, StorageBackend::Remote);
        assert_eq!(config.storage.neo4j_user, "neo4j");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphrag.toml");
        std::fs::write(&path, "retrieval = 3").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("GRAPHRAG_OLLAMA_URL", "http://gpu-box:11434"),
            ("GRAPHRAG_WORK_DIR", "/srv/graphrag"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.models.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.work_dir, PathBuf::from("/srv/graphrag"));
        assert!(config.storage.neo4j_password.is_empty());
    }

    #[test]
    fn test_mode_presets() {
        let fast = AppConfig::default().with_mode(OperationMode::Fast);
        assert_eq!(fast.pipeline_config().max_concurrent_chunks, Some(20));
        assert_eq!(fast.extraction.max_rounds, 0);

        let accurate = AppConfig::default().with_mode(OperationMode::Accurate);
        assert_eq!(accurate.extraction.max_rounds, 2);
        assert!(!accurate.cache.enabled);
        // presets leave unrelated sections alone
        assert_eq!(accurate.retrieval.max_paths, 3);
    }
}
