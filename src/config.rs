//! Project configuration: `<root>/.amanmcp/config.yaml`.
//!
//! Follows the nested-default-section pattern: every section implements
//! `Default` and the whole tree deserializes with `#[serde(default)]` so a
//! partial or missing file still yields sane values.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Remote,
    Alternate,
    Deterministic,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        EmbeddingProvider::Deterministic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub endpoint: Option<String>,
    pub dimensions: usize,
    /// Sleep between embedding batches, in milliseconds.
    pub inter_batch_delay_ms: u64,
    /// Multiplier on per-batch timeout as the batch index grows (see embedder timeout policy).
    pub timeout_progression: f64,
    /// Multiplier on per-retry timeout for transient failures.
    pub retry_timeout_multiplier: f64,
    pub base_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Deterministic,
            model: "minishlab/potion-retrieval-32M".to_string(),
            endpoint: None,
            dimensions: 256,
            inter_batch_delay_ms: 0,
            timeout_progression: 2.0,
            retry_timeout_multiplier: 1.5,
            base_timeout_ms: 5_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub bm25_weight: f64,
    pub semantic_weight: f64,
    pub rrf_constant: u32,
    pub max_results: usize,
    pub adjacent_count: usize,
    pub rerank_enabled: bool,
    pub rerank_endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            bm25_weight: 0.35,
            semantic_weight: 0.65,
            rrf_constant: 60,
            max_results: 10,
            adjacent_count: 1,
            rerank_enabled: false,
            rerank_endpoint: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub secret_globs: Vec<String>,
    pub vendored_dirs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            poll_interval_ms: 5_000,
            secret_globs: vec!["*.pem".into(), "*.key".into(), "*secret*".into()],
            vendored_dirs: vec![
                "node_modules".into(),
                ".git".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                "vendor".into(),
                ".venv".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Files larger than this (bytes) are skipped.
    pub max_file_size: u64,
    pub batch_size: usize,
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    pub idle_compaction_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            batch_size: 32,
            max_chunk_tokens: 1_500,
            min_chunk_tokens: 500,
            idle_compaction_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embeddings: EmbeddingsConfig,
    pub search: SearchConfig,
    pub watcher: WatcherConfig,
    pub indexer: IndexerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embeddings: EmbeddingsConfig::default(),
            search: SearchConfig::default(),
            watcher: WatcherConfig::default(),
            indexer: IndexerConfig::default(),
        }
    }
}

/// Directory name under the project root holding all index artifacts.
pub const INDEX_DIR_NAME: &str = ".amanmcp";

pub fn index_dir(repo_root: &Path) -> std::path::PathBuf {
    repo_root.join(INDEX_DIR_NAME)
}

/// Load `<root>/.amanmcp/config.yaml`, falling back to defaults on any read
/// or parse failure (a missing or partial config is not an error).
pub fn load_config(repo_root: &Path) -> Config {
    let path = index_dir(repo_root).join("config.yaml");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    serde_yaml::from_str::<Config>(&text).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "config.yaml parse failed, using defaults");
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.search.rrf_constant, 60);
        assert!((cfg.search.bm25_weight + cfg.search.semantic_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.indexer.max_chunk_tokens, 1_500);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(index_dir(dir.path())).unwrap();
        std::fs::write(
            index_dir(dir.path()).join("config.yaml"),
            "search:\n  max_results: 25\n",
        )
        .unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.search.max_results, 25);
        assert_eq!(cfg.search.rrf_constant, 60);
    }
}
