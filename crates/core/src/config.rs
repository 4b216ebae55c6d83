//! Configuration for lodestone with per-project overrides.
//!
//! A project may place a `.lodestone.toml` at its root; anything not set
//! there falls back to the defaults below. Sections map one-to-one onto the
//! subsystems that consume them: `[index]` drives discovery and the batch
//! pipeline, `[chunking]` the chunker, `[embedding]` the provider and worker
//! pool, `[watcher]` the live-update path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-relative config file name.
pub const CONFIG_FILE_NAME: &str = ".lodestone.toml";

// ============================================================================
// Index Configuration
// ============================================================================

/// Worker thread count for the embedding pool.
///
/// `"auto"` resolves to `min(4, max(1, cpu_count - 1))` at pool startup;
/// a resolved count of 1 means the pool is never initialized and embedding
/// runs single-threaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerThreads {
  #[default]
  Auto,
  Count(usize),
}

impl WorkerThreads {
  /// Resolve the configured setting against an observed CPU count.
  pub fn resolve(&self, cpu_count: usize) -> usize {
    match self {
      WorkerThreads::Auto => 4.min(cpu_count.saturating_sub(1).max(1)),
      WorkerThreads::Count(n) => (*n).max(1),
    }
  }
}

impl Serialize for WorkerThreads {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      WorkerThreads::Auto => serializer.serialize_str("auto"),
      WorkerThreads::Count(n) => serializer.serialize_u64(*n as u64),
    }
  }
}

impl<'de> Deserialize<'de> for WorkerThreads {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Count(usize),
      Text(String),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Count(n) => Ok(WorkerThreads::Count(n)),
      Raw::Text(s) if s == "auto" => Ok(WorkerThreads::Auto),
      Raw::Text(s) => Err(serde::de::Error::custom(format!(
        "worker_threads must be an integer or \"auto\", got {s:?}"
      ))),
    }
  }
}

/// Discovery and pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Root directory to index (default: ".")
  pub search_directory: PathBuf,

  /// File extensions to index, without the leading dot
  pub file_extensions: Vec<String>,

  /// Glob patterns excluded from indexing.
  ///
  /// A pattern without `/` matches against file base names; otherwise it
  /// matches against the full forward-slash path relative to the root.
  pub exclude_patterns: Vec<String>,

  /// Files larger than this many bytes are skipped (default: 1 MiB)
  pub max_file_size: u64,

  /// Files per pipeline batch when the change set is small (default: 100).
  /// Large change sets scale this up automatically.
  pub batch_size: usize,

  /// Concurrent file reads during the pre-filter (default: 8)
  pub parallel_files: usize,

  /// Embedding pool size: an integer or "auto"
  pub worker_threads: WorkerThreads,

  /// Cache directory name under the search root. Never descended into.
  pub cache_dir: String,

  /// Keep the index live via a filesystem watcher (default: true)
  pub watch_files: bool,

  /// Extract per-file call data while indexing (default: true)
  pub call_graph_enabled: bool,

  /// Maintain the approximate-search index after runs (default: true)
  pub ann_enabled: bool,

  /// Verbose progress logging
  pub verbose: bool,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      search_directory: PathBuf::from("."),
      file_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
      exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
      max_file_size: 1024 * 1024,
      batch_size: 100,
      parallel_files: 8,
      worker_threads: WorkerThreads::Auto,
      cache_dir: ".lodestone".to_string(),
      watch_files: true,
      call_graph_enabled: true,
      ann_enabled: true,
      verbose: false,
    }
  }
}

const DEFAULT_EXTENSIONS: &[&str] = &[
  "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "hpp", "cs", "rb", "php", "swift", "kt",
];

const DEFAULT_EXCLUDES: &[&str] = &[
  "**/node_modules/**",
  "**/target/**",
  "**/dist/**",
  "**/build/**",
  "**/.git/**",
  "**/__pycache__/**",
  "**/.venv/**",
  "*.min.js",
];

// ============================================================================
// Chunking Configuration
// ============================================================================

/// Chunker budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
  /// Preferred chunk size in estimated tokens (default: 256)
  pub target_tokens: usize,

  /// Hard ceiling per chunk in estimated tokens (default: 512)
  pub max_tokens: usize,

  /// Chunks whose trimmed text is shorter than this are dropped (default: 16)
  pub min_chunk_len: usize,
}

impl Default for ChunkingConfig {
  fn default() -> Self {
    Self {
      target_tokens: 256,
      max_tokens: 512,
      min_chunk_len: 16,
    }
  }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// HuggingFace repo id of the static embedding model
  pub model: String,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      model: "minishlab/potion-base-8M".to_string(),
    }
  }
}

// ============================================================================
// Watcher Configuration
// ============================================================================

/// File watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  /// Write-stability window: a path's events must go quiet for this long
  /// before they are applied (default: 200)
  pub debounce_ms: u64,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self { debounce_ms: 200 }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub index: IndexConfig,
  pub chunking: ChunkingConfig,
  pub embedding: EmbeddingConfig,
  pub watcher: WatcherConfig,
}

impl Config {
  /// Load the project config from `<root>/.lodestone.toml`, falling back to
  /// defaults when the file is absent. A file that exists but does not parse
  /// is an error rather than a silent fallback.
  pub fn load(root: &Path) -> Result<Self, ConfigError> {
    let path = root.join(CONFIG_FILE_NAME);

    let text = match std::fs::read_to_string(&path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        tracing::debug!(path = %path.display(), "No project config, using defaults");
        return Ok(Self::default());
      }
      Err(e) => return Err(ConfigError::Read { path, source: e }),
    };

    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse {
      path,
      reason: e.to_string(),
    })?;

    Ok(config)
  }
}

/// Errors loading the project config
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {reason}")]
  Parse { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.index.batch_size, 100);
    assert_eq!(config.index.max_file_size, 1024 * 1024);
    assert_eq!(config.index.worker_threads, WorkerThreads::Auto);
    assert!(config.index.watch_files);
    assert_eq!(config.chunking.target_tokens, 256);
    assert!(config.chunking.max_tokens >= config.chunking.target_tokens);
  }

  #[test]
  fn test_worker_threads_auto_resolution() {
    assert_eq!(WorkerThreads::Auto.resolve(1), 1);
    assert_eq!(WorkerThreads::Auto.resolve(2), 1);
    assert_eq!(WorkerThreads::Auto.resolve(4), 3);
    assert_eq!(WorkerThreads::Auto.resolve(8), 4);
    assert_eq!(WorkerThreads::Auto.resolve(32), 4);
    assert_eq!(WorkerThreads::Count(6).resolve(2), 6);
    assert_eq!(WorkerThreads::Count(0).resolve(8), 1);
  }

  #[test]
  fn test_worker_threads_parsing() {
    #[derive(Deserialize)]
    struct Wrapper {
      worker_threads: WorkerThreads,
    }

    let auto: Wrapper = toml::from_str(r#"worker_threads = "auto""#).unwrap();
    assert_eq!(auto.worker_threads, WorkerThreads::Auto);

    let count: Wrapper = toml::from_str("worker_threads = 3").unwrap();
    assert_eq!(count.worker_threads, WorkerThreads::Count(3));

    assert!(toml::from_str::<Wrapper>(r#"worker_threads = "many""#).is_err());
  }

  #[test]
  fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.index.batch_size, Config::default().index.batch_size);
  }

  #[test]
  fn test_load_partial_override() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(CONFIG_FILE_NAME),
      r#"
[index]
batch_size = 25
worker_threads = 2
file_extensions = ["rs"]

[chunking]
target_tokens = 128
"#,
    )
    .unwrap();

    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.index.batch_size, 25);
    assert_eq!(config.index.worker_threads, WorkerThreads::Count(2));
    assert_eq!(config.index.file_extensions, vec!["rs".to_string()]);
    assert_eq!(config.chunking.target_tokens, 128);
    // Untouched sections keep their defaults.
    assert_eq!(config.watcher.debounce_ms, 200);
  }

  #[test]
  fn test_load_invalid_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "index = 12").unwrap();
    assert!(Config::load(dir.path()).is_err());
  }
}
