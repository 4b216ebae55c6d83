mod config;

pub use config::{
  CONFIG_FILE_NAME, ChunkingConfig, Config, ConfigError, EmbeddingConfig, IndexConfig, WatcherConfig, WorkerThreads,
};
