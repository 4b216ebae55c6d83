//! Persistent cache/vector store.
//!
//! Flat-file JSON storage, no external database:
//!
//! ```text
//! <root>/<cache_dir>/index.json
//! {
//!   "version": 1,
//!   "files":     { "src/main.rs": "ab12..."  },   <- sha256 hex of bytes
//!   "chunks":    [ { file, start_line, end_line, content, vector } ],
//!   "call_data": { "src/main.rs": { definitions, calls } }
//! }
//! ```
//!
//! The store is the single shared mutable resource of the indexer. It makes
//! no attempt at crash transactionality: `save` is atomic (tmp + rename),
//! and a file whose hash was never committed is simply re-processed on the
//! next run. A corrupt or schema-incompatible index file is discarded with
//! a warning and rebuilt from scratch.

mod query;

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use query::QueryHit;
use query::AnnIndex;

/// On-disk schema version. Bump on incompatible changes; old files are
/// discarded, not migrated.
const SCHEMA_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.json";

// ============================================================================
// Records
// ============================================================================

/// A committed chunk: one embedded region of one file.
///
/// Immutable once stored; updating a file replaces all of its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
  /// Forward-slash path relative to the search root
  pub file: String,
  /// 0-indexed first line of the chunk
  pub start_line: u32,
  /// 0-indexed last line of the chunk (inclusive)
  pub end_line: u32,
  /// Chunk text as embedded
  pub content: String,
  pub vector: Vec<f32>,
}

/// Per-file call information produced by the optional extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCallData {
  /// Symbols defined in this file
  pub definitions: Vec<String>,
  /// Symbols this file calls
  pub calls: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
  #[serde(default)]
  version: u32,
  #[serde(default)]
  files: HashMap<String, String>,
  #[serde(default)]
  chunks: Vec<StoredChunk>,
  #[serde(default)]
  call_data: HashMap<String, FileCallData>,
}

// ============================================================================
// CacheStore
// ============================================================================

/// The persistent store: per-file content hashes, embedded chunks, and
/// call-graph data.
pub struct CacheStore {
  dir: PathBuf,
  files: HashMap<String, String>,
  chunks: Vec<StoredChunk>,
  call_data: HashMap<String, FileCallData>,
  /// Reverse call map, derived: symbol -> files that call it
  callers: HashMap<String, Vec<String>>,
  /// Normalized-vector table for queries, derived lazily
  ann: Option<AnnIndex>,
}

impl CacheStore {
  /// Open (or create) the store under the given cache directory.
  pub fn open(cache_dir: &Path) -> Result<Self, StoreError> {
    std::fs::create_dir_all(cache_dir).map_err(|e| StoreError::Io {
      path: cache_dir.to_path_buf(),
      source: e,
    })?;

    let index_path = cache_dir.join(INDEX_FILE);
    let snapshot = Self::load_snapshot(&index_path);

    debug!(
      dir = %cache_dir.display(),
      files = snapshot.files.len(),
      chunks = snapshot.chunks.len(),
      "Cache store opened"
    );

    let mut store = Self {
      dir: cache_dir.to_path_buf(),
      files: snapshot.files,
      chunks: snapshot.chunks,
      call_data: snapshot.call_data,
      callers: HashMap::new(),
      ann: None,
    };
    store.rebuild_call_graph();
    Ok(store)
  }

  fn load_snapshot(path: &Path) -> Snapshot {
    let text = match std::fs::read_to_string(path) {
      Ok(text) => text,
      Err(_) => return Snapshot::default(),
    };

    match serde_json::from_str::<Snapshot>(&text) {
      Ok(snapshot) if snapshot.version == SCHEMA_VERSION => snapshot,
      Ok(snapshot) => {
        warn!(
          found = snapshot.version,
          expected = SCHEMA_VERSION,
          "Index schema version mismatch, rebuilding"
        );
        Snapshot::default()
      }
      Err(e) => {
        warn!(error = %e, path = %path.display(), "Corrupt index file, rebuilding");
        Snapshot::default()
      }
    }
  }

  // ==========================================================================
  // File hashes
  // ==========================================================================

  pub fn file_hash(&self, file: &str) -> Option<&str> {
    self.files.get(file).map(|s| s.as_str())
  }

  pub fn set_file_hash(&mut self, file: &str, hash: &str) {
    self.files.insert(file.to_string(), hash.to_string());
  }

  pub fn delete_file_hash(&mut self, file: &str) {
    self.files.remove(file);
  }

  /// Snapshot of the hash map, used by the pre-filter to avoid holding the
  /// store lock across file reads.
  pub fn file_hashes(&self) -> HashMap<String, String> {
    self.files.clone()
  }

  /// All files the store knows about, from either the hash map or chunks.
  pub fn indexed_files(&self) -> Vec<String> {
    let mut files: Vec<String> = self.files.keys().cloned().collect();
    for chunk in &self.chunks {
      if !self.files.contains_key(&chunk.file) {
        files.push(chunk.file.clone());
      }
    }
    files.sort();
    files.dedup();
    files
  }

  // ==========================================================================
  // Chunks
  // ==========================================================================

  pub fn add_chunk(&mut self, chunk: StoredChunk) {
    self.chunks.push(chunk);
    self.ann = None;
  }

  /// Remove all chunks belonging to a file. Hash and call data stay.
  pub fn remove_file_chunks(&mut self, file: &str) {
    let before = self.chunks.len();
    self.chunks.retain(|c| c.file != file);
    if self.chunks.len() != before {
      self.ann = None;
    }
  }

  /// Remove every trace of a file: chunks, hash, and call data.
  pub fn purge_file(&mut self, file: &str) {
    self.remove_file_chunks(file);
    self.files.remove(file);
    self.call_data.remove(file);
  }

  pub fn chunks(&self) -> &[StoredChunk] {
    &self.chunks
  }

  pub fn chunk_count(&self) -> usize {
    self.chunks.len()
  }

  pub fn file_count(&self) -> usize {
    self.files.len()
  }

  /// Drop everything: chunks, hashes, call data.
  pub fn clear(&mut self) {
    self.files.clear();
    self.chunks.clear();
    self.call_data.clear();
    self.callers.clear();
    self.ann = None;
  }

  // ==========================================================================
  // Call graph
  // ==========================================================================

  pub fn set_file_call_data(&mut self, file: &str, data: FileCallData) {
    self.call_data.insert(file.to_string(), data);
  }

  pub fn delete_file_call_data(&mut self, file: &str) {
    self.call_data.remove(file);
  }

  pub fn file_call_data(&self, file: &str) -> Option<&FileCallData> {
    self.call_data.get(file)
  }

  /// Re-derive the reverse call map (symbol -> calling files) from the
  /// per-file call data.
  pub fn rebuild_call_graph(&mut self) {
    let mut callers: HashMap<String, Vec<String>> = HashMap::new();
    for (file, data) in &self.call_data {
      for symbol in &data.calls {
        callers.entry(symbol.clone()).or_default().push(file.clone());
      }
    }
    for files in callers.values_mut() {
      files.sort();
      files.dedup();
    }
    self.callers = callers;
  }

  /// Files that call the given symbol, per the last `rebuild_call_graph`.
  pub fn callers_of(&self, symbol: &str) -> &[String] {
    self.callers.get(symbol).map(|v| v.as_slice()).unwrap_or(&[])
  }

  // ==========================================================================
  // Query
  // ==========================================================================

  /// Build the normalized-vector table used by `query` if it is stale.
  pub fn ensure_ann_index(&mut self) -> Result<(), StoreError> {
    if self.ann.is_none() {
      self.ann = Some(AnnIndex::build(&self.chunks));
      debug!(chunks = self.chunks.len(), "Vector index rebuilt");
    }
    Ok(())
  }

  /// Cosine top-k over all chunks.
  pub fn query(&self, vector: &[f32], limit: usize) -> Vec<QueryHit> {
    match &self.ann {
      Some(ann) => ann.query(&self.chunks, vector, limit),
      None => AnnIndex::build(&self.chunks).query(&self.chunks, vector, limit),
    }
  }

  // ==========================================================================
  // Persistence
  // ==========================================================================

  /// Write the store to disk atomically (tmp file + rename).
  pub fn save(&self) -> Result<(), StoreError> {
    let snapshot = Snapshot {
      version: SCHEMA_VERSION,
      files: self.files.clone(),
      chunks: self.chunks.clone(),
      call_data: self.call_data.clone(),
    };

    let text = serde_json::to_string(&snapshot)?;

    let final_path = self.dir.join(INDEX_FILE);
    let tmp_path = self.dir.join(format!("{INDEX_FILE}.tmp"));

    std::fs::write(&tmp_path, text).map_err(|e| StoreError::Io {
      path: tmp_path.clone(),
      source: e,
    })?;
    std::fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::Io {
      path: final_path.clone(),
      source: e,
    })?;

    debug!(
      path = %final_path.display(),
      files = self.files.len(),
      chunks = self.chunks.len(),
      "Store persisted"
    );
    Ok(())
  }
}

/// Errors from store persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("store I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("store serialization error: {0}")]
  Serialize(#[from] serde_json::Error),
}
