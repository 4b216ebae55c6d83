//! Shared fixtures: a deterministic fake embedding stack and a tempdir
//! project builder.

#![allow(dead_code)]

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use embedding::{EmbedOptions, Embedder, EmbedderFactory, EmbeddingError};
use lodestone_core::{Config, WorkerThreads};

/// Chunks containing this marker fail to embed (when the factory is built
/// with `marker_failures`).
pub const FAIL_MARKER: &str = "__embed_fail__";

/// Deterministic 4-dim embedding of a text, shared by fakes and asserts.
pub fn embed_text(text: &str) -> Vec<f32> {
  let len = text.len() as f32;
  let sum = text.bytes().map(|b| b as u32).sum::<u32>() as f32;
  let lines = text.lines().count() as f32;
  vec![len, sum % 997.0, lines, 1.0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedBehavior {
  /// Always succeed
  Ok,
  /// Fail every chunk
  AlwaysFail,
  /// Fail only chunks containing [`FAIL_MARKER`]
  MarkerFail,
}

pub struct FakeEmbedder {
  behavior: EmbedBehavior,
}

impl Embedder for FakeEmbedder {
  fn model_id(&self) -> &str {
    "fake-model"
  }

  fn dimensions(&self) -> usize {
    4
  }

  fn embed(&self, text: &str, _options: &EmbedOptions) -> Result<Vec<f32>, EmbeddingError> {
    match self.behavior {
      EmbedBehavior::AlwaysFail => Err(EmbeddingError::Embed("forced failure".into())),
      EmbedBehavior::MarkerFail if text.contains(FAIL_MARKER) => Err(EmbeddingError::Embed("marker failure".into())),
      _ => Ok(embed_text(text)),
    }
  }
}

/// Configurable fake factory.
///
/// The nth load (0-based) uses `AlwaysFail` while `n < failing_loads`, then
/// `default_behavior`. `load_delay` applies to every load, which makes
/// index passes observably slow for the single-flight and queueing tests.
pub struct FakeFactory {
  pub loads: AtomicUsize,
  load_delay: Duration,
  failing_loads: usize,
  default_behavior: EmbedBehavior,
}

impl FakeFactory {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      loads: AtomicUsize::new(0),
      load_delay: Duration::ZERO,
      failing_loads: 0,
      default_behavior: EmbedBehavior::Ok,
    })
  }

  /// Every model load sleeps for `delay`.
  pub fn slow(delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      loads: AtomicUsize::new(0),
      load_delay: delay,
      failing_loads: 0,
      default_behavior: EmbedBehavior::Ok,
    })
  }

  /// The first `n` loads produce embedders that fail every chunk.
  pub fn failing_first(n: usize) -> Arc<Self> {
    Arc::new(Self {
      loads: AtomicUsize::new(0),
      load_delay: Duration::ZERO,
      failing_loads: n,
      default_behavior: EmbedBehavior::Ok,
    })
  }

  /// All embedders fail chunks containing [`FAIL_MARKER`].
  pub fn marker_failures() -> Arc<Self> {
    Arc::new(Self {
      loads: AtomicUsize::new(0),
      load_delay: Duration::ZERO,
      failing_loads: 0,
      default_behavior: EmbedBehavior::MarkerFail,
    })
  }
}

impl EmbedderFactory for FakeFactory {
  fn load(&self, _model_id: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let n = self.loads.fetch_add(1, Ordering::SeqCst);
    if !self.load_delay.is_zero() {
      std::thread::sleep(self.load_delay);
    }
    let behavior = if n < self.failing_loads {
      EmbedBehavior::AlwaysFail
    } else {
      self.default_behavior
    };
    Ok(Arc::new(FakeEmbedder { behavior }))
  }
}

// ============================================================================
// Project fixture
// ============================================================================

pub struct TestProject {
  // Held for its Drop; the tempdir outlives every path derived from it.
  _dir: tempfile::TempDir,
  pub root: PathBuf,
}

impl TestProject {
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    Self { _dir: dir, root }
  }

  /// Single-threaded config rooted at this project, tuned for tests:
  /// js+rs files, tiny debounce, no minimum chunk length.
  pub fn config(&self) -> Config {
    let mut config = Config::default();
    config.index.search_directory = self.root.clone();
    config.index.file_extensions = vec!["rs".into(), "js".into()];
    config.index.worker_threads = WorkerThreads::Count(1);
    config.index.parallel_files = 4;
    config.chunking.min_chunk_len = 1;
    config.watcher.debounce_ms = 50;
    config
  }

  pub fn write(&self, rel: &str, content: &str) -> PathBuf {
    let path = self.root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn remove(&self, rel: &str) {
    std::fs::remove_file(self.root.join(rel)).unwrap();
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.root.join(rel)
  }
}

/// sha256 hex, matching the indexer's content hash.
pub fn hash_of(content: &str) -> String {
  indexer::prefilter::content_hash(content.as_bytes())
}
