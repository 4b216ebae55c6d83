//! Pre-filter - decides which discovered files actually need work.
//!
//! Each candidate is stat'ed, size-checked, read, and hashed; a file whose
//! content hash matches the store's recorded hash is dropped before any
//! chunking or embedding happens. Reads run in bounded waves so memory
//! stays proportional to `parallel_files * max_file_size`, never to the
//! size of the tree.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::relative_key;

/// A unit of work handed to the batch pipeline: a changed file with its
/// pre-read content and precomputed hash.
#[derive(Debug, Clone)]
pub struct PendingJob {
  pub path: PathBuf,
  /// Forward-slash path relative to the search root
  pub relative: String,
  pub content: String,
  /// sha256 hex of the file bytes
  pub hash: String,
  /// Skip the unchanged check downstream
  pub force: bool,
}

/// Per-category outcome counts; every candidate lands in exactly one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
  pub changed: usize,
  pub unchanged: usize,
  pub too_large: usize,
  pub directories: usize,
  pub errors: usize,
}

impl FilterStats {
  pub fn total(&self) -> usize {
    self.changed + self.unchanged + self.too_large + self.directories + self.errors
  }
}

enum Probe {
  Changed(PendingJob),
  Unchanged,
  TooLarge,
  Directory,
  Error,
}

/// sha256 hex digest of raw bytes, the store's content hash.
pub fn content_hash(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Filter candidates down to the files whose content differs from the
/// recorded hash.
///
/// `known_hashes` is a snapshot of the store's hash map taken before the
/// waves start, so the store lock is never held across file I/O.
pub async fn prefilter(
  root: &Path,
  candidates: Vec<PathBuf>,
  known_hashes: &HashMap<String, String>,
  max_file_size: u64,
  parallel_files: usize,
) -> (Vec<PendingJob>, FilterStats) {
  let mut jobs = Vec::new();
  let mut stats = FilterStats::default();

  for wave in candidates.chunks(parallel_files.max(1)) {
    let probes = futures::future::join_all(
      wave
        .iter()
        .map(|path| probe_file(root, path, known_hashes, max_file_size)),
    )
    .await;

    for probe in probes {
      match probe {
        Probe::Changed(job) => {
          stats.changed += 1;
          jobs.push(job);
        }
        Probe::Unchanged => stats.unchanged += 1,
        Probe::TooLarge => stats.too_large += 1,
        Probe::Directory => stats.directories += 1,
        Probe::Error => stats.errors += 1,
      }
    }
  }

  debug!(
    changed = stats.changed,
    unchanged = stats.unchanged,
    too_large = stats.too_large,
    errors = stats.errors,
    "Pre-filter complete"
  );

  (jobs, stats)
}

async fn probe_file(root: &Path, path: &Path, known_hashes: &HashMap<String, String>, max_file_size: u64) -> Probe {
  let metadata = match tokio::fs::metadata(path).await {
    Ok(m) => m,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "Failed to stat file");
      return Probe::Error;
    }
  };

  if metadata.is_dir() {
    return Probe::Directory;
  }

  if metadata.len() > max_file_size {
    trace!(path = %path.display(), size = metadata.len(), "File too large, skipping");
    return Probe::TooLarge;
  }

  let bytes = match tokio::fs::read(path).await {
    Ok(bytes) => bytes,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "Failed to read file");
      return Probe::Error;
    }
  };

  let content = match String::from_utf8(bytes) {
    Ok(content) => content,
    Err(_) => {
      debug!(path = %path.display(), "File is not valid UTF-8, skipping");
      return Probe::Error;
    }
  };

  let hash = content_hash(content.as_bytes());
  let relative = relative_key(root, path);

  if known_hashes.get(&relative).map(|h| h.as_str()) == Some(hash.as_str()) {
    return Probe::Unchanged;
  }

  Probe::Changed(PendingJob {
    path: path.to_path_buf(),
    relative,
    content,
    hash,
    force: false,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[tokio::test]
  async fn test_unchanged_files_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.rs");
    std::fs::write(&path, "fn main() {}").unwrap();

    let mut known = HashMap::new();
    known.insert("a.rs".to_string(), content_hash(b"fn main() {}"));

    let (jobs, stats) = prefilter(dir.path(), vec![path], &known, 1024 * 1024, 4).await;
    assert!(jobs.is_empty());
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.total(), 1);
  }

  #[tokio::test]
  async fn test_changed_files_carry_content_and_hash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.rs");
    std::fs::write(&path, "fn main() {}").unwrap();

    let mut known = HashMap::new();
    known.insert("a.rs".to_string(), "stale-hash".to_string());

    let (jobs, stats) = prefilter(dir.path(), vec![path.clone()], &known, 1024 * 1024, 4).await;
    assert_eq!(stats.changed, 1);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].relative, "a.rs");
    assert_eq!(jobs[0].content, "fn main() {}");
    assert_eq!(jobs[0].hash, content_hash(b"fn main() {}"));
    assert!(!jobs[0].force);
  }

  #[tokio::test]
  async fn test_oversize_files_are_counted_not_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.rs");
    std::fs::write(&path, "x".repeat(2048)).unwrap();

    let (jobs, stats) = prefilter(dir.path(), vec![path], &HashMap::new(), 1024, 4).await;
    assert!(jobs.is_empty());
    assert_eq!(stats.too_large, 1);
  }

  #[tokio::test]
  async fn test_missing_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.rs");

    let (jobs, stats) = prefilter(dir.path(), vec![path], &HashMap::new(), 1024, 4).await;
    assert!(jobs.is_empty());
    assert_eq!(stats.errors, 1);
  }

  #[tokio::test]
  async fn test_non_utf8_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bin.rs");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();

    let (jobs, stats) = prefilter(dir.path(), vec![path], &HashMap::new(), 1024, 4).await;
    assert!(jobs.is_empty());
    assert_eq!(stats.errors, 1);
  }

  #[tokio::test]
  async fn test_every_candidate_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.rs");
    let b = dir.path().join("b.rs");
    let missing = dir.path().join("missing.rs");
    std::fs::write(&a, "fn a() {}").unwrap();
    std::fs::write(&b, "fn b() {}").unwrap();

    let mut known = HashMap::new();
    known.insert("a.rs".to_string(), content_hash(b"fn a() {}"));

    let (jobs, stats) = prefilter(dir.path(), vec![a, b, missing, dir.path().to_path_buf()], &known, 1024, 2).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(stats.changed, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.directories, 1);
    assert_eq!(stats.total(), 4);
  }
}
