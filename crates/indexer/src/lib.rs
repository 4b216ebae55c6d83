//! Incremental semantic code indexing.
//!
//! The pipeline: discover files under the search root, pre-filter by
//! content hash so only changed files do any work, chunk along code
//! boundaries, embed across a pool of worker threads, and commit vectors
//! plus per-file hashes to the persistent store. A filesystem watcher
//! keeps the index live between full passes.
//!
//! ```text
//! discover -> pre-filter -> [ chunk -> embed (pool) -> commit ] -> persist
//!                 ^                                        |
//!             file hashes  <------------------------------ +
//! ```
//!
//! [`Indexer`] is the entry point; everything process-wide (single-flight
//! guard, watch-event queue, worker pool) hangs off it.

pub mod callgraph;
pub mod chunker;
pub mod discover;
pub mod exclude;
pub mod pool;
pub mod prefilter;
pub mod progress;
pub mod watcher;

mod coordinator;
mod error;
mod pipeline;

use std::path::Path;

pub use coordinator::{IndexOutcome, IndexSummary, Indexer, SharedStore};
pub use error::IndexError;
pub use progress::{IndexProgress, PROGRESS_TOKEN};
pub use watcher::{FileWatcher, WatchKind, WatcherError, WatcherHandle};

/// Canonical store key for a path: forward-slash, relative to the root.
pub fn relative_key(root: &Path, path: &Path) -> String {
  path
    .strip_prefix(root)
    .unwrap_or(path)
    .to_string_lossy()
    .replace('\\', "/")
}
