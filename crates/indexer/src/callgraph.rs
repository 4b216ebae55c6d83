//! Call-graph extraction seam.
//!
//! Extraction is a collaborator: the pipeline invokes it per changed file
//! when enabled, stores whatever record it returns, and treats failures as
//! non-fatal. The store re-derives the reverse call map from these records
//! after each run.

use std::path::Path;

pub use store::FileCallData;

/// Extracts per-file call information.
pub trait CallGraphExtractor: Send + Sync {
  /// May fail on any input; the pipeline logs and moves on.
  fn extract(&self, content: &str, file: &Path) -> Result<FileCallData, ExtractError>;
}

/// A file the extractor could not process
#[derive(Debug, thiserror::Error)]
#[error("call extraction failed: {0}")]
pub struct ExtractError(pub String);
