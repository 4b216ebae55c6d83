//! Embedding provider abstraction.
//!
//! The indexer never talks to a model directly; it goes through [`Embedder`].
//! Each pool worker loads its own provider instance via [`EmbedderFactory`]
//! so that model state is never shared across threads, and tests can inject
//! deterministic fakes through the same seam.

mod static_model;

use std::sync::Arc;

pub use static_model::{StaticEmbedder, StaticEmbedderFactory};

/// Vector pooling strategy requested by the caller.
///
/// Static models are mean-pooled by construction; the option exists so the
/// call site states what it relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
  #[default]
  Mean,
}

/// Per-call embedding options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedOptions {
  pub pooling: Pooling,
  /// L2-normalize the output vector
  pub normalize: bool,
}

impl Default for EmbedOptions {
  fn default() -> Self {
    Self {
      pooling: Pooling::Mean,
      normalize: true,
    }
  }
}

/// A loaded embedding model.
///
/// Implementations are synchronous: pool workers embed on their own OS
/// thread, and async call sites wrap calls in `spawn_blocking`.
pub trait Embedder: Send + Sync {
  fn model_id(&self) -> &str;

  /// Output vector dimensionality
  fn dimensions(&self) -> usize;

  fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Vec<f32>, EmbeddingError>;
}

/// Loads [`Embedder`] instances by model id.
///
/// The worker pool calls this once per worker thread at startup; the
/// single-threaded fallback calls it lazily on first use.
pub trait EmbedderFactory: Send + Sync {
  fn load(&self, model_id: &str) -> Result<Arc<dyn Embedder>, EmbeddingError>;
}

/// Errors from loading or running an embedding model
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
  #[error("failed to load model {model}: {reason}")]
  ModelLoad { model: String, reason: String },

  #[error("embedding failed: {0}")]
  Embed(String),

  #[error("cannot embed empty text")]
  EmptyInput,
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
  let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm > 0.0 {
    for x in vector.iter_mut() {
      *x /= norm;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_options() {
    let options = EmbedOptions::default();
    assert_eq!(options.pooling, Pooling::Mean);
    assert!(options.normalize);
  }

  #[test]
  fn test_l2_normalize() {
    let mut v = vec![3.0, 4.0];
    l2_normalize(&mut v);
    assert!((v[0] - 0.6).abs() < 1e-6);
    assert!((v[1] - 0.8).abs() < 1e-6);

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
  }

  #[test]
  fn test_l2_normalize_zero_vector() {
    let mut v = vec![0.0, 0.0, 0.0];
    l2_normalize(&mut v);
    assert_eq!(v, vec![0.0, 0.0, 0.0]);
  }
}
