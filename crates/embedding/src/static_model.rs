//! Local static-model provider backed by model2vec.
//!
//! Static embedding models are small enough to load once per worker thread,
//! which is exactly what the pool contract wants: no shared model state, no
//! network dependency at embed time.

use std::sync::Arc;

use model2vec_rs::model::StaticModel;
use tracing::{debug, info};

use crate::{EmbedOptions, Embedder, EmbedderFactory, EmbeddingError, l2_normalize};

/// An in-process static embedding model (model2vec).
pub struct StaticEmbedder {
  model: StaticModel,
  model_id: String,
  dimensions: usize,
}

impl StaticEmbedder {
  /// Load a model from a HuggingFace repo id or a local path.
  ///
  /// Downloads the model on first use; subsequent loads hit the local
  /// HuggingFace cache.
  pub fn load(model_id: &str) -> Result<Self, EmbeddingError> {
    info!(model = model_id, "Loading embedding model");

    let model = StaticModel::from_pretrained(model_id, None, None, None).map_err(|e| EmbeddingError::ModelLoad {
      model: model_id.to_string(),
      reason: e.to_string(),
    })?;

    // Probe the output size once; model configs do not expose it uniformly.
    let probe = model.encode_single("dimension probe");
    let dimensions = probe.len();

    debug!(model = model_id, dimensions, "Embedding model ready");

    Ok(Self {
      model,
      model_id: model_id.to_string(),
      dimensions,
    })
  }
}

impl Embedder for StaticEmbedder {
  fn model_id(&self) -> &str {
    &self.model_id
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Vec<f32>, EmbeddingError> {
    if text.trim().is_empty() {
      return Err(EmbeddingError::EmptyInput);
    }

    let mut vector = self.model.encode_single(text);
    if vector.is_empty() {
      return Err(EmbeddingError::Embed(format!(
        "model {} returned an empty vector",
        self.model_id
      )));
    }

    if options.normalize {
      l2_normalize(&mut vector);
    }

    Ok(vector)
  }
}

/// Factory producing [`StaticEmbedder`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEmbedderFactory;

impl EmbedderFactory for StaticEmbedderFactory {
  fn load(&self, model_id: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Ok(Arc::new(StaticEmbedder::load(model_id)?))
  }
}
