//! Cosine top-k over stored chunks.
//!
//! Brute-force over a normalized-vector table. With a few thousand chunks of
//! a few hundred dimensions this is sub-millisecond; the table exists so
//! repeated queries skip the normalization pass, and it is rebuilt whenever
//! chunks change.

use crate::StoredChunk;

/// A search result: one chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
  pub score: f32,
  pub file: String,
  pub start_line: u32,
  pub end_line: u32,
  pub content: String,
}

/// Normalized copies of all chunk vectors, aligned by index with the chunk
/// list it was built from.
pub(crate) struct AnnIndex {
  normalized: Vec<Vec<f32>>,
}

impl AnnIndex {
  pub(crate) fn build(chunks: &[StoredChunk]) -> Self {
    let normalized = chunks
      .iter()
      .map(|c| {
        let norm = c.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
          c.vector.iter().map(|x| x / norm).collect()
        } else {
          c.vector.clone()
        }
      })
      .collect();
    Self { normalized }
  }

  pub(crate) fn query(&self, chunks: &[StoredChunk], vector: &[f32], limit: usize) -> Vec<QueryHit> {
    if chunks.is_empty() || limit == 0 {
      return Vec::new();
    }

    let query_norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if query_norm == 0.0 {
      return Vec::new();
    }

    let mut scored: Vec<(f32, usize)> = self
      .normalized
      .iter()
      .enumerate()
      .filter(|(_, v)| v.len() == vector.len())
      .map(|(i, v)| {
        let dot: f32 = v.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
        (dot / query_norm, i)
      })
      .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    scored
      .into_iter()
      .map(|(score, i)| {
        let chunk = &chunks[i];
        QueryHit {
          score,
          file: chunk.file.clone(),
          start_line: chunk.start_line,
          end_line: chunk.end_line,
          content: chunk.content.clone(),
        }
      })
      .collect()
  }
}
