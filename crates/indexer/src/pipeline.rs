//! Batch pipeline - drives one pass of chunk/embed/commit work.
//!
//! For every file in a batch the old chunks are removed before new ones are
//! added, and the file's hash is written only when every one of its chunks
//! embedded successfully. A file with a failed chunk keeps its new chunks
//! but not its hash, so the next run picks it up again.

use std::{collections::HashMap, time::Instant};

use lodestone_core::ChunkingConfig;
use store::StoredChunk;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
  callgraph::CallGraphExtractor,
  chunker::Chunker,
  coordinator::SharedStore,
  error::IndexError,
  pool::{ChunkPayload, FallbackEmbedder, WorkerPool},
  prefilter::PendingJob,
  progress::IndexProgress,
};

/// Everything the pipeline borrows from the coordinator for one pass.
pub(crate) struct BatchContext<'a> {
  pub store: &'a SharedStore,
  pub chunker: &'a dyn Chunker,
  pub chunking: &'a ChunkingConfig,
  pub extractor: Option<&'a dyn CallGraphExtractor>,
  pub call_graph_enabled: bool,
  pub batch_size: usize,
  pub progress: Option<&'a mpsc::Sender<IndexProgress>>,
  pub fallback: &'a FallbackEmbedder,
}

/// Totals from one pipeline pass.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BatchStats {
  pub files_processed: usize,
  pub chunks_created: usize,
}

struct FileCounters {
  total: usize,
  success: usize,
  hash: String,
}

/// Batch size scales with the change set so huge reindexes amortize
/// dispatch overhead while small ones stay responsive.
pub(crate) fn adaptive_batch_size(total_files: usize, default_size: usize) -> usize {
  if total_files > 10_000 {
    500
  } else if total_files > 1_000 {
    200
  } else {
    default_size.max(1)
  }
}

/// Run all jobs through chunk -> embed -> commit, in batches.
pub(crate) async fn run_batches(
  ctx: BatchContext<'_>,
  jobs: Vec<PendingJob>,
  mut pool: Option<&mut WorkerPool>,
) -> Result<BatchStats, IndexError> {
  let total_files = jobs.len();
  let batch_size = adaptive_batch_size(total_files, ctx.batch_size);
  let started = Instant::now();

  debug!(total_files, batch_size, "Pipeline starting");

  let mut stats = BatchStats::default();

  for batch in jobs.chunks(batch_size) {
    let mut all_chunks: Vec<ChunkPayload> = Vec::new();
    let mut counters: HashMap<String, FileCounters> = HashMap::new();

    // Stage 1: drop stale chunks, extract call data, chunk.
    {
      let mut store = ctx.store.lock().await;
      for job in batch {
        store.remove_file_chunks(&job.relative);

        if ctx.call_graph_enabled {
          if let Some(extractor) = ctx.extractor {
            match extractor.extract(&job.content, &job.path) {
              Ok(data) => store.set_file_call_data(&job.relative, data),
              Err(e) => warn!(file = %job.relative, error = %e, "Call extraction failed"),
            }
          }
        }

        let chunks = ctx.chunker.chunk(&job.content, &job.path, ctx.chunking);
        counters.insert(
          job.relative.clone(),
          FileCounters {
            total: chunks.len(),
            success: 0,
            hash: job.hash.clone(),
          },
        );

        for chunk in chunks {
          all_chunks.push(ChunkPayload {
            file: job.relative.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.text,
          });
        }
      }
    }

    // Stage 2: embed, on the pool when available.
    let outcomes = match &mut pool {
      Some(pool) => pool.process(all_chunks, ctx.fallback).await,
      None => ctx.fallback.embed_payloads(all_chunks).await,
    };

    // Stage 3: commit successes, then hashes for fully-embedded files.
    {
      let mut store = ctx.store.lock().await;

      for outcome in outcomes {
        match outcome.result {
          Ok(vector) => {
            if let Some(counter) = counters.get_mut(&outcome.file) {
              counter.success += 1;
            }
            stats.chunks_created += 1;
            store.add_chunk(StoredChunk {
              file: outcome.file,
              start_line: outcome.start_line,
              end_line: outcome.end_line,
              content: outcome.content,
              vector,
            });
          }
          Err(e) => {
            warn!(file = %outcome.file, error = %e, "Chunk embedding failed");
          }
        }
      }

      for (file, counter) in &counters {
        if counter.total == 0 || counter.success == counter.total {
          store.set_file_hash(file, &counter.hash);
        } else {
          debug!(
            file = %file,
            success = counter.success,
            total = counter.total,
            "Hash withheld, file will be retried next run"
          );
        }
      }
    }

    stats.files_processed += batch.len();

    let rate = stats.files_processed as f64 / started.elapsed().as_secs_f64().max(0.001);
    info!(
      processed = stats.files_processed,
      total = total_files,
      files_per_sec = rate,
      "Batch committed"
    );
    if let Some(tx) = ctx.progress {
      let _ = tx.send(IndexProgress::batch(stats.files_processed, total_files, rate)).await;
    }
  }

  // Finalize: derived indexes, then persist. Persistence failures surface.
  {
    let mut store = ctx.store.lock().await;
    if ctx.call_graph_enabled {
      store.rebuild_call_graph();
    }
    store.save()?;
  }

  debug!(
    files = stats.files_processed,
    chunks = stats.chunks_created,
    "Pipeline complete"
  );
  Ok(stats)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_adaptive_batch_size() {
    assert_eq!(adaptive_batch_size(50, 100), 100);
    assert_eq!(adaptive_batch_size(1_000, 100), 100);
    assert_eq!(adaptive_batch_size(1_001, 100), 200);
    assert_eq!(adaptive_batch_size(10_001, 100), 500);
    assert_eq!(adaptive_batch_size(10, 0), 1);
  }
}
