//! Code-aware chunking.
//!
//! Files are split along blank lines and top-level declaration starts, then
//! regions are greedily grouped under a token budget. The pipeline relies on
//! exactly one property: unchanged content produces identical boundaries.
//! Everything else (blank-line preference, minimum chunk length) is about
//! embedding quality, not correctness.

use std::path::Path;

use lodestone_core::ChunkingConfig;

/// Rough token count used for chunk budgets. Four characters per token is
/// the usual approximation for code.
pub fn estimate_tokens(text: &str) -> usize {
  text.len().div_ceil(4)
}

/// A contiguous region of a file ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
  pub text: String,
  /// 0-indexed first line
  pub start_line: u32,
  /// 0-indexed last line (inclusive)
  pub end_line: u32,
}

/// Splits file content into chunks.
pub trait Chunker: Send + Sync {
  /// Must be deterministic for a given `(content, file, config)`.
  fn chunk(&self, content: &str, file: &Path, config: &ChunkingConfig) -> Vec<Chunk>;
}

/// Default chunker: blank-line/top-level boundaries, greedy grouping.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryChunker;

impl Chunker for BoundaryChunker {
  fn chunk(&self, content: &str, _file: &Path, config: &ChunkingConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
      return Vec::new();
    }

    let max_tokens = config.max_tokens.max(1);
    let target_tokens = config.target_tokens.clamp(1, max_tokens);

    let regions = split_regions(&lines, max_tokens);
    let groups = group_regions(&regions, &lines, target_tokens);

    groups
      .into_iter()
      .map(|(start, end)| Chunk {
        text: lines[start..end].join("\n"),
        start_line: start as u32,
        end_line: (end - 1) as u32,
      })
      .filter(|c| c.text.trim().len() >= config.min_chunk_len)
      .collect()
  }
}

/// Split lines into `[start, end)` regions at code boundaries.
///
/// A region starts at line 0, after a blank line, or at a column-0
/// declaration that follows the end of an indented block. Regions cover
/// every line, so chunk texts jointly cover the whole file. A region whose
/// estimated tokens exceed `max_tokens` is hard-split by lines.
fn split_regions(lines: &[&str], max_tokens: usize) -> Vec<(usize, usize)> {
  let mut starts = vec![0usize];

  for i in 1..lines.len() {
    let line = lines[i];
    let prev = lines[i - 1];
    if line.trim().is_empty() {
      continue;
    }

    let prev_blank = prev.trim().is_empty();
    let prev_ends_block = !starts_at_column_zero(prev) || closes_block(prev);
    let top_level_after_block = !prev_blank && is_declaration_start(line) && prev_ends_block;

    if prev_blank || top_level_after_block {
      starts.push(i);
    }
  }

  let mut regions = Vec::with_capacity(starts.len());
  for (idx, &start) in starts.iter().enumerate() {
    let end = starts.get(idx + 1).copied().unwrap_or(lines.len());
    split_oversize(lines, start, end, max_tokens, &mut regions);
  }
  regions
}

fn starts_at_column_zero(line: &str) -> bool {
  line.chars().next().is_some_and(|c| !c.is_whitespace())
}

/// A column-0 line opening a new top-level item (`fn`, `class`, `def`, ...).
fn is_declaration_start(line: &str) -> bool {
  line.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// A column-0 closing delimiter (`}`, `)`, `]`) ending an indented block.
fn closes_block(line: &str) -> bool {
  starts_at_column_zero(line) && matches!(line.chars().next(), Some('}' | ')' | ']'))
}

/// Push `[start, end)`, hard-splitting by lines when the region exceeds the
/// token ceiling. A single line over the ceiling stays whole; boundaries are
/// line-based.
fn split_oversize(lines: &[&str], start: usize, end: usize, max_tokens: usize, out: &mut Vec<(usize, usize)>) {
  if region_tokens(lines, start, end) <= max_tokens {
    out.push((start, end));
    return;
  }

  let mut piece_start = start;
  let mut piece_tokens = 0usize;
  for i in start..end {
    let line_tokens = estimate_tokens(lines[i]) + 1;
    if i > piece_start && piece_tokens + line_tokens > max_tokens {
      out.push((piece_start, i));
      piece_start = i;
      piece_tokens = 0;
    }
    piece_tokens += line_tokens;
  }
  out.push((piece_start, end));
}

fn region_tokens(lines: &[&str], start: usize, end: usize) -> usize {
  lines[start..end].iter().map(|l| estimate_tokens(l) + 1).sum()
}

/// Greedily merge consecutive regions while the group stays under the
/// target budget.
fn group_regions(regions: &[(usize, usize)], lines: &[&str], target_tokens: usize) -> Vec<(usize, usize)> {
  let mut groups: Vec<(usize, usize)> = Vec::new();

  for &(start, end) in regions {
    let tokens = region_tokens(lines, start, end);
    match groups.last_mut() {
      Some(group) if region_tokens(lines, group.0, group.1) + tokens <= target_tokens => {
        group.1 = end;
      }
      _ => groups.push((start, end)),
    }
  }

  groups
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn chunk_with(content: &str, target: usize, max: usize, min_len: usize) -> Vec<Chunk> {
    let config = ChunkingConfig {
      target_tokens: target,
      max_tokens: max,
      min_chunk_len: min_len,
    };
    BoundaryChunker.chunk(content, Path::new("test.rs"), &config)
  }

  #[test]
  fn test_empty_content_yields_no_chunks() {
    assert!(chunk_with("", 256, 512, 0).is_empty());
  }

  #[test]
  fn test_deterministic() {
    let content = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n";
    let first = chunk_with(content, 8, 16, 0);
    let second = chunk_with(content, 8, 16, 0);
    assert_eq!(first, second);
  }

  #[test]
  fn test_splits_on_blank_lines() {
    let content = "fn alpha() {\n    body_one();\n}\n\nfn beta() {\n    body_two();\n}";
    // Budget too small to merge the two functions.
    let chunks = chunk_with(content, 8, 512, 0);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].start_line, 0);
    assert_eq!(chunks[0].end_line, 3);
    assert_eq!(chunks[1].start_line, 4);
    assert_eq!(chunks[1].end_line, 6);
    assert!(chunks[0].text.contains("alpha"));
    assert!(chunks[1].text.contains("beta"));
  }

  #[test]
  fn test_splits_on_top_level_boundary_without_blank_line() {
    let content = "fn alpha() {\n    body();\n}\nfn beta() {\n    body();\n}";
    let chunks = chunk_with(content, 8, 512, 0);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].start_line, 3);
  }

  #[test]
  fn test_small_regions_merge_under_target() {
    let content = "fn a() {}\n\nfn b() {}\n\nfn c() {}";
    let chunks = chunk_with(content, 256, 512, 0);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 0);
    assert_eq!(chunks[0].end_line, 4);
  }

  #[test]
  fn test_oversize_region_is_hard_split() {
    // One giant region with no internal boundaries.
    let line = "    let value = compute_something_fairly_long();";
    let content = std::iter::once("fn huge() {")
      .chain(std::iter::repeat_n(line, 60))
      .collect::<Vec<_>>()
      .join("\n");

    let chunks = chunk_with(&content, 64, 64, 0);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
      assert!(estimate_tokens(&chunk.text) <= 64 + estimate_tokens(line) + 1);
    }
  }

  #[test]
  fn test_chunks_cover_all_lines() {
    let content = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n\nfn c() {\n    3\n}";
    let chunks = chunk_with(content, 8, 16, 0);

    let mut next_expected = 0u32;
    for chunk in &chunks {
      assert_eq!(chunk.start_line, next_expected);
      next_expected = chunk.end_line + 1;
    }
    assert_eq!(next_expected as usize, content.lines().count());
  }

  #[test]
  fn test_min_chunk_len_filters_trivia() {
    let content = "x\n\nfn real_function_with_some_body() {\n    do_the_work();\n}";
    let chunks = chunk_with(content, 8, 512, 10);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].text.contains("real_function"));
  }

  #[test]
  fn test_estimate_tokens() {
    assert_eq!(estimate_tokens(""), 0);
    assert_eq!(estimate_tokens("abcd"), 1);
    assert_eq!(estimate_tokens("abcde"), 2);
  }
}
