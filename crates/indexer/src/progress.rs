//! Progress notifications for long-running index passes.
//!
//! Consumers (a server surface, the CLI) receive these over an optional
//! channel. Percent bands are fixed per stage so a progress bar moves
//! monotonically: discovery lands at 5%, the pre-filter at 10%, batches
//! walk 10-95%, completion is always 100%.

/// Token identifying index-run progress streams.
pub const PROGRESS_TOKEN: &str = "indexing";

/// One progress update from an index pass.
#[derive(Debug, Clone)]
pub struct IndexProgress {
  pub token: &'static str,
  /// 0-100
  pub percent: u8,
  pub message: String,
  /// Files processed so far (batch stage only)
  pub processed: usize,
  /// Total files in this pass
  pub total: usize,
}

impl IndexProgress {
  fn new(percent: u8, message: String) -> Self {
    Self {
      token: PROGRESS_TOKEN,
      percent: percent.min(100),
      message,
      processed: 0,
      total: 0,
    }
  }

  /// Discovery finished.
  pub fn discovery(found: usize) -> Self {
    Self::new(5, format!("Discovered {found} files")).with_counts(0, found)
  }

  /// Pre-filter finished.
  pub fn prefilter(changed: usize, total: usize) -> Self {
    Self::new(10, format!("{changed} of {total} files changed")).with_counts(0, total)
  }

  /// A pipeline batch committed. Walks 10-95%.
  pub fn batch(processed: usize, total: usize, rate: f64) -> Self {
    let fraction = if total == 0 {
      1.0
    } else {
      processed as f64 / total as f64
    };
    let percent = (10.0 + fraction * 85.0).round() as u8;
    Self::new(
      percent.min(95),
      format!("Indexed {processed}/{total} files ({rate:.1}/s)"),
    )
    .with_counts(processed, total)
  }

  /// The pass is done, successfully or not.
  pub fn complete(message: impl Into<String>) -> Self {
    Self::new(100, message.into())
  }

  pub fn with_counts(mut self, processed: usize, total: usize) -> Self {
    self.processed = processed;
    self.total = total;
    self
  }

  pub fn is_complete(&self) -> bool {
    self.percent >= 100
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_stage_bands() {
    assert_eq!(IndexProgress::discovery(10).percent, 5);
    assert_eq!(IndexProgress::prefilter(3, 10).percent, 10);
    assert_eq!(IndexProgress::batch(0, 100, 0.0).percent, 10);
    assert_eq!(IndexProgress::batch(100, 100, 5.0).percent, 95);
    assert_eq!(IndexProgress::complete("done").percent, 100);
  }

  #[test]
  fn test_batch_progress_is_monotonic() {
    let mut last = 0u8;
    for processed in 0..=50 {
      let p = IndexProgress::batch(processed, 50, 1.0).percent;
      assert!(p >= last);
      last = p;
    }
    assert_eq!(last, 95);
  }

  #[test]
  fn test_token_is_stable() {
    assert_eq!(IndexProgress::complete("x").token, "indexing");
    assert!(IndexProgress::complete("x").is_complete());
  }
}
