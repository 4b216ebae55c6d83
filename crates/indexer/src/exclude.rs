//! Exclusion matching for discovery and the watcher.
//!
//! Glob patterns are compiled once into anchored regular expressions:
//!
//! - `**/` matches zero or more path segments, including none
//! - `**` (not followed by `/`) matches anything, across segments
//! - `*` matches within a segment
//! - `?` matches a single character within a segment
//! - everything else is a literal
//!
//! A pattern without `/` is a *base-name* matcher and is tested against the
//! final path segment; any other pattern is tested against the whole
//! forward-slash-normalized path. Matching is a plain OR over the compiled
//! set, so results depend only on the pattern list and the path.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

/// One compiled exclusion pattern.
#[derive(Debug)]
struct CompiledPattern {
  regex: Regex,
  /// Tested against the final path segment instead of the whole path
  base_name: bool,
}

/// A compiled set of exclusion patterns.
#[derive(Debug, Default)]
pub struct ExcludeSet {
  matchers: Vec<CompiledPattern>,
}

impl ExcludeSet {
  /// Compile a pattern list. Duplicates are dropped before compiling.
  pub fn compile(patterns: &[String]) -> Result<Self, ExcludeError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut matchers = Vec::new();

    for pattern in patterns {
      if pattern.is_empty() || !seen.insert(pattern.as_str()) {
        continue;
      }

      let source = translate(pattern);
      let regex = Regex::new(&source).map_err(|e| ExcludeError {
        pattern: pattern.clone(),
        reason: e.to_string(),
      })?;

      matchers.push(CompiledPattern {
        regex,
        base_name: !pattern.contains('/'),
      });
    }

    Ok(Self { matchers })
  }

  /// Test a path against the set. An empty set excludes nothing.
  pub fn is_excluded(&self, path: &Path) -> bool {
    if self.matchers.is_empty() {
      return false;
    }

    let normalized = path.to_string_lossy().replace('\\', "/");
    let base_name = normalized.rsplit('/').next().unwrap_or(normalized.as_str());

    self.matchers.iter().any(|m| {
      if m.base_name {
        m.regex.is_match(base_name)
      } else {
        m.regex.is_match(&normalized)
      }
    })
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.matchers.len()
  }
}

/// Translate one glob pattern into an anchored regex source.
fn translate(pattern: &str) -> String {
  let chars: Vec<char> = pattern.chars().collect();
  let mut out = String::with_capacity(pattern.len() * 2 + 2);
  out.push('^');

  let mut i = 0;
  while i < chars.len() {
    if chars[i] == '*' && chars.get(i + 1) == Some(&'*') {
      if chars.get(i + 2) == Some(&'/') {
        out.push_str("(?:.*/)?");
        i += 3;
      } else {
        out.push_str(".*");
        i += 2;
      }
    } else if chars[i] == '*' {
      out.push_str("[^/]*");
      i += 1;
    } else if chars[i] == '?' {
      out.push_str("[^/]");
      i += 1;
    } else {
      let mut buf = [0u8; 4];
      out.push_str(&regex::escape(chars[i].encode_utf8(&mut buf)));
      i += 1;
    }
  }

  out.push('$');
  out
}

/// Derive the directory-name blocklist from the pattern list.
///
/// Patterns shaped `**/NAME/**` or `**/NAME`, where NAME is a plain segment
/// with no glob metacharacters, let the walker skip the whole directory
/// instead of testing every file underneath it. The cache directory is
/// always blocked.
pub fn dir_blocklist(patterns: &[String], cache_dir: &str) -> HashSet<String> {
  let mut blocked = HashSet::new();
  blocked.insert(cache_dir.to_string());

  for pattern in patterns {
    let Some(rest) = pattern.strip_prefix("**/") else {
      continue;
    };
    let name = rest.strip_suffix("/**").unwrap_or(rest);

    if !name.is_empty() && !name.contains('/') && !name.contains(['*', '?', '[']) {
      blocked.insert(name.to_string());
    }
  }

  blocked
}

/// An exclude pattern that failed to compile
#[derive(Debug, thiserror::Error)]
#[error("pattern {pattern:?}: {reason}")]
pub struct ExcludeError {
  pub pattern: String,
  pub reason: String,
}
