//! File discovery - walks the search root and applies the filters.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{exclude::ExcludeSet, relative_key};

/// Walk the search root and collect indexable files.
///
/// Directories whose base name is in the blocklist are never entered.
/// A file is included iff its extension is in the allowed set and its
/// root-relative path is not excluded. Symlinks are not followed, so the
/// walk is finite even in the presence of link cycles.
///
/// Unreadable subtrees are logged and skipped; only I/O on the root itself
/// is fatal.
pub fn discover_files(
  root: &Path,
  extensions: &HashSet<String>,
  excludes: &ExcludeSet,
  blocklist: &HashSet<String>,
) -> std::io::Result<Vec<PathBuf>> {
  // Surface root problems as a real error instead of an empty walk.
  std::fs::metadata(root)?;

  let mut files = Vec::new();

  let walker = WalkDir::new(root).follow_links(false).into_iter();
  let walker = walker.filter_entry(|entry| {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
      return true;
    }
    let name = entry.file_name().to_string_lossy();
    !blocklist.contains(name.as_ref())
  });

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "Skipping unreadable entry during discovery");
        continue;
      }
    };

    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let extension = match path.extension().and_then(|e| e.to_str()) {
      Some(ext) => ext.to_lowercase(),
      None => continue,
    };
    if !extensions.contains(&extension) {
      continue;
    }

    if excludes.is_excluded(Path::new(&relative_key(root, path))) {
      continue;
    }

    files.push(path.to_path_buf());
  }

  files.sort();
  debug!(root = %root.display(), found = files.len(), "Discovery complete");
  Ok(files)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exclude::{self, ExcludeSet};
  use pretty_assertions::assert_eq;

  fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }

  fn extensions(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_discovery_filters_extensions_and_exclusions() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(root, "a.js", "const x = 1;");
    write(root, "node_modules/b.js", "module.exports = {};");
    write(root, ".smart-coding-cache/c.js", "cached");

    let patterns: Vec<String> = vec!["**/node_modules/**".into(), "**/.smart-coding-cache/**".into()];
    let excludes = ExcludeSet::compile(&patterns).unwrap();
    let blocklist = exclude::dir_blocklist(&patterns, ".lodestone");

    let found = discover_files(root, &extensions(&["js"]), &excludes, &blocklist).unwrap();
    assert_eq!(found, vec![root.join("a.js")]);
  }

  #[test]
  fn test_discovery_skips_wrong_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(root, "keep.rs", "fn main() {}");
    write(root, "skip.md", "# readme");
    write(root, "noext", "plain");

    let excludes = ExcludeSet::compile(&[]).unwrap();
    let found = discover_files(root, &extensions(&["rs"]), &excludes, &HashSet::new()).unwrap();
    assert_eq!(found, vec![root.join("keep.rs")]);
  }

  #[test]
  fn test_blocked_directories_are_not_entered() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(root, "src/lib.rs", "pub fn f() {}");
    write(root, "target/debug/build.rs", "generated");

    let excludes = ExcludeSet::compile(&[]).unwrap();
    let mut blocklist = HashSet::new();
    blocklist.insert("target".to_string());

    let found = discover_files(root, &extensions(&["rs"]), &excludes, &blocklist).unwrap();
    assert_eq!(found, vec![root.join("src/lib.rs")]);
  }

  #[test]
  fn test_missing_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let excludes = ExcludeSet::compile(&[]).unwrap();
    let result = discover_files(&missing, &extensions(&["rs"]), &excludes, &HashSet::new());
    assert!(result.is_err());
  }

  #[test]
  fn test_extension_matching_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(root, "Upper.RS", "fn main() {}");

    let excludes = ExcludeSet::compile(&[]).unwrap();
    let found = discover_files(root, &extensions(&["rs"]), &excludes, &HashSet::new()).unwrap();
    assert_eq!(found.len(), 1);
  }
}
