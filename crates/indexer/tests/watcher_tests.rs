//! Live watcher tests over a real notify backend.
//!
//! Sleeps are generous relative to the 50ms test debounce; the watcher only
//! needs to settle within them, not race them.

mod common;

use std::{sync::Arc, time::Duration};

use common::{FakeFactory, TestProject, hash_of};
use indexer::{FileWatcher, Indexer};

async fn settle() {
  tokio::time::sleep(Duration::from_millis(1500)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_tracks_create_modify_delete() {
  let project = TestProject::new();
  let indexer = Arc::new(Indexer::new(project.config(), FakeFactory::new()).unwrap());
  let handle = FileWatcher::spawn(indexer.clone()).unwrap();

  // Create
  project.write("watched.rs", "fn first() {}\n");
  settle().await;
  {
    let store = indexer.store().lock().await;
    assert!(store.file_hash("watched.rs").is_some(), "create not picked up");
  }

  // Modify
  project.write("watched.rs", "fn second() { more(); }\n");
  settle().await;
  {
    let store = indexer.store().lock().await;
    assert_eq!(
      store.file_hash("watched.rs"),
      Some(hash_of("fn second() { more(); }\n").as_str()),
      "modify not picked up"
    );
  }

  // Delete
  project.remove("watched.rs");
  settle().await;
  {
    let store = indexer.store().lock().await;
    assert!(store.file_hash("watched.rs").is_none(), "delete not picked up");
    assert!(store.chunks().iter().all(|c| c.file != "watched.rs"));
  }

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_ignores_cache_and_foreign_files() {
  let project = TestProject::new();
  let indexer = Arc::new(Indexer::new(project.config(), FakeFactory::new()).unwrap());
  let handle = FileWatcher::spawn(indexer.clone()).unwrap();

  project.write("notes.md", "# not an indexable extension\n");
  project.write(".lodestone/scratch.rs", "fn inside_cache_dir() {}\n");
  settle().await;

  let store = indexer.store().lock().await;
  assert_eq!(store.chunk_count(), 0);
  drop(store);

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_stop_is_clean() {
  let project = TestProject::new();
  let indexer = Arc::new(Indexer::new(project.config(), FakeFactory::new()).unwrap());

  let handle = FileWatcher::spawn(indexer.clone()).unwrap();
  handle.shutdown().await;

  // Changes after shutdown are not applied.
  project.write("late.rs", "fn late() {}\n");
  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(indexer.store().lock().await.chunk_count(), 0);
}
