//! File watcher - feeds live filesystem changes into the indexer.
//!
//! notify's sync callback forwards events into a channel with
//! `blocking_send`; an async task consumes them, debounces per path for
//! write stability, and hands settled events to the coordinator. While a
//! full index pass is running the coordinator queues events instead of
//! applying them (later events for the same path overwrite earlier ones);
//! the queue drains when the pass exits.

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::Arc,
  time::{Duration, Instant},
};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::coordinator::Indexer;

// ============================================================================
// Types
// ============================================================================

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
  Add,
  Change,
  Unlink,
}

/// Errors initializing the watcher
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// Handle to a running watcher task.
///
/// Spawning a new watcher for the same indexer should go through `stop` on
/// the old handle first; the task also stops on its own if the notify side
/// goes away.
pub struct WatcherHandle {
  cancel: CancellationToken,
  task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
  pub fn stop(&self) {
    self.cancel.cancel();
  }

  /// Stop and wait for the task to finish.
  pub async fn shutdown(self) {
    self.cancel.cancel();
    let _ = self.task.await;
  }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Spawns the notify watcher plus its async consumer task.
pub struct FileWatcher;

impl FileWatcher {
  /// Watch the indexer's root recursively and deliver settled events to it.
  pub fn spawn(indexer: Arc<Indexer>) -> Result<WatcherHandle, WatcherError> {
    let root = indexer.root().to_path_buf();
    let debounce = Duration::from_millis(indexer.config().watcher.debounce_ms.max(10));

    // The notify callback runs on its own thread; blocking_send bridges it
    // into the async side. A full channel just drops events - the next
    // full pass reconciles anything missed.
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);
    let mut watcher = RecommendedWatcher::new(
      move |result| {
        let _ = event_tx.blocking_send(result);
      },
      NotifyConfig::default(),
    )
    .map_err(WatcherError::Init)?;

    watcher.watch(&root, RecursiveMode::Recursive).map_err(WatcherError::Watch)?;
    info!(root = %root.display(), "File watcher initialized");

    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_loop(indexer, watcher, event_rx, debounce, cancel.clone()));

    Ok(WatcherHandle { cancel, task })
  }
}

async fn run_loop(
  indexer: Arc<Indexer>,
  _watcher: RecommendedWatcher, // held to keep the notify side alive
  mut event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  debounce: Duration,
  cancel: CancellationToken,
) {
  info!("Watcher task started");

  let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
  let mut interval = tokio::time::interval(debounce);

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        info!("Watcher task shutting down (cancelled)");
        break;
      }

      event = event_rx.recv() => {
        match event {
          Some(Ok(event)) => {
            for (path, kind) in map_event(&event) {
              if !indexer.is_watch_candidate(&path, kind) {
                trace!(path = %path.display(), "Ignoring irrelevant watch event");
                continue;
              }
              pending
                .entry(path)
                .and_modify(|change| change.update(kind))
                .or_insert_with(|| PendingChange::new(kind));
            }
          }
          Some(Err(e)) => {
            warn!(error = %e, "Watcher error");
          }
          None => {
            info!("Watcher task shutting down (channel closed)");
            break;
          }
        }
      }

      _ = interval.tick() => {
        flush_settled(&indexer, &mut pending, debounce).await;
      }
    }
  }

  // Apply whatever was still debouncing.
  if !pending.is_empty() {
    debug!(pending = pending.len(), "Flushing remaining events on shutdown");
    for (path, change) in pending.drain() {
      indexer.dispatch_watch_event(path, change.kind).await;
    }
  }

  info!("Watcher task stopped");
}

/// Hand settled (write-stable) changes to the coordinator.
async fn flush_settled(indexer: &Indexer, pending: &mut HashMap<PathBuf, PendingChange>, debounce: Duration) {
  let now = Instant::now();
  let settled: Vec<PathBuf> = pending
    .iter()
    .filter(|(_, change)| now.duration_since(change.last_event) >= debounce)
    .map(|(path, _)| path.clone())
    .collect();

  for path in settled {
    if let Some(change) = pending.remove(&path) {
      indexer.dispatch_watch_event(path, change.kind).await;
    }
  }
}

// ============================================================================
// Event mapping
// ============================================================================

/// A change being debounced for one path.
struct PendingChange {
  kind: WatchKind,
  last_event: Instant,
}

impl PendingChange {
  fn new(kind: WatchKind) -> Self {
    Self {
      kind,
      last_event: Instant::now(),
    }
  }

  fn update(&mut self, kind: WatchKind) {
    self.last_event = Instant::now();
    self.kind = match (self.kind, kind) {
      // Still unseen by the index, so still an add.
      (WatchKind::Add, WatchKind::Change) => WatchKind::Add,
      // Deleted and recreated within the window.
      (WatchKind::Unlink, WatchKind::Add) => WatchKind::Change,
      (_, next) => next,
    };
  }
}

/// Translate a notify event into (path, kind) pairs. Renames decompose
/// into an unlink of the old path and an add of the new one.
fn map_event(event: &Event) -> Vec<(PathBuf, WatchKind)> {
  use notify::event::{ModifyKind, RenameMode};

  let all = |kind: WatchKind| -> Vec<(PathBuf, WatchKind)> {
    event.paths.iter().map(|p| (p.clone(), kind)).collect()
  };

  match &event.kind {
    EventKind::Create(_) => all(WatchKind::Add),
    EventKind::Remove(_) => all(WatchKind::Unlink),
    EventKind::Modify(ModifyKind::Name(mode)) => match mode {
      RenameMode::Both if event.paths.len() >= 2 => vec![
        (event.paths[0].clone(), WatchKind::Unlink),
        (event.paths[1].clone(), WatchKind::Add),
      ],
      RenameMode::From => all(WatchKind::Unlink),
      RenameMode::To => all(WatchKind::Add),
      _ => all(WatchKind::Change),
    },
    EventKind::Modify(_) => all(WatchKind::Change),
    EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};

  #[test]
  fn test_pending_change_coalescing() {
    // Add + Change = Add
    let mut change = PendingChange::new(WatchKind::Add);
    change.update(WatchKind::Change);
    assert_eq!(change.kind, WatchKind::Add);

    // Unlink + Add = Change
    let mut change = PendingChange::new(WatchKind::Unlink);
    change.update(WatchKind::Add);
    assert_eq!(change.kind, WatchKind::Change);

    // Add + Unlink = Unlink
    let mut change = PendingChange::new(WatchKind::Add);
    change.update(WatchKind::Unlink);
    assert_eq!(change.kind, WatchKind::Unlink);

    // Change + Unlink = Unlink
    let mut change = PendingChange::new(WatchKind::Change);
    change.update(WatchKind::Unlink);
    assert_eq!(change.kind, WatchKind::Unlink);
  }

  #[test]
  fn test_map_create_and_remove() {
    let create = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/x/a.rs"));
    assert_eq!(map_event(&create), vec![(PathBuf::from("/x/a.rs"), WatchKind::Add)]);

    let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/x/a.rs"));
    assert_eq!(map_event(&remove), vec![(PathBuf::from("/x/a.rs"), WatchKind::Unlink)]);
  }

  #[test]
  fn test_map_rename_decomposes() {
    let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
      .add_path(PathBuf::from("/x/old.rs"))
      .add_path(PathBuf::from("/x/new.rs"));

    assert_eq!(
      map_event(&rename),
      vec![
        (PathBuf::from("/x/old.rs"), WatchKind::Unlink),
        (PathBuf::from("/x/new.rs"), WatchKind::Add),
      ]
    );
  }

  #[test]
  fn test_access_events_are_ignored() {
    let access = Event::new(EventKind::Access(notify::event::AccessKind::Read)).add_path(PathBuf::from("/x/a.rs"));
    assert!(map_event(&access).is_empty());
  }
}
