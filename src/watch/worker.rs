use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::ReadDispatcher;
use crate::error::{Error, Result};
use crate::scan;
use crate::state::{now_unix, FileState, StateStore};

/// Capacity of the bridge between the notify callback thread and the
/// worker's event loop. When it fills, events are dropped; the next event
/// for the same file (or the next reconciliation) recovers the data.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One watcher worker, bound to a single logical index.
pub(crate) struct IndexWatcher {
    pub index_name: String,
    pub roots: Vec<PathBuf>,
    pub store: Arc<StateStore>,
    pub dispatcher: Arc<ReadDispatcher>,
    pub snapshot_path: PathBuf,
    pub cancel: CancellationToken,
}

impl IndexWatcher {
    /// Set up the notify handle, signal readiness, then loop over events
    /// until cancellation or a fatal watcher error.
    pub(crate) async fn run(self, ready_tx: mpsc::Sender<Result<()>>) {
        let (mut watcher, mut events_rx) = match self.init_watcher() {
            Ok(pair) => pair,
            Err(e) => {
                error!(index = %self.index_name, error = %e, "Watcher setup failed");
                self.cancel.cancel();
                let _ = ready_tx.send(Err(e)).await;
                return;
            }
        };

        let _ = ready_tx.send(Ok(())).await;
        drop(ready_tx);

        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    debug!(index = %self.index_name, "Watcher cancelled");
                    break;
                }
                received = events_rx.recv() => match received {
                    None => {
                        warn!(index = %self.index_name, "Watcher event channel closed");
                        self.cancel.cancel();
                        break;
                    }
                    Some(Err(e)) => {
                        error!(index = %self.index_name, error = %e, "Watch backend error");
                        self.cancel.cancel();
                        break;
                    }
                    Some(Ok(event)) => self.handle_event(&mut watcher, event).await,
                }
            }
        }

        info!(index = %self.index_name, "Index watcher stopped");
    }

    /// Create the notify handle and subscribe every configured root plus all
    /// of its current subdirectories. Directories are watched individually so
    /// the set can grow and shrink with create/remove events.
    fn init_watcher(
        &self,
    ) -> Result<(
        RecommendedWatcher,
        mpsc::Receiver<notify::Result<Event>>,
    )> {
        let (bridge_tx, bridge_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let index_name = self.index_name.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if bridge_tx.try_send(res).is_err() {
                debug!(index = %index_name, "Event buffer full, dropping notification");
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        for root in &self.roots {
            for dir in scan::list_subdirs(root)? {
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|e| {
                        Error::Watch(format!("watch {} failed: {}", dir.display(), e))
                    })?;
            }
        }

        Ok((watcher, bridge_rx))
    }

    async fn handle_event(&self, watcher: &mut RecommendedWatcher, event: Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.on_create(watcher, path);
                }
            }
            // A rename delivers the old path, the new path, or both; the old
            // path is a removal and the new path a creation.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.on_remove(watcher, from);
                    self.on_create(watcher, to);
                } else {
                    for path in &event.paths {
                        self.on_remove(watcher, path);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.on_create(watcher, path);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    self.on_remove(watcher, path);
                }
            }
            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Any => {
                for path in &event.paths {
                    self.on_write(path);
                }
            }
            _ => {}
        }
    }

    /// A write to an unknown path registers it first and forces a snapshot
    /// save; the read itself runs on a background task behind the
    /// dispatcher gates.
    fn on_write(&self, path: &Path) {
        if !self.store.contains(path) {
            let now = now_unix();
            let mut state = FileState::fresh(path.to_path_buf(), self.index_name.clone());
            state.start_read_time = now;
            state.last_read_time = now;

            if let Err(e) = self.store.put(state) {
                error!(path = %path.display(), error = %e, "Failed to register new file");
                return;
            }
            if let Err(e) = self.store.save(&self.snapshot_path) {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Snapshot save after registering new file failed"
                );
            }
        }

        let dispatcher = self.dispatcher.clone();
        let index_name = self.index_name.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.read_from(&path, &index_name).await {
                warn!(path = %path.display(), error = %e, "Dispatched read failed");
            }
        });
    }

    /// New directories join the watch set; new files are registered at
    /// offset 0 and wait for their first write before being read.
    fn on_create(&self, watcher: &mut RecommendedWatcher, path: &Path) {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Stat on created path failed");
                return;
            }
        };

        if metadata.is_dir() {
            match watcher.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => debug!(path = %path.display(), "Watching new directory"),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to watch new directory")
                }
            }
        } else if !self.store.contains(path) {
            let state = FileState::fresh(path.to_path_buf(), self.index_name.clone());
            if let Err(e) = self.store.put(state) {
                error!(path = %path.display(), error = %e, "Failed to register created file");
            }
            // The periodic snapshot picks this entry up.
        }
    }

    /// The path is gone; by the time we look it no longer matters whether it
    /// was a file or a watched directory, so drop both bookkeeping entries.
    fn on_remove(&self, watcher: &mut RecommendedWatcher, path: &Path) {
        if let Err(e) = self.store.delete(path) {
            error!(path = %path.display(), error = %e, "Failed to drop state for removed path");
        }
        let _ = watcher.unwatch(path);
    }
}
