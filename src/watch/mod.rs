// SPDX-License-Identifier: Apache-2.0

//! Watcher pool: one filesystem-event worker per logical index.
//!
//! Workers own their notify handles exclusively; the only state they share
//! is the registry behind the state store. Startup blocks on an
//! initialization barrier so a single failing worker aborts the whole agent
//! before it starts consuming events.

mod worker;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::WatchConfig;
use crate::dispatch::ReadDispatcher;
use crate::error::{Error, Result};
use crate::state::StateStore;

use worker::IndexWatcher;

/// Spawn one watcher worker per index into `task_set` and wait for every
/// worker to signal readiness. The first setup failure cancels everything
/// and aborts startup.
pub(crate) async fn start(
    config: &WatchConfig,
    store: Arc<StateStore>,
    dispatcher: Arc<ReadDispatcher>,
    snapshot_path: &Path,
    cancel: CancellationToken,
    task_set: &mut JoinSet<()>,
) -> Result<()> {
    let worker_count = config.read_path.len();
    let (ready_tx, mut ready_rx) = mpsc::channel::<Result<()>>(worker_count);

    for (index_name, roots) in &config.read_path {
        let watcher = IndexWatcher {
            index_name: index_name.clone(),
            roots: roots.clone(),
            store: store.clone(),
            dispatcher: dispatcher.clone(),
            snapshot_path: snapshot_path.to_path_buf(),
            cancel: cancel.clone(),
        };
        let ready_tx = ready_tx.clone();
        task_set.spawn(watcher.run(ready_tx));
    }
    drop(ready_tx);

    // Initialization barrier: one result per worker, first error wins.
    for _ in 0..worker_count {
        match ready_rx.recv().await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                cancel.cancel();
                return Err(e);
            }
            None => {
                cancel.cancel();
                return Err(Error::Watch(
                    "watcher worker exited before signaling readiness".to_string(),
                ));
            }
        }
    }

    info!(workers = worker_count, "All index watchers initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Record, Sink};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CaptureSink {
        records: Mutex<Vec<Record>>,
    }

    #[async_trait]
    impl Sink for CaptureSink {
        async fn send(&self, batch: Vec<Record>) -> crate::error::Result<()> {
            self.records.lock().unwrap().extend(batch);
            Ok(())
        }

        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<StateStore>,
        sink: Arc<CaptureSink>,
        cancel: CancellationToken,
        tasks: JoinSet<()>,
        _state_dir: TempDir,
    }

    async fn start_pool(index: &str, root: &Path) -> Result<Fixture> {
        let state_dir = TempDir::new().unwrap();
        let snapshot_path = state_dir.path().join("core.json");

        let mut read_path = HashMap::new();
        read_path.insert(index.to_string(), vec![root.to_path_buf()]);

        let config = WatchConfig {
            read_path,
            state_file_path: snapshot_path.clone(),
            max_read_count: 200,
            sync_interval: 60,
            max_concurrent_reads: 100,
            obsolete_interval: 1,
            obsolete_date: 1,
            obsolete_max_read_count: 5000,
        };

        let store = Arc::new(StateStore::new());
        let sink = Arc::new(CaptureSink::default());
        let cancel = CancellationToken::new();
        let dispatcher = ReadDispatcher::new(
            store.clone(),
            sink.clone(),
            100,
            200,
            cancel.clone(),
        );

        let mut tasks = JoinSet::new();
        start(
            &config,
            store.clone(),
            dispatcher,
            &snapshot_path,
            cancel.clone(),
            &mut tasks,
        )
        .await?;

        Ok(Fixture {
            store,
            sink,
            cancel,
            tasks,
            _state_dir: state_dir,
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_fails_on_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let result = start_pool("idx", &missing).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_event_registers_and_ships() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("a.log");
        fs::write(&log, "").unwrap();

        let mut fixture = start_pool("idx", dir.path()).await.unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "hello").unwrap();
        file.flush().unwrap();
        drop(file);

        settle().await;

        let records = fixture.sink.records.lock().unwrap().clone();
        assert!(!records.is_empty(), "write event should reach the sink");
        assert_eq!(records[0].line, "hello");
        assert_eq!(records[0].index_name, "idx");

        let state = fixture.store.get(&log).unwrap();
        assert_eq!(state.offset, 6);

        fixture.cancel.cancel();
        fixture.tasks.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_subdirectory_joins_watch_set() {
        let dir = TempDir::new().unwrap();
        let mut fixture = start_pool("idx", dir.path()).await.unwrap();

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        settle().await;

        let log = sub.join("b.log");
        fs::write(&log, "x\n").unwrap();
        settle().await;

        let records = fixture.sink.records.lock().unwrap().clone();
        assert!(
            records.iter().any(|r| r.line == "x"),
            "file in created subdirectory should be tailed"
        );
        assert!(fixture.store.contains(&log));

        fixture.cancel.cancel();
        fixture.tasks.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_event_drops_state() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("a.log");
        fs::write(&log, "line\n").unwrap();

        let mut fixture = start_pool("idx", dir.path()).await.unwrap();

        // Register the file through a write first.
        let mut file = fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "more").unwrap();
        drop(file);
        settle().await;
        assert!(fixture.store.contains(&log));

        fs::remove_file(&log).unwrap();
        settle().await;
        assert!(!fixture.store.contains(&log));

        fixture.cancel.cancel();
        fixture.tasks.shutdown().await;
    }
}
