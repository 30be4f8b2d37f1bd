// SPDX-License-Identifier: Apache-2.0

//! Periodic snapshot of the state registry to disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::state::StateStore;

/// Re-serialize the registry every `interval` until cancellation. Save
/// failures are logged; only cancellation stops the ticker.
pub(crate) async fn run_snapshot_ticker(
    store: Arc<StateStore>,
    snapshot_path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval is immediate; reconciliation has
    // just written a snapshot, so skip it.
    ticker.tick().await;

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match store.save(&snapshot_path) {
                    Ok(()) => debug!("Periodic snapshot saved"),
                    Err(e) => error!(error = %e, "Periodic snapshot save failed"),
                }
            }
        }
    }

    info!("Snapshot ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileState;
    use std::path::Path;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ticker_saves_periodically() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("core.json");

        let store = Arc::new(StateStore::new());
        store
            .put(FileState::fresh(
                Path::new("/tmp/l/a.log").to_path_buf(),
                "idx".to_string(),
            ))
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_snapshot_ticker(
            store.clone(),
            snapshot.clone(),
            Duration::from_millis(50),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(snapshot.exists());
        let raw = std::fs::read_to_string(&snapshot).unwrap();
        assert!(raw.contains("a.log"));
    }

    #[tokio::test]
    async fn test_ticker_survives_save_failure() {
        // Point the snapshot at a directory so save always fails.
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().to_path_buf();

        let store = Arc::new(StateStore::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_snapshot_ticker(
            store.clone(),
            snapshot,
            Duration::from_millis(20),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished(), "ticker must keep running after failures");

        cancel.cancel();
        handle.await.unwrap();
    }
}
