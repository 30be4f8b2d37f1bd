// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle: startup ordering, the watchdog that ties the workers
//! together, and cooperative shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::dispatch::ReadDispatcher;
use crate::error::Result;
use crate::reconcile::reconcile;
use crate::sink::Sink;
use crate::state::StateStore;
use crate::sweep::{run_obsolete_sweep, SweepConfig};
use crate::ticker::run_snapshot_ticker;
use crate::watch;

/// Time left for workers to observe cancellation and finish their current
/// event before stragglers are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub struct Agent {
    config: WatchConfig,
    sink: Arc<dyn Sink>,
}

impl Agent {
    pub fn new(config: WatchConfig, sink: Arc<dyn Sink>) -> Self {
        Self { config, sink }
    }

    /// Bring the agent up and run until `cancel` fires or a subordinate
    /// dies. Startup order: snapshot load, reconciliation, watcher pool
    /// (behind its init barrier), then the periodic workers. Any failure
    /// before the barrier completes cancels everything and returns the
    /// error.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let snapshot_path = self.config.state_file_path.clone();
        StateStore::ensure_snapshot_file(&snapshot_path)?;

        let store = Arc::new(StateStore::new());
        store.load(&snapshot_path)?;
        info!(
            entries = store.len(),
            snapshot = %snapshot_path.display(),
            "State snapshot loaded"
        );

        reconcile(&self.config.read_path, &store, &snapshot_path)?;

        let dispatcher = ReadDispatcher::new(
            store.clone(),
            self.sink.clone(),
            self.config.effective_max_concurrent_reads(),
            self.config.effective_max_read_count(),
            cancel.clone(),
        );

        let mut watcher_tasks = JoinSet::new();
        if let Err(e) = watch::start(
            &self.config,
            store.clone(),
            dispatcher.clone(),
            &snapshot_path,
            cancel.clone(),
            &mut watcher_tasks,
        )
        .await
        {
            cancel.cancel();
            watcher_tasks.shutdown().await;
            return Err(e);
        }

        let mut background_tasks = JoinSet::new();
        background_tasks.spawn(run_snapshot_ticker(
            store.clone(),
            snapshot_path.clone(),
            self.config.effective_sync_interval(),
            cancel.clone(),
        ));
        background_tasks.spawn(run_obsolete_sweep(
            store.clone(),
            dispatcher.clone(),
            SweepConfig {
                interval: self.config.obsolete_sweep_interval(),
                idle_threshold: self.config.obsolete_idle_threshold(),
                max_read_count: self.config.obsolete_max_read_count,
            },
            cancel.clone(),
        ));

        info!("Agent started");

        // Watchdog: a watcher or periodic worker exiting for any reason
        // other than cancellation (including a panic) takes the whole
        // agent down with it.
        select! {
            _ = cancel.cancelled() => {
                info!("Shutdown signal observed");
            }
            _ = watcher_tasks.join_next() => {
                warn!("Index watcher exited, shutting down");
                cancel.cancel();
            }
            _ = background_tasks.join_next() => {
                warn!("Background worker exited, shutting down");
                cancel.cancel();
            }
        }

        // Cooperative teardown: give workers a grace period to notice the
        // token, then abort whatever is left and flush the sink.
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        watcher_tasks.shutdown().await;
        background_tasks.shutdown().await;

        if let Err(e) = store.save(&snapshot_path) {
            error!(error = %e, "Final snapshot save failed");
        }

        self.sink.close().await?;
        info!("Agent stopped");
        Ok(())
    }
}
