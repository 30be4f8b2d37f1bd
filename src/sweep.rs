// SPDX-License-Identifier: Apache-2.0

//! Stale-file sweep.
//!
//! Write events drive the normal read path; a file whose writer has gone
//! quiet can still hold unread bytes (for example the tail the last capped
//! read left behind). The sweep periodically walks the registry and drains
//! such files through the regular dispatcher gates.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::ReadDispatcher;
use crate::state::{now_unix, StateStore};

pub(crate) struct SweepConfig {
    /// Time between sweep cycles.
    pub interval: Duration,
    /// How long a file must be idle before it is drained.
    pub idle_threshold: Duration,
    /// Per-file record budget for one cycle.
    pub max_read_count: usize,
}

pub(crate) async fn run_obsolete_sweep(
    store: Arc<StateStore>,
    dispatcher: Arc<ReadDispatcher>,
    config: SweepConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep_once(&store, &dispatcher, &config, &cancel).await;
            }
        }
    }

    info!("Stale-file sweep stopped");
}

async fn sweep_once(
    store: &Arc<StateStore>,
    dispatcher: &Arc<ReadDispatcher>,
    config: &SweepConfig,
    cancel: &CancellationToken,
) {
    let now = now_unix();
    let idle_secs = config.idle_threshold.as_secs() as i64;
    let mut drained_files = 0usize;
    let mut drained_records = 0usize;

    for path in store.keys() {
        if cancel.is_cancelled() {
            return;
        }

        let Some(state) = store.get(&path) else {
            continue;
        };

        // last_read_time of 0 means never read; that counts as idle.
        if state.last_read_time != 0 && now - state.last_read_time < idle_secs {
            continue;
        }

        // Only bother when unread bytes exist on disk.
        let size = match fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(_) => continue, // vanished; events/reconciliation handle it
        };
        if size <= state.offset {
            continue;
        }

        match dispatcher
            .drain(&path, &state.index_name, config.max_read_count)
            .await
        {
            Ok(0) => {}
            Ok(n) => {
                drained_files += 1;
                drained_records += n;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Stale-file drain failed");
            }
        }
    }

    if drained_files > 0 {
        info!(
            files = drained_files,
            records = drained_records,
            "Stale-file sweep drained idle files"
        );
    }
}
