// SPDX-License-Identifier: Apache-2.0

//! Bounded, at-most-once-per-file concurrent reads.
//!
//! Two gates guard every read, in order: a global semaphore capping the
//! number of in-flight reads, then a per-path insert-if-absent set so a
//! single file never has two active readers. The offset for a batch is
//! committed only after the sink has accepted it.

mod reader;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::sink::{Record, Sink};
use crate::state::{now_unix, FileState, StateStore};

pub struct ReadDispatcher {
    store: Arc<StateStore>,
    sink: Arc<dyn Sink>,
    semaphore: Semaphore,
    in_flight: DashSet<PathBuf>,
    max_read_count: usize,
    cancel: CancellationToken,
}

impl ReadDispatcher {
    pub fn new(
        store: Arc<StateStore>,
        sink: Arc<dyn Sink>,
        max_concurrent_reads: usize,
        max_read_count: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sink,
            semaphore: Semaphore::new(max_concurrent_reads),
            in_flight: DashSet::new(),
            max_read_count,
            cancel,
        })
    }

    /// Read newly appended records from `path` and ship them to the sink.
    ///
    /// Returns the number of records shipped. Returns 0 without touching the
    /// file when another reader already owns the path; the owning reader (or
    /// the next write event) picks the bytes up.
    pub async fn read_from(&self, path: &Path, index_name: &str) -> Result<usize> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;

        let _gate = match InFlightGuard::try_acquire(&self.in_flight, path) {
            Some(gate) => gate,
            None => {
                debug!(path = %path.display(), "Read already in flight, skipping");
                return Ok(0);
            }
        };

        self.read_pass(path, index_name, self.max_read_count).await
    }

    /// Drain a file to EOF for the stale sweep: same gates, repeated capped
    /// passes, bounded by `max_total` records.
    pub async fn drain(&self, path: &Path, index_name: &str, max_total: usize) -> Result<usize> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;

        let _gate = match InFlightGuard::try_acquire(&self.in_flight, path) {
            Some(gate) => gate,
            None => return Ok(0),
        };

        let mut total = 0;
        while total < max_total {
            if self.cancel.is_cancelled() {
                break;
            }
            let cap = self.max_read_count.min(max_total - total);
            let shipped = self.read_pass(path, index_name, cap).await?;
            if shipped == 0 {
                break;
            }
            total += shipped;
        }

        Ok(total)
    }

    /// One capped read pass. Both gates must already be held.
    async fn read_pass(&self, path: &Path, index_name: &str, cap: usize) -> Result<usize> {
        let offset = self.store.get(path).map(|s| s.offset).unwrap_or(0);

        let read_path = path.to_path_buf();
        let joined =
            tokio::task::spawn_blocking(move || reader::read_from_offset(&read_path, offset, cap))
                .await;

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "File vanished before read");
                return Ok(0);
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Read failed, offset unchanged");
                return Ok(0);
            }
            Err(join_err) => {
                // Panic in the blocking read; take the agent down.
                error!(path = %path.display(), error = %join_err, "Reader task panicked");
                self.cancel.cancel();
                return Err(Error::Cancelled);
            }
        };

        if outcome.truncated {
            warn!(
                path = %path.display(),
                offset,
                restart_offset = outcome.start_offset,
                "File shrank below recorded offset, restarting from the beginning"
            );
        }

        if outcome.lines.is_empty() {
            if outcome.truncated {
                // No complete record yet; still pull the offset back so the
                // next pass starts from the new beginning.
                self.store.update(
                    path,
                    FileState::fresh(path.to_path_buf(), index_name.to_string()),
                    |s| s.offset = outcome.start_offset,
                )?;
            }
            return Ok(0);
        }

        let batch: Vec<Record> = outcome
            .lines
            .iter()
            .map(|line| Record {
                index_name: index_name.to_string(),
                path: path.display().to_string(),
                line: line.clone(),
            })
            .collect();
        let count = batch.len();

        if let Err(e) = self.sink.send(batch).await {
            error!(
                path = %path.display(),
                count,
                error = %e,
                "Sink rejected batch, offset not advanced"
            );
            return Err(e);
        }

        let now = now_unix();
        let new_offset = outcome.start_offset + outcome.bytes_read;
        self.store.update(
            path,
            FileState::fresh(path.to_path_buf(), index_name.to_string()),
            |s| {
                s.offset = new_offset;
                s.last_read_time = now;
                if s.start_read_time == 0 {
                    s.start_read_time = now;
                }
            },
        )?;

        Ok(count)
    }
}

/// Removes the path from the in-flight set on every exit path.
struct InFlightGuard<'a> {
    set: &'a DashSet<PathBuf>,
    path: PathBuf,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(set: &'a DashSet<PathBuf>, path: &Path) -> Option<Self> {
        if set.insert(path.to_path_buf()) {
            Some(Self {
                set,
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.path);
    }
}
