// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Loaded from a YAML file by the binary; the library consumes the already
//! deserialized [`WatchConfig`]. Limits that protect the host (per-read
//! record cap, snapshot interval) are enforced through the `effective_*`
//! accessors even when the file asks for more.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Hard ceiling on records consumed per read invocation.
pub const MAX_READ_COUNT_CEILING: usize = 200;

/// Hard ceiling on the snapshot interval, in seconds.
pub const SYNC_INTERVAL_CEILING: u64 = 60;

/// Default capacity of the global read semaphore.
pub const DEFAULT_MAX_CONCURRENT_READS: usize = 100;

/// Default per-file record budget for one stale-sweep cycle.
pub const DEFAULT_OBSOLETE_MAX_READ_COUNT: usize = 5000;

/// Configuration for the watcher/state engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Logical index name -> directory roots watched under that index.
    /// Keys must be distinct and no root may live inside another root.
    pub read_path: HashMap<String, Vec<PathBuf>>,

    /// Path of the JSON state snapshot, relative to the working directory.
    #[serde(default = "default_state_file_path")]
    pub state_file_path: PathBuf,

    /// Records consumed per read invocation, clamped to (0, 200].
    #[serde(default = "default_max_read_count")]
    pub max_read_count: usize,

    /// Seconds between snapshot writes, clamped to (0, 60].
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Capacity of the global read semaphore.
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,

    /// Hours between stale-file sweep cycles.
    #[serde(default = "default_obsolete_interval")]
    pub obsolete_interval: u64,

    /// Days a file must be idle before the sweep drains it.
    #[serde(default = "default_obsolete_date")]
    pub obsolete_date: u64,

    /// Per-file record budget for one sweep cycle.
    #[serde(default = "default_obsolete_max_read_count")]
    pub obsolete_max_read_count: usize,
}

fn default_state_file_path() -> PathBuf {
    PathBuf::from("state/core.json")
}

fn default_max_read_count() -> usize {
    MAX_READ_COUNT_CEILING
}

fn default_sync_interval() -> u64 {
    SYNC_INTERVAL_CEILING
}

fn default_max_concurrent_reads() -> usize {
    DEFAULT_MAX_CONCURRENT_READS
}

fn default_obsolete_interval() -> u64 {
    1
}

fn default_obsolete_date() -> u64 {
    1
}

fn default_obsolete_max_read_count() -> usize {
    DEFAULT_OBSOLETE_MAX_READ_COUNT
}

impl WatchConfig {
    /// Validate structural constraints on the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.read_path.is_empty() {
            return Err(Error::Config(
                "read_path must map at least one index to a directory list".to_string(),
            ));
        }

        for (index, roots) in &self.read_path {
            if index.is_empty() {
                return Err(Error::Config("index names must be non-empty".to_string()));
            }
            if roots.is_empty() {
                return Err(Error::Config(format!(
                    "index '{}' has no directories configured",
                    index
                )));
            }
        }

        // No root may be nested inside another root, across all indexes.
        let all_roots: Vec<(&String, &PathBuf)> = self
            .read_path
            .iter()
            .flat_map(|(index, roots)| roots.iter().map(move |r| (index, r)))
            .collect();

        for (i, (index_a, root_a)) in all_roots.iter().enumerate() {
            for (index_b, root_b) in all_roots.iter().skip(i + 1) {
                if contains_subtree(root_a, root_b) || contains_subtree(root_b, root_a) {
                    return Err(Error::Config(format!(
                        "read_path roots overlap: '{}' ({}) and '{}' ({})",
                        root_a.display(),
                        index_a,
                        root_b.display(),
                        index_b
                    )));
                }
            }
        }

        Ok(())
    }

    /// Per-invocation record cap with the hard ceiling applied.
    pub fn effective_max_read_count(&self) -> usize {
        if self.max_read_count == 0 || self.max_read_count > MAX_READ_COUNT_CEILING {
            MAX_READ_COUNT_CEILING
        } else {
            self.max_read_count
        }
    }

    /// Snapshot interval with the hard ceiling applied.
    pub fn effective_sync_interval(&self) -> Duration {
        let secs = if self.sync_interval == 0 || self.sync_interval > SYNC_INTERVAL_CEILING {
            SYNC_INTERVAL_CEILING
        } else {
            self.sync_interval
        };
        Duration::from_secs(secs)
    }

    pub fn effective_max_concurrent_reads(&self) -> usize {
        if self.max_concurrent_reads == 0 {
            DEFAULT_MAX_CONCURRENT_READS
        } else {
            self.max_concurrent_reads
        }
    }

    pub fn obsolete_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.obsolete_interval.max(1) * 3600)
    }

    pub fn obsolete_idle_threshold(&self) -> Duration {
        Duration::from_secs(self.obsolete_date.max(1) * 86400)
    }
}

/// True when `child` is equal to or nested under `parent`.
fn contains_subtree(parent: &Path, child: &Path) -> bool {
    child.starts_with(parent)
}
