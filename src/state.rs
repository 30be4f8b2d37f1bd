// SPDX-License-Identifier: Apache-2.0

//! Per-file read state and the registry that owns it.
//!
//! The registry is the source of truth for read offsets. It is guarded by a
//! single mutex; everything that mutates or consistently reads it goes
//! through that mutex. Snapshot writes are atomic, using a
//! write-to-temp-then-rename strategy.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Read state of one watched regular file.
///
/// Field names in the snapshot are PascalCase; timestamps are integer
/// seconds since the Unix epoch, with 0 meaning "never".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileState {
    pub path: PathBuf,
    pub offset: u64,
    pub start_read_time: i64,
    pub last_read_time: i64,
    pub index_name: String,
}

impl FileState {
    /// A fresh never-read entry for `path` routed to `index_name`.
    pub fn fresh(path: PathBuf, index_name: String) -> Self {
        Self {
            path,
            offset: 0,
            start_read_time: 0,
            last_read_time: 0,
            index_name,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Mutex-guarded `path -> FileState` registry with JSON snapshot support.
#[derive(Debug, Default)]
pub struct StateStore {
    registry: Mutex<HashMap<PathBuf, FileState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the snapshot file if it does not exist yet.
    pub fn ensure_snapshot_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(())
    }

    /// Replace the registry with the decoded contents of the snapshot file.
    /// An empty file is equivalent to an empty registry.
    pub fn load(&self, snapshot_path: &Path) -> Result<()> {
        let file = File::open(snapshot_path)?;
        if file.metadata()?.len() == 0 {
            let mut registry = self.lock()?;
            registry.clear();
            return Ok(());
        }

        let reader = BufReader::new(file);
        let decoded: HashMap<PathBuf, FileState> = serde_json::from_reader(reader)?;

        let mut registry = self.lock()?;
        *registry = decoded;
        Ok(())
    }

    /// Serialize the registry to the snapshot file. The encoding happens
    /// under the store mutex; the bytes land in a temp file that is renamed
    /// over the snapshot once fully flushed.
    pub fn save(&self, snapshot_path: &Path) -> Result<()> {
        let registry = self.lock()?;

        if let Some(parent) = snapshot_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = snapshot_path.with_extension(format!("tmp.{}", std::process::id()));
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &*registry)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp_path, snapshot_path)?;

        debug!(entries = registry.len(), "State snapshot written");
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<FileState> {
        self.registry
            .lock()
            .ok()
            .and_then(|registry| registry.get(path).cloned())
    }

    pub fn put(&self, state: FileState) -> Result<()> {
        let mut registry = self.lock()?;
        registry.insert(state.path.clone(), state);
        Ok(())
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        let mut registry = self.lock()?;
        registry.remove(path);
        Ok(())
    }

    /// Mutate the entry for `path` in one critical section, inserting
    /// `default` first when the path is unknown.
    pub fn update<F>(&self, path: &Path, default: FileState, mutator: F) -> Result<FileState>
    where
        F: FnOnce(&mut FileState),
    {
        let mut registry = self.lock()?;
        let entry = registry.entry(path.to_path_buf()).or_insert(default);
        mutator(entry);
        Ok(entry.clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.contains_key(path))
            .unwrap_or(false)
    }

    /// Copied key list, safe to iterate without holding the mutex.
    pub fn keys(&self) -> Vec<PathBuf> {
        self.registry
            .lock()
            .map(|registry| registry.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconcile the registry against the file paths currently on disk:
    /// unknown paths are inserted fresh, vanished paths are dropped.
    /// Existing entries win, so an index reassignment in configuration does
    /// not flip the index of a path that is already tracked.
    pub fn align(&self, enumerated: &[(String, Vec<PathBuf>)]) -> Result<()> {
        let mut registry = self.lock()?;

        for (index_name, paths) in enumerated {
            for path in paths {
                if !registry.contains_key(path) {
                    registry.insert(
                        path.clone(),
                        FileState::fresh(path.clone(), index_name.clone()),
                    );
                }
            }
        }

        let on_disk: std::collections::HashSet<&PathBuf> = enumerated
            .iter()
            .flat_map(|(_, paths)| paths.iter())
            .collect();
        registry.retain(|path, _| on_disk.contains(path));

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, FileState>>> {
        self.registry.lock().map_err(|_| Error::Poisoned)
    }
}
