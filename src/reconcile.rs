// SPDX-License-Identifier: Apache-2.0

//! Startup reconciliation between the state registry and the directory tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::scan;
use crate::state::StateStore;

/// Align the registry with on-disk reality and write the first snapshot.
///
/// Files found on disk but unknown to the registry are inserted fresh at
/// offset 0; registry entries whose file no longer exists are dropped.
/// Inserts happen before deletes and existing records win, so a path that
/// moved between indexes in the configuration keeps the index it was first
/// observed under until the file itself disappears. Any scan or save error
/// aborts startup.
pub fn reconcile(
    read_path: &HashMap<String, Vec<PathBuf>>,
    store: &StateStore,
    snapshot_path: &Path,
) -> Result<()> {
    let mut enumerated: Vec<(String, Vec<PathBuf>)> = Vec::with_capacity(read_path.len());

    for (index_name, roots) in read_path {
        let mut files = Vec::new();
        for root in roots {
            files.extend(scan::list_files(root)?);
        }
        enumerated.push((index_name.clone(), files));
    }

    store.align(&enumerated)?;
    store.save(snapshot_path)?;

    info!(
        tracked = store.len(),
        indexes = read_path.len(),
        "Reconciled state registry with disk"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileState;
    use std::fs;
    use tempfile::TempDir;

    fn read_path_for(index: &str, root: &Path) -> HashMap<String, Vec<PathBuf>> {
        let mut map = HashMap::new();
        map.insert(index.to_string(), vec![root.to_path_buf()]);
        map
    }

    #[test]
    fn test_reconcile_inserts_new_files() {
        let dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "line1\n").unwrap();
        let snapshot = state_dir.path().join("core.json");

        let store = StateStore::new();
        reconcile(&read_path_for("idx", dir.path()), &store, &snapshot).unwrap();

        let entry = store.get(&dir.path().join("a.log")).unwrap();
        assert_eq!(entry.offset, 0);
        assert_eq!(entry.index_name, "idx");
        assert!(snapshot.exists());
    }

    #[test]
    fn test_reconcile_drops_vanished_files() {
        let dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let snapshot = state_dir.path().join("core.json");

        let store = StateStore::new();
        store
            .put(FileState::fresh(dir.path().join("gone.log"), "idx".to_string()))
            .unwrap();

        reconcile(&read_path_for("idx", dir.path()), &store, &snapshot).unwrap();

        assert!(store.get(&dir.path().join("gone.log")).is_none());
        let raw = fs::read_to_string(&snapshot).unwrap();
        assert!(!raw.contains("gone.log"));
    }

    #[test]
    fn test_reconcile_preserves_existing_offsets() {
        let dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let log = dir.path().join("a.log");
        fs::write(&log, "line1\nline2\n").unwrap();
        let snapshot = state_dir.path().join("core.json");

        let store = StateStore::new();
        let mut existing = FileState::fresh(log.clone(), "idx".to_string());
        existing.offset = 6;
        store.put(existing).unwrap();

        reconcile(&read_path_for("idx", dir.path()), &store, &snapshot).unwrap();

        assert_eq!(store.get(&log).unwrap().offset, 6);
    }

    #[test]
    fn test_reconcile_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "line1\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.log"), "line2\n").unwrap();
        let state_dir = TempDir::new().unwrap();
        let snapshot = state_dir.path().join("core.json");

        let store = StateStore::new();
        let read_path = read_path_for("idx", dir.path());

        reconcile(&read_path, &store, &snapshot).unwrap();
        let first_keys = {
            let mut k = store.keys();
            k.sort();
            k
        };

        reconcile(&read_path, &store, &snapshot).unwrap();
        let second_keys = {
            let mut k = store.keys();
            k.sort();
            k
        };

        assert_eq!(first_keys, second_keys);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reconcile_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let snapshot = state_dir.path().join("core.json");

        let store = StateStore::new();
        let read_path = read_path_for("idx", &dir.path().join("missing"));

        assert!(reconcile(&read_path, &store, &snapshot).is_err());
    }
}
