// SPDX-License-Identifier: Apache-2.0

//! Recursive directory enumeration for watch setup and reconciliation.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Every directory reachable from `root`, including `root` itself.
/// Symlinks are followed; any entry error aborts the walk.
pub fn list_subdirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| Error::Scan {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            dirs.push(entry.path().to_path_buf());
        }
    }

    Ok(dirs)
}

/// Every regular file reachable from `root`.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| Error::Scan {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files)
}
