// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scan failed under {path}: {message}")]
    Scan { path: PathBuf, message: String },

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("state store mutex poisoned")]
    Poisoned,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("shutting down")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
