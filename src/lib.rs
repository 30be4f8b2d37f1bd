// SPDX-License-Identifier: Apache-2.0

//! Log-tailing agent core.
//!
//! Watches configured directory trees for appended log records, relays them
//! to a downstream sink, and durably tracks per-file read offsets across
//! restarts. The pieces:
//!
//! - [`state`]: the mutex-guarded `path -> FileState` registry and its JSON
//!   snapshot.
//! - [`reconcile`]: startup alignment of the registry with the directory
//!   tree.
//! - [`dispatch`]: bounded concurrent reads, one active reader per file,
//!   offsets committed only after the sink accepts a batch.
//! - [`watch`]: one filesystem-event worker per logical index.
//! - [`agent`]: lifecycle wiring, snapshot ticker, stale sweep, shutdown.
//! - [`sink`]: the downstream contract plus stdout and batching sinks.

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod reconcile;
pub mod scan;
pub mod sink;
pub mod state;

mod sweep;
mod ticker;
mod watch;
