// SPDX-License-Identifier: Apache-2.0

//! Downstream sink contract and the built-in sink implementations.
//!
//! The agent core hands batches of [`Record`]s to a [`Sink`]; everything past
//! that boundary (transport, search backend, retries) is the sink's problem.
//! [`StdoutSink`] prints batches as JSON and is the default wiring;
//! [`BatchSink`] re-batches records by count and interval in front of any
//! inner sink.

mod batch;
mod stdout;

pub use batch::{BatchSink, BatchSinkConfig};
pub use stdout::StdoutSink;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One newline-delimited record read from a watched file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Logical routing tag of the directory set the file belongs to.
    pub index_name: String,
    /// Absolute path of the source file.
    pub path: String,
    /// Record content without the trailing newline.
    pub line: String,
}

/// Downstream consumer of record batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one batch. An error means the batch was not accepted and the
    /// caller must not advance past it.
    async fn send(&self, batch: Vec<Record>) -> Result<()>;

    /// Flush pending data and release resources.
    async fn close(&self) -> Result<()>;
}
