use async_trait::async_trait;
use tracing::debug;

use super::{Record, Sink};
use crate::error::Result;

/// Default sink: serializes each batch as a JSON array to standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn send(&self, batch: Vec<Record>) -> Result<()> {
        let encoded = serde_json::to_string(&batch)?;
        println!("{}", encoded);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Stdout sink closed");
        Ok(())
    }
}
