//! Count/interval batching in front of an inner sink.
//!
//! Records accepted by [`BatchSink::send`] are buffered by a flusher task
//! and delivered to the inner sink once the buffer reaches `max_size` or
//! `flush_interval` elapses with data pending, whichever comes first.
//! `close` flushes the remainder and closes the inner sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flume::{Receiver, Sender};
use tokio::select;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Record, Sink};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BatchSinkConfig {
    /// Records per delivered batch.
    pub max_size: usize,
    /// Longest a non-empty buffer waits before a flush.
    pub flush_interval: Duration,
    /// Capacity of the queue between producers and the flusher.
    pub queue_capacity: usize,
}

impl Default for BatchSinkConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 1_000,
        }
    }
}

enum Command {
    Records(Vec<Record>),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Batching decorator over any [`Sink`].
pub struct BatchSink {
    tx: Sender<Command>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSink {
    pub fn new(inner: Arc<dyn Sink>, config: BatchSinkConfig) -> Self {
        let (tx, rx) = flume::bounded::<Command>(config.queue_capacity);
        let flusher = tokio::spawn(run_flusher(inner, rx, config));

        Self {
            tx,
            flusher: Mutex::new(Some(flusher)),
        }
    }
}

#[async_trait]
impl Sink for BatchSink {
    async fn send(&self, batch: Vec<Record>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tx
            .send_async(Command::Records(batch))
            .await
            .map_err(|_| Error::Sink("batch queue disconnected".to_string()))
    }

    async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send_async(Command::Shutdown(ack_tx))
            .await
            .map_err(|_| Error::Sink("batch queue disconnected".to_string()))?;

        let result = ack_rx
            .await
            .map_err(|_| Error::Sink("batch flusher exited before acking close".to_string()))?;

        if let Some(handle) = self.flusher.lock().await.take() {
            let _ = handle.await;
        }

        result
    }
}

async fn run_flusher(inner: Arc<dyn Sink>, rx: Receiver<Command>, config: BatchSinkConfig) {
    let mut buffer: Vec<Record> = Vec::with_capacity(config.max_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        select! {
            command = rx.recv_async() => match command {
                Ok(Command::Records(records)) => {
                    buffer.extend(records);
                    while buffer.len() >= config.max_size {
                        let rest = buffer.split_off(config.max_size);
                        let full = std::mem::replace(&mut buffer, rest);
                        flush(&inner, full).await;
                    }
                }
                Ok(Command::Shutdown(ack)) => {
                    if !buffer.is_empty() {
                        flush(&inner, std::mem::take(&mut buffer)).await;
                    }
                    let result = inner.close().await;
                    let _ = ack.send(result);
                    break;
                }
                Err(_) => {
                    // All senders dropped without a close call.
                    if !buffer.is_empty() {
                        flush(&inner, std::mem::take(&mut buffer)).await;
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&inner, std::mem::take(&mut buffer)).await;
                }
            }
        }
    }

    debug!("Batch flusher stopped");
}

async fn flush(inner: &Arc<dyn Sink>, batch: Vec<Record>) {
    let count = batch.len();
    if let Err(e) = inner.send(batch).await {
        error!(count, error = %e, "Batch delivery to inner sink failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CaptureSink {
        batches: StdMutex<Vec<Vec<Record>>>,
        closed: StdMutex<bool>,
    }

    #[async_trait]
    impl Sink for CaptureSink {
        async fn send(&self, batch: Vec<Record>) -> Result<()> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn record(line: &str) -> Record {
        Record {
            index_name: "idx".to_string(),
            path: "/tmp/l/a.log".to_string(),
            line: line.to_string(),
        }
    }

    #[tokio::test]
    async fn test_flushes_on_max_size() {
        let capture = Arc::new(CaptureSink::default());
        let sink = BatchSink::new(
            capture.clone(),
            BatchSinkConfig {
                max_size: 2,
                flush_interval: Duration::from_secs(3600),
                queue_capacity: 16,
            },
        );

        sink.send(vec![record("a"), record("b"), record("c")])
            .await
            .unwrap();

        // Wait for the flusher to pick the command up.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = capture.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_close_flushes_remainder() {
        let capture = Arc::new(CaptureSink::default());
        let sink = BatchSink::new(
            capture.clone(),
            BatchSinkConfig {
                max_size: 100,
                flush_interval: Duration::from_secs(3600),
                queue_capacity: 16,
            },
        );

        sink.send(vec![record("a")]).await.unwrap();
        sink.close().await.unwrap();

        let batches = capture.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert!(*capture.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_interval_flush() {
        let capture = Arc::new(CaptureSink::default());
        let sink = BatchSink::new(
            capture.clone(),
            BatchSinkConfig {
                max_size: 100,
                flush_interval: Duration::from_millis(50),
                queue_capacity: 16,
            },
        );

        sink.send(vec![record("a")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let batches = capture.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let capture = Arc::new(CaptureSink::default());
        let sink = BatchSink::new(capture.clone(), BatchSinkConfig::default());

        sink.close().await.unwrap();
        assert!(sink.send(vec![record("a")]).await.is_err());
    }
}
