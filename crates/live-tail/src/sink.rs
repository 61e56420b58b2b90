//! Batch Sinks

use async_trait::async_trait;
use storage::Record;
use thiserror::Error;
use tokio::sync::watch;

/// The client went away or the push could not be written
#[derive(Debug, Error)]
#[error("sink closed: {0}")]
pub struct SinkError(pub String);

/// Destination for live-tail batches
#[async_trait]
pub trait BatchSink: Send {
    async fn push(&mut self, batch: &[Record]) -> Result<(), SinkError>;
}

/// In-process sink holding only the most recent batch.
///
/// A push replaces any batch the reader has not taken yet.
pub struct LatestSink(watch::Sender<Vec<Record>>);

/// Reading end of a [`LatestSink`]
pub struct TailReceiver(watch::Receiver<Vec<Record>>);

/// Create a connected sink/receiver pair
pub fn latest_channel() -> (LatestSink, TailReceiver) {
    let (tx, rx) = watch::channel(Vec::new());
    (LatestSink(tx), TailReceiver(rx))
}

#[async_trait]
impl BatchSink for LatestSink {
    async fn push(&mut self, batch: &[Record]) -> Result<(), SinkError> {
        self.0
            .send(batch.to_vec())
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }
}

impl TailReceiver {
    /// Wait for a batch newer than the last one returned.
    ///
    /// Returns `None` once the tail has stopped and nothing is left unread.
    pub async fn recv(&mut self) -> Option<Vec<Record>> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow_and_update().clone())
    }
}
