//! Backpressure between line framing and row decoding
//!
//! Framed lines travel to the row decoder over a bounded queue. When the
//! queue is full the framer suspends until the decoder drains it, so a fast
//! byte source can never buffer unbounded text ahead of a slower consumer.
//! Ordering is preserved: lines are decoded in exactly the order framed.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// The decoding side hung up, which only happens after it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("record queue closed by the decoding stage")]
pub struct QueueClosed;

/// Create a bounded record queue holding at most `capacity` lines.
pub fn record_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordSender {
            tx,
            lines_sent: 0,
            backpressure_waits: 0,
        },
        RecordReceiver {
            rx,
            lines_received: 0,
        },
    )
}

/// Producer half, owned by the framer.
#[derive(Debug)]
pub struct RecordSender {
    tx: mpsc::Sender<String>,
    lines_sent: u64,
    /// Times an enqueue had to wait for the decoder to drain.
    backpressure_waits: u64,
}

impl RecordSender {
    /// Enqueue a line, suspending while the queue is full.
    pub async fn send(&mut self, line: String) -> Result<(), QueueClosed> {
        match self.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                self.backpressure_waits += 1;
                debug!(
                    lines_sent = self.lines_sent,
                    waits = self.backpressure_waits,
                    "Record queue full; waiting for decoder to drain"
                );
                self.tx.send(line).await.map_err(|_| QueueClosed)?;
            }
            Err(TrySendError::Closed(_)) => return Err(QueueClosed),
        }

        self.lines_sent += 1;
        Ok(())
    }

    pub fn lines_sent(&self) -> u64 {
        self.lines_sent
    }

    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits
    }
}

/// Consumer half, owned by the row decoder.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<String>,
    lines_received: u64,
}

impl RecordReceiver {
    /// Next line in framing order; `None` once the framer is done.
    pub async fn recv(&mut self) -> Option<String> {
        let line = self.rx.recv().await?;
        self.lines_received += 1;
        Some(line)
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received
    }
}
