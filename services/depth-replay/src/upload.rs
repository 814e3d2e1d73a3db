//! Upload orchestration
//!
//! Runs one ingestion end to end: forwards progress as events, stores the
//! completed dataset, and closes with a single `Complete` or `Error` event.
//! A failed upload never touches the session store.

use std::io;
use std::sync::Arc;

use futures::Stream;
use tracing::{info, warn};
use types::errors::IngestError;
use types::ids::SessionId;

use crate::format::format_count;
use crate::ingestion::{BookIngester, IngestStats};
use crate::events::IngestEvent;
use crate::session::SessionStore;

/// What a successful upload produced.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub session_id: SessionId,
    pub total_ticks: usize,
    pub stats: IngestStats,
}

pub struct UploadHandler {
    ingester: BookIngester,
    store: Arc<SessionStore>,
}

impl UploadHandler {
    pub fn new(ingester: BookIngester, store: Arc<SessionStore>) -> Self {
        Self { ingester, store }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Ingest `source` and store the result, reporting through `emit`.
    ///
    /// `emit` sees every progress report and then exactly one terminal event.
    pub async fn handle<S, B, E>(
        &self,
        source: S,
        total_bytes: Option<u64>,
        mut emit: E,
    ) -> Result<UploadReceipt, IngestError>
    where
        S: Stream<Item = io::Result<B>> + Unpin,
        B: AsRef<[u8]>,
        E: FnMut(IngestEvent),
    {
        let result = self
            .ingester
            .ingest(source, total_bytes, |report| emit(IngestEvent::Progress(report)))
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Upload rejected");
                emit(IngestEvent::Error { error: err.to_string() });
                return Err(err);
            }
        };

        let total_ticks = outcome.series.total_ticks();
        let session_id = self.store.create_session(outcome.series);

        info!(
            session_id = %session_id,
            total_ticks,
            checksum = %outcome.stats.checksum,
            "Upload stored"
        );

        emit(IngestEvent::Complete {
            session_id,
            total_ticks,
            message: format!("Successfully parsed {} snapshots", format_count(total_ticks)),
        });

        Ok(UploadReceipt {
            session_id,
            total_ticks,
            stats: outcome.stats,
        })
    }
}
