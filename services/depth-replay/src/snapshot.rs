//! Replay query surface
//!
//! Read-only views over stored sessions: a single tick's book capped to a
//! displayable depth, and the precomputed depth history. Nothing here
//! recomputes from the raw series; queries are cheap lookups.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use types::book::{BookLevel, Snapshot};
use types::errors::SessionError;
use types::history::HistoryPoint;
use types::ids::SessionId;

use crate::config::QueryConfig;
use crate::format::format_latency;
use crate::session::SessionStore;

/// Total size over every level of each side, not just the displayed ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthTotals {
    pub bid: f64,
    pub ask: f64,
}

/// One tick of the book as served to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    /// The tick actually served, after clamping.
    pub tick: usize,
    pub ts_recv: String,
    pub ts_event: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub totals: DepthTotals,
    /// Receive-to-event latency, when both timestamps parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<String>,
}

impl SnapshotView {
    pub fn from_snapshot(tick: usize, snapshot: &Snapshot, max_levels: usize) -> Self {
        Self {
            tick,
            ts_recv: snapshot.ts_recv.clone(),
            ts_event: snapshot.ts_event.clone(),
            bids: snapshot.bids.iter().take(max_levels).copied().collect(),
            asks: snapshot.asks.iter().take(max_levels).copied().collect(),
            totals: DepthTotals {
                bid: snapshot.bid_total(),
                ask: snapshot.ask_total(),
            },
            latency: snapshot.latency().map(format_latency),
        }
    }
}

/// Binned depth history plus the true tick count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub history: Vec<HistoryPoint>,
    pub total_ticks: usize,
}

/// Serves snapshot and history queries from a shared store.
#[derive(Clone)]
pub struct ReplayReader {
    store: Arc<SessionStore>,
    config: QueryConfig,
}

impl ReplayReader {
    pub fn new(store: Arc<SessionStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<SessionStore>) -> Self {
        Self::new(store, QueryConfig::default())
    }

    /// Book at `tick`, clamped into `[0, total_ticks - 1]`.
    pub fn snapshot(&self, session_id: &SessionId, tick: i64) -> Result<SnapshotView, SessionError> {
        let session = self.store.get_session(session_id)?;
        let (tick, snapshot) = session.snapshot_at(tick).ok_or_else(|| SessionError::NotFound {
            session_id: session_id.to_string(),
        })?;

        Ok(SnapshotView::from_snapshot(tick, snapshot, self.config.max_view_levels))
    }

    pub fn history(&self, session_id: &SessionId) -> Result<HistoryView, SessionError> {
        let session = self.store.get_session(session_id)?;
        Ok(HistoryView {
            history: session.history().to_vec(),
            total_ticks: session.total_ticks(),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}
