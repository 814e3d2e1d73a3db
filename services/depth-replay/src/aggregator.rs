//! Depth aggregation and history binning
//!
//! Collects decoded snapshots in arrival order together with per-tick bid
//! and ask depth totals, then reduces the depth series to at most
//! `target_bins` history points so charting cost does not grow with file
//! size.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::book::Snapshot;
use types::errors::IngestError;
use types::history::HistoryPoint;

/// A fully ingested snapshot series. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSeries {
    pub snapshots: Vec<Snapshot>,
    /// Total bid size per tick, parallel to `snapshots`.
    pub bid_depth: Vec<f64>,
    /// Total ask size per tick, parallel to `snapshots`.
    pub ask_depth: Vec<f64>,
    /// Binned depth history.
    pub history: Vec<HistoryPoint>,
}

impl BookSeries {
    pub fn total_ticks(&self) -> usize {
        self.snapshots.len()
    }

    /// SHA-256 fingerprint of the snapshot content.
    ///
    /// Two ingestions of the same bytes produce the same checksum no matter
    /// how the input was chunked.
    pub fn checksum(&self) -> String {
        compute_checksum(&self.snapshots)
    }
}

/// Accumulates snapshots and running depth totals for one ingestion.
pub struct DepthAggregator {
    snapshots: Vec<Snapshot>,
    bid_depth: Vec<f64>,
    ask_depth: Vec<f64>,
    target_bins: usize,
}

impl DepthAggregator {
    pub fn new(target_bins: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            bid_depth: Vec::new(),
            ask_depth: Vec::new(),
            target_bins: target_bins.max(1),
        }
    }

    /// Append one snapshot and its depth totals.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.bid_depth.push(snapshot.bid_total());
        self.ask_depth.push(snapshot.ask_total());
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Reduce the depth series and hand back the completed dataset.
    ///
    /// An input that decoded to zero snapshots yields `EmptyResult`.
    pub fn finish(self) -> Result<BookSeries, IngestError> {
        if self.snapshots.is_empty() {
            return Err(IngestError::EmptyResult);
        }

        let history = aggregate_history(&self.bid_depth, &self.ask_depth, self.target_bins);

        Ok(BookSeries {
            snapshots: self.snapshots,
            bid_depth: self.bid_depth,
            ask_depth: self.ask_depth,
            history,
        })
    }
}

/// Reduce parallel depth series into at most `target_bins` points.
///
/// Series no longer than `target_bins` map one point per tick with values
/// unchanged. Longer series use bins of `ceil(len / target_bins)` ticks; each
/// point carries the bin's first tick and the mean depth over the bin, and
/// the last bin may be shorter.
pub fn aggregate_history(bid_depth: &[f64], ask_depth: &[f64], target_bins: usize) -> Vec<HistoryPoint> {
    let total_ticks = bid_depth.len().min(ask_depth.len());
    let target_bins = target_bins.max(1);

    if total_ticks <= target_bins {
        return (0..total_ticks)
            .map(|tick| HistoryPoint {
                tick,
                bid: bid_depth[tick],
                ask: ask_depth[tick],
            })
            .collect();
    }

    let bin_size = total_ticks.div_ceil(target_bins);

    (0..total_ticks)
        .step_by(bin_size)
        .map(|bin_start| {
            let bin_end = (bin_start + bin_size).min(total_ticks);
            let count = (bin_end - bin_start) as f64;
            let bid_sum: f64 = bid_depth[bin_start..bin_end].iter().sum();
            let ask_sum: f64 = ask_depth[bin_start..bin_end].iter().sum();

            HistoryPoint {
                tick: bin_start,
                bid: bid_sum / count,
                ask: ask_sum / count,
            }
        })
        .collect()
}

/// Hash timestamps and level bit patterns tick by tick.
fn compute_checksum(snapshots: &[Snapshot]) -> String {
    let mut hasher = Sha256::new();

    for snapshot in snapshots {
        hasher.update(snapshot.ts_recv.as_bytes());
        hasher.update(b",");
        hasher.update(snapshot.ts_event.as_bytes());
        hasher.update(b"|");
        for level in &snapshot.bids {
            hasher.update(level.price().to_le_bytes());
            hasher.update(level.size().to_le_bytes());
        }
        hasher.update(b"---");
        for level in &snapshot.asks {
            hasher.update(level.price().to_le_bytes());
            hasher.update(level.size().to_le_bytes());
        }
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}
