//! Down-sampled depth history

use serde::{Deserialize, Serialize};

/// One point of the binned depth series.
///
/// `tick` is the first tick of the bin; `bid` and `ask` are the mean total
/// depth across the ticks in that bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub tick: usize,
    pub bid: f64,
    pub ask: f64,
}
