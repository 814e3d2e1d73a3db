//! Order book snapshot types
//!
//! A `Snapshot` is one decoded CSV row: the two timestamps plus the bid and
//! ask levels that carried liquidity. Levels keep the column order of the
//! source file; sorting by price is left to whoever renders them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Column prefix used by depth exports (`bid` / `ask`).
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A single price level with resting size.
///
/// Both fields are strictly positive and finite. The only ways in are
/// [`BookLevel::new`] and deserialization, which applies the same check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBookLevel")]
pub struct BookLevel {
    price: f64,
    size: f64,
}

/// Rejected level values.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("Book level needs positive finite price and size, got price={price} size={size}")]
pub struct InvalidBookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Deserialize)]
struct RawBookLevel {
    price: f64,
    size: f64,
}

impl TryFrom<RawBookLevel> for BookLevel {
    type Error = InvalidBookLevel;

    fn try_from(raw: RawBookLevel) -> Result<Self, Self::Error> {
        BookLevel::new(raw.price, raw.size).ok_or(InvalidBookLevel {
            price: raw.price,
            size: raw.size,
        })
    }
}

impl BookLevel {
    /// Build a level, returning `None` when either value is zero, negative,
    /// NaN or infinite.
    pub fn new(price: f64, size: f64) -> Option<Self> {
        if is_positive_finite(price) && is_positive_finite(size) {
            Some(Self { price, size })
        } else {
            None
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn size(&self) -> f64 {
        self.size
    }
}

fn is_positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Order book state at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Capture-side receive timestamp, verbatim from the file.
    pub ts_recv: String,
    /// Venue event timestamp, verbatim from the file.
    pub ts_event: String,
    /// Bid levels in source column order.
    pub bids: Vec<BookLevel>,
    /// Ask levels in source column order.
    pub asks: Vec<BookLevel>,
}

impl Snapshot {
    pub fn levels(&self, side: Side) -> &[BookLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Sum of sizes across every level on one side.
    pub fn depth(&self, side: Side) -> f64 {
        self.levels(side).iter().map(|level| level.size).sum()
    }

    pub fn bid_total(&self) -> f64 {
        self.depth(Side::Bid)
    }

    pub fn ask_total(&self) -> f64 {
        self.depth(Side::Ask)
    }

    /// True when neither side carries a level.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Absolute distance between the receive and event timestamps.
    ///
    /// Returns `None` if either timestamp is neither RFC 3339 nor integer
    /// nanoseconds since the Unix epoch.
    pub fn latency(&self) -> Option<Duration> {
        let recv = parse_timestamp(&self.ts_recv)?;
        let event = parse_timestamp(&self.ts_event)?;
        let delta = recv - event;
        Some(if delta < Duration::zero() { -delta } else { delta })
    }
}

/// Parse an export timestamp: RFC 3339 text or Unix epoch nanoseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(nanos) = raw.parse::<i64>() {
        return Some(DateTime::from_timestamp_nanos(nanos));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
