//! Depth Replay Service
//!
//! Ingests order book snapshot CSV exports of arbitrary size and serves them
//! back tick by tick:
//! - Charset detection and streaming text decoding
//! - Line framing with bounded carry-over
//! - Header resolution with paired price/size level columns
//! - Per-tick depth totals and a down-sampled depth history
//! - A bounded in-memory store of completed sessions
//! - Snapshot and history queries over stored sessions
//!
//! # Architecture
//!
//! ```text
//!    byte chunks
//!        │
//!   ┌────▼─────┐
//!   │ Encoding │  ← detected once, on the first chunk
//!   └────┬─────┘
//!   ┌────▼─────┐
//!   │ Framing  │  ← lines, progress
//!   └────┬─────┘
//!        │ bounded queue
//!   ┌────▼─────┐
//!   │  Schema  │  ← header → column map, rows → snapshots
//!   └────┬─────┘
//!   ┌────▼───────┐
//!   │ Aggregator │  ← depth totals, history bins
//!   └────┬───────┘
//!   ┌────▼────┐
//!   │ Session │ ──► snapshot / history queries
//!   └─────────┘
//! ```

pub mod aggregator;
pub mod backpressure;
pub mod config;
pub mod encoding;
pub mod events;
pub mod format;
pub mod framing;
pub mod ingestion;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod upload;

pub use aggregator::BookSeries;
pub use events::IngestEvent;
pub use ingestion::{BookIngester, IngestOutcome, IngestStats, ProgressReport};
pub use session::SessionStore;
pub use snapshot::{HistoryView, ReplayReader, SnapshotView};
pub use upload::{UploadHandler, UploadReceipt};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
