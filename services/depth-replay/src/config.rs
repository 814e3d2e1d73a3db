//! Configuration for ingestion, session retention and queries

/// Number of bins the depth history is reduced to.
pub const TARGET_HISTORY_BINS: usize = 1000;

/// Depth levels checked per side when resolving the header (`_00`..`_09`).
pub const MAX_BOOK_LEVELS: usize = 10;

/// Levels per side returned by a snapshot query.
pub const MAX_VIEW_LEVELS: usize = 25;

/// Sessions retained before the oldest is evicted.
pub const DEFAULT_SESSION_CAPACITY: usize = 10;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Leading bytes of the first chunk handed to charset detection.
    pub encoding_sample_bytes: usize,
    /// Detection confidence must exceed this to override UTF-8.
    pub min_detection_confidence: f32,
    /// Large chunks are decoded in sub-batches of at most this many bytes.
    pub max_batch_bytes: usize,
    /// Carry-over without a line break beyond this aborts the parse.
    pub max_line_bytes: usize,
    /// The framer yields to the scheduler after this many lines.
    pub yield_every_lines: usize,
    /// Bounded queue between line framing and row decoding.
    pub queue_capacity: usize,
    /// Size of the down-sampled depth history.
    pub target_bins: usize,
    /// Emit an info-level progress log every this many bytes.
    pub progress_log_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            encoding_sample_bytes: 64 * KIB,
            min_detection_confidence: 0.5,
            max_batch_bytes: 10 * MIB,
            max_line_bytes: 50 * MIB,
            yield_every_lines: 1000,
            queue_capacity: 1024,
            target_bins: TARGET_HISTORY_BINS,
            progress_log_bytes: 50 * MIB as u64,
        }
    }
}

impl IngestConfig {
    pub fn with_defaults() -> Self {
        Self::default()
    }
}

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Maximum sessions retained; older ones are evicted by creation time.
    pub capacity: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SESSION_CAPACITY,
        }
    }
}

/// Configuration for the replay query surface.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Levels per side included in a snapshot view.
    pub max_view_levels: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_view_levels: MAX_VIEW_LEVELS,
        }
    }
}
