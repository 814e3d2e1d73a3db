//! Types library for order book depth replay
//!
//! This library provides the core type definitions shared by the ingestion
//! pipeline and the replay query surface: decoded book snapshots, binned
//! depth history, session identifiers and the error taxonomy.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Unique identifiers (SessionId)
//! - `book`: Book levels, sides and per-tick snapshots
//! - `history`: Down-sampled depth history points
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod book;
pub mod history;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::book::*;
    pub use crate::history::*;
    pub use crate::errors::*;
}
