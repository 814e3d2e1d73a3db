//! Error types for depth ingestion and replay
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Terminal failure of one ingestion run.
///
/// Any of these aborts the whole parse; no partial dataset is ever stored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Missing required columns: {reason}")]
    MissingColumns { reason: String },

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("Line exceeds {limit} bytes without a line break ({buffered} bytes buffered); the file is corrupt or not text")]
    LineTooLong { buffered: usize, limit: usize },

    #[error("No snapshots parsed from input")]
    EmptyResult,

    #[error("Byte source failed: {message}")]
    Source { message: String },
}

impl IngestError {
    /// A well-formed input that produced nothing, as opposed to a parse failure.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, IngestError::EmptyResult)
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Source {
            message: err.to_string(),
        }
    }
}

/// Encoding resolution errors. Never surfaced to callers: the resolver logs
/// them and substitutes UTF-8.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Unsupported encoding: {label}")]
    Unsupported { label: String },
}

/// Session store lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },
}
