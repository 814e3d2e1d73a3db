//! Upload lifecycle events
//!
//! An upload emits any number of `Progress` events followed by exactly one
//! terminal `Complete` or `Error`. Events serialize with an `event` tag so a
//! transport can frame them without knowing their payloads; `to_sse_frame`
//! renders the server-sent-events framing directly.

use serde::{Deserialize, Serialize};
use types::ids::SessionId;

use crate::ingestion::ProgressReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum IngestEvent {
    Progress(ProgressReport),

    #[serde(rename_all = "camelCase")]
    Complete {
        session_id: SessionId,
        total_ticks: usize,
        message: String,
    },

    Error { error: String },
}

impl IngestEvent {
    /// Event name as used in the tag.
    pub fn name(&self) -> &'static str {
        match self {
            IngestEvent::Progress(_) => "progress",
            IngestEvent::Complete { .. } => "complete",
            IngestEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestEvent::Progress(_))
    }

    /// `event: <name>\ndata: <json>\n\n`, with the tag left out of the data.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            IngestEvent::Progress(report) => serde_json::to_string(report)?,
            IngestEvent::Complete {
                session_id,
                total_ticks,
                message,
            } => serde_json::to_string(&serde_json::json!({
                "sessionId": session_id,
                "totalTicks": total_ticks,
                "message": message,
            }))?,
            IngestEvent::Error { error } => serde_json::to_string(&serde_json::json!({ "error": error }))?,
        };

        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}
