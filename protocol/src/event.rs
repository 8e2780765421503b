use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in a session's append-only, sequence-numbered event stream.
/// `(session_id, sequence)` is unique; sequences start at 1 and have no
/// gaps. `data` is an opaque JSON payload — the orchestrator and UI agree
/// on the shape per `event_type`, but the event log itself never
/// interprets it beyond the sanitization pass applied before display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: Uuid,
    pub sequence: u64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(session_id: Uuid, sequence: u64, event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            session_id,
            sequence,
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
