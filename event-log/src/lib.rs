//! Per-session append-only event log: durable storage with gapless
//! sequence numbers, bounded live fan-out, and the text sanitization and
//! structured-output parsing applied before an event's payload reaches a
//! UI.

mod event_type;
mod hub;
mod log;
mod sanitize;
mod store;
mod structured_output;

pub use event_type::EventType;
pub use hub::EventHub;
pub use log::{EventLog, ReplayThenLive};
pub use sanitize::{
    sanitize_text_for_display, sanitize_tool_names_in_text, strip_system_reminders,
    transform_attached_files,
};
pub use store::{EventStore, EventStoreError};
pub use structured_output::{normalize_error_value, parse_structured_output};
