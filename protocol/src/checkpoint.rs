use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Auto,
    Manual,
    Turn,
}

/// A file-tree snapshot identified by an opaque UUID minted by the LLM
/// provider's checkpointing feature; the provider owns the actual restore
/// mechanics, the orchestrator only tracks which ones exist and in what
/// order so it can truncate the tail on rewind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: CheckpointKind,
    pub turn_number: u32,
    pub tool_name: Option<String>,
    pub file_path: Option<String>,
    pub description: Option<String>,
}
