use futures::Stream;
use serde::{Deserialize, Serialize};

/// One content block inside an `Assistant` message. Replaces reflection
/// over a vendor SDK's message objects: every block the agent loop needs
/// to react to is a named variant here, never a field walked by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        is_error: bool,
        /// Set by the LLM provider when this tool's completion corresponds
        /// to a file-tree snapshot it can later restore from. `None` for
        /// tools that don't mutate files or when checkpointing is off.
        #[serde(default)]
        checkpoint_id: Option<uuid::Uuid>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultInfo {
    pub usage: Usage,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub is_error: bool,
    pub subtype: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

/// A message yielded by the streaming message pump. This is the entire
/// surface the orchestrator needs from the LLM vendor SDK; any vendor that
/// can produce this enum over an async stream plugs in as a
/// [`MessagePump`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncomingMessage {
    System { subtype: String },
    Assistant { content: Vec<ContentBlock> },
    User { content: serde_json::Value },
    Result(ResultInfo),
    StreamEvent { raw: serde_json::Value },
}

/// An async iterator over [`IncomingMessage`]s for one agent run. The
/// orchestrator drives this stream and never reaches into vendor-specific
/// SDK objects.
pub trait MessagePump: Stream<Item = Result<IncomingMessage, MessagePumpError>> + Send {}

impl<T> MessagePump for T where T: Stream<Item = Result<IncomingMessage, MessagePumpError>> + Send {}

#[derive(Debug, thiserror::Error)]
pub enum MessagePumpError {
    #[error("message stream ended with error: {0}")]
    StreamError(String),
    #[error("message stream cancelled")]
    Cancelled,
}
