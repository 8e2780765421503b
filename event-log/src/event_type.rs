//! Closed set of event types the orchestrator and UI agree on (spec.md
//! §4.5), plus the raw pump-message envelope types kept for traceability
//! of the underlying message a granular event was derived from. `as_str`
//! is the only place the wire name is spelled out, so every call site
//! routes through one definition instead of scattered string literals.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    AgentStart,
    UserMessage,
    ToolStart,
    ToolInputReady,
    ToolComplete,
    SubagentStart,
    SubagentMessage,
    SubagentStop,
    Thinking,
    MetricsUpdate,
    QuestionPending,
    QuestionAnswered,
    TodoUpdate,
    Cancelled,
    Error,
    AgentComplete,
    /// Raw `System`/`StreamEvent`/`Result` pump messages and assistant-text
    /// envelopes, kept alongside the granular events above for
    /// traceability back to the underlying message.
    System,
    AssistantMessage,
    StreamEvent,
    RunResult,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AgentStart => "agent_start",
            EventType::UserMessage => "user_message",
            EventType::ToolStart => "tool_start",
            EventType::ToolInputReady => "tool_input_ready",
            EventType::ToolComplete => "tool_complete",
            EventType::SubagentStart => "subagent_start",
            EventType::SubagentMessage => "subagent_message",
            EventType::SubagentStop => "subagent_stop",
            EventType::Thinking => "thinking",
            EventType::MetricsUpdate => "metrics_update",
            EventType::QuestionPending => "question_pending",
            EventType::QuestionAnswered => "question_answered",
            EventType::TodoUpdate => "todo_update",
            EventType::Cancelled => "cancelled",
            EventType::Error => "error",
            EventType::AgentComplete => "agent_complete",
            EventType::System => "system",
            EventType::AssistantMessage => "assistant",
            EventType::StreamEvent => "stream_event",
            EventType::RunResult => "result",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_the_spec_vocabulary() {
        assert_eq!(EventType::QuestionPending.as_str(), "question_pending");
        assert_eq!(EventType::ToolComplete.to_string(), "tool_complete");
        assert_eq!(String::from(EventType::AgentComplete), "agent_complete");
    }
}
