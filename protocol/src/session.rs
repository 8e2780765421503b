use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::Checkpoint;

/// Lifecycle state of a session. Transitions are driven by the orchestrator
/// (C7), the queue processor (C6), and the auto-resume sweep (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Queued,
    Running,
    WaitingForInput,
    Complete,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// Authoritative, persistent record of one agent-user interaction. A
/// session may have several runs across its lifetime (resume, fork); the
/// `cumulative_*` fields sum across all of them while the bare fields track
/// only the current run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_text: String,
    pub model: String,
    pub working_dir: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub num_turns: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,

    pub cumulative_turns: u32,
    pub cumulative_duration_ms: u64,
    pub cumulative_cost_usd: f64,
    pub cumulative_input_tokens: u64,
    pub cumulative_output_tokens: u64,
    pub cumulative_cache_creation_tokens: u64,
    pub cumulative_cache_read_tokens: u64,

    pub cancel_requested: bool,

    pub queue_position: Option<u32>,
    pub queued_at: Option<DateTime<Utc>>,
    pub priority: i64,

    pub is_auto_resume: bool,
    pub resume_attempts: u32,

    pub external_resume_id: Option<String>,
    pub parent_session_id: Option<Uuid>,

    pub file_checkpointing_enabled: bool,
    pub checkpoints: Vec<Checkpoint>,
}

impl Session {
    pub fn new(user_id: Uuid, task_text: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            task_text: task_text.into(),
            model: model.into(),
            working_dir: String::new(),
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            num_turns: 0,
            duration_ms: 0,
            cost_usd: 0.0,
            cumulative_turns: 0,
            cumulative_duration_ms: 0,
            cumulative_cost_usd: 0.0,
            cumulative_input_tokens: 0,
            cumulative_output_tokens: 0,
            cumulative_cache_creation_tokens: 0,
            cumulative_cache_read_tokens: 0,
            cancel_requested: false,
            queue_position: None,
            queued_at: None,
            priority: 0,
            is_auto_resume: false,
            resume_attempts: 0,
            external_resume_id: None,
            parent_session_id: None,
            file_checkpointing_enabled: false,
            checkpoints: Vec::new(),
        }
    }

    /// Fold this run's metrics into the cumulative totals and clear the
    /// current-run counters, matching the orchestrator's completion step.
    pub fn accumulate_run_metrics(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
    ) {
        self.cumulative_turns += self.num_turns;
        self.cumulative_duration_ms += self.duration_ms;
        self.cumulative_cost_usd += self.cost_usd;
        self.cumulative_input_tokens += input_tokens;
        self.cumulative_output_tokens += output_tokens;
        self.cumulative_cache_creation_tokens += cache_creation_tokens;
        self.cumulative_cache_read_tokens += cache_read_tokens;
    }
}
