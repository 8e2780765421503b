use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task waiting in the priority queue. Stored alongside the sorted-set
/// entry with a TTL so orphaned records are eventually collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub task: String,
    pub priority: i64,
    pub queued_at: DateTime<Utc>,
    pub is_auto_resume: bool,
    pub resume_from: Option<String>,
    /// Per-task override for the run's wall-clock bound. `None` falls back
    /// to the orchestrator's configured default timeout.
    pub timeout_seconds: Option<u64>,
}

impl QueuedTask {
    pub fn new(session_id: Uuid, user_id: Uuid, task: impl Into<String>, priority: i64) -> Self {
        Self {
            session_id,
            user_id,
            task: task.into(),
            priority,
            queued_at: Utc::now(),
            is_auto_resume: false,
            resume_from: None,
            timeout_seconds: None,
        }
    }

    /// `timestamp_ms − priority·BIG_CONSTANT`: lower score dequeues first,
    /// so higher priority and older entries sort ahead of
    /// newer/lower-priority ones. Millisecond resolution (rather than whole
    /// seconds) keeps same-priority entries FIFO as intended — two tasks
    /// enqueued a second apart must not tie.
    pub fn score(&self) -> i64 {
        const BIG_CONSTANT: i64 = 1_000_000_000;
        self.queued_at.timestamp_millis() - self.priority * BIG_CONSTANT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_at(priority: i64, queued_at: DateTime<Utc>) -> QueuedTask {
        let mut t = QueuedTask::new(Uuid::new_v4(), Uuid::new_v4(), "do work", priority);
        t.queued_at = queued_at;
        t
    }

    #[test]
    fn higher_priority_always_scores_lower_regardless_of_age() {
        let now = Utc::now();
        let old_low_priority = task_at(0, now - chrono::Duration::days(1));
        let new_high_priority = task_at(10, now);
        assert!(new_high_priority.score() < old_low_priority.score());
    }

    #[test]
    fn same_priority_older_task_scores_lower() {
        let now = Utc::now();
        let earlier = task_at(5, now);
        let later = task_at(5, now + chrono::Duration::milliseconds(1));
        assert!(earlier.score() < later.score());
    }
}
