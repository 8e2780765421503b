//! Background loop that polls the queue, starts tasks once quotas allow,
//! emits queue-position updates, and reaps tasks that have waited too
//! long. `TaskHandler` is the seam the orchestrator plugs into — this
//! crate never calls back into session/agent machinery directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sandboxd_protocol::QueuedTask;
use uuid::Uuid;

use crate::quota::QuotaManager;
use crate::store::{QueueError, QueueStore};

pub const RESUME_CONTEXT_PREFIX: &str = "<resume-context>\n\
Previous execution was interrupted by system restart.\n\
Resume from the last known and stable checkpoint.\n\
</resume-context>\n\n";

/// The orchestrator-side hooks a [`QueueProcessor`] drives. Kept separate
/// from [`QueueStore`] since starting a task means spawning the agent run
/// loop — machinery this crate doesn't own.
pub trait TaskHandler: Send + Sync {
    /// Attempt to start `task`. `Ok(())` means the task is now running
    /// (quotas already incremented by the caller); `Err` rolls the quota
    /// increment back.
    fn start_task(&self, task: QueuedTask) -> impl Future<Output = Result<(), String>> + Send;
    fn emit_queue_event(
        &self,
        session_id: Uuid,
        event_type: &str,
        data: serde_json::Value,
    ) -> impl Future<Output = ()> + Send;
    fn mark_session_failed(&self, session_id: Uuid, reason: &str) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueProcessorConfig {
    pub poll_interval: Duration,
    pub timeout_check_interval: Duration,
    /// `Duration::ZERO` disables timeout reaping entirely.
    pub task_timeout: Duration,
}

impl Default for QueueProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout_check_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub struct QueueProcessor<S, H> {
    store: Arc<S>,
    quotas: Arc<QuotaManager>,
    handler: Arc<H>,
    config: QueueProcessorConfig,
}

impl<S, H> QueueProcessor<S, H>
where
    S: QueueStore + 'static,
    H: TaskHandler + 'static,
{
    pub fn new(store: Arc<S>, quotas: Arc<QuotaManager>, handler: Arc<H>, config: QueueProcessorConfig) -> Self {
        Self {
            store,
            quotas,
            handler,
            config,
        }
    }

    /// Runs the poll/reap loop until `shutdown` resolves. Intended to be
    /// driven from a `tokio::select!` against a cancellation signal, or
    /// spawned and aborted directly.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut last_timeout_check = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("queue processor stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.process_next().await {
                tracing::warn!(error = %e, "queue processing error");
            }

            if !self.config.task_timeout.is_zero()
                && last_timeout_check.elapsed() >= self.config.timeout_check_interval
            {
                self.reap_timed_out(self.config.task_timeout).await;
                last_timeout_check = tokio::time::Instant::now();
            }
        }
    }

    /// Peek, quota-check, and (if allowed) dequeue-and-start the next
    /// task. Peeking before dequeuing means a task stays visible to
    /// position-update consumers while it's still blocked on quota.
    pub async fn process_next(&self) -> Result<(), QueueError> {
        let Some(peeked) = self.store.peek().await? else {
            return Ok(());
        };

        let allowed = self
            .quotas
            .can_start_task(peeked.user_id, self.store.as_ref(), None)
            .await?;
        if let Err(denial) = allowed {
            tracing::debug!(session_id = %peeked.session_id, %denial, "task waiting in queue");
            return Ok(());
        }

        let Some(task) = self.store.dequeue().await? else {
            // Another processor instance raced us to it.
            return Ok(());
        };

        self.start_task(task).await?;
        self.emit_position_updates().await?;
        Ok(())
    }

    async fn start_task(&self, mut task: QueuedTask) -> Result<(), QueueError> {
        let session_id = task.session_id;
        let user_id = task.user_id;

        self.quotas.increment_global();
        self.store.mark_user_active(user_id, session_id).await?;

        self.handler
            .emit_queue_event(
                session_id,
                "queue_started",
                serde_json::json!({
                    "session_id": session_id,
                    "message": "Task started after queuing",
                    "was_auto_resume": task.is_auto_resume,
                }),
            )
            .await;

        if task.is_auto_resume {
            task.task = format!("{RESUME_CONTEXT_PREFIX}{}", task.task);
        }

        if let Err(reason) = self.handler.start_task(task).await {
            tracing::error!(session_id = %session_id, %reason, "failed to start queued task");
            self.quotas.decrement_global();
            self.store.mark_user_inactive(user_id, session_id).await?;
            self.handler.mark_session_failed(session_id, &reason).await;
        }
        Ok(())
    }

    async fn emit_position_updates(&self) -> Result<(), QueueError> {
        let queued = self.store.queued_sessions(100).await?;
        let queue_length = queued.len();
        for (index, session_id) in queued.into_iter().enumerate() {
            let position = index + 1;
            self.handler
                .emit_queue_event(
                    session_id,
                    "queue_position_update",
                    serde_json::json!({
                        "session_id": session_id,
                        "position": position,
                        "queue_length": queue_length,
                    }),
                )
                .await;
        }
        Ok(())
    }

    /// Remove and fail every task that has waited longer than `task_timeout`.
    pub async fn reap_timed_out(&self, task_timeout: Duration) {
        let now = chrono::Utc::now();
        let Ok(cutoff) = chrono::Duration::from_std(task_timeout) else {
            return;
        };
        let queued = match self.store.snapshot().await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list queued sessions for timeout reap");
                return;
            }
        };
        for task in queued {
            if now - task.queued_at < cutoff {
                continue;
            }
            let session_id = task.session_id;
            let _ = self.store.remove(session_id).await;
            self.handler
                .emit_queue_event(
                    session_id,
                    "error",
                    serde_json::json!({
                        "message": format!("task timed out after waiting {:?} in queue", task_timeout),
                        "error_type": "queue_timeout",
                    }),
                )
                .await;
            self.handler.mark_session_failed(session_id, "queue_timeout").await;
        }
    }
}
