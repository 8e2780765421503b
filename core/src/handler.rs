//! Bridges [`sandboxd_queue::TaskHandler`] to the orchestrator. Building
//! the actual agent message stream needs a vendor SDK this crate never
//! depends on, so that step is delegated to a caller-supplied
//! [`PumpFactory`] — the same seam `MessagePump` establishes one layer
//! down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sandboxd_event_log::EventLog;
use sandboxd_permissions::PermissionEngine;
use sandboxd_protocol::{PermissionProfile, QueuedTask, Session, SessionStatus};
use sandboxd_queue::{QueueStore, QuotaManager};
use sandboxd_sandbox::SandboxExecutor;
use uuid::Uuid;

use crate::large_input::process_large_user_input;
use crate::orchestrator::{apply_outcome, SessionOrchestrator};
use crate::resume_context::build_resume_context;
use crate::session::SessionRegistry;
use crate::store::SessionStore;

/// Produces the agent message stream for a queued task. Implemented by the
/// binary that actually knows how to talk to the model vendor; this crate
/// only drives whatever stream comes back.
pub trait PumpFactory: Send + Sync {
    type Pump: sandboxd_protocol::MessagePump + Unpin + Send + 'static;

    fn build(&self, task: &QueuedTask) -> impl Future<Output = Result<Self::Pump, String>> + Send;
}

/// Loads the permission profile and builds the per-session sandbox
/// executor for a queued task's user/profile.
pub trait SessionPreparer: Send + Sync {
    fn prepare(&self, task: &QueuedTask) -> impl Future<Output = Result<(PermissionProfile, SandboxExecutor, String), String>> + Send;
}

/// The subset of `agent.yaml` the handler needs at task-start time, kept
/// separate from `sandboxd_common::Config` so this crate never depends on
/// the config-loading stack.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub default_timeout: Duration,
    pub large_input_threshold_bytes: usize,
    pub large_input_template: String,
}

pub struct OrchestratorTaskHandler<St, Qu, Pf, Sp> {
    sessions: Arc<St>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventLog>,
    pumps: Arc<Pf>,
    preparer: Arc<Sp>,
    queue: Arc<Qu>,
    quotas: Arc<QuotaManager>,
    config: HandlerConfig,
}

impl<St, Qu, Pf, Sp> OrchestratorTaskHandler<St, Qu, Pf, Sp>
where
    St: SessionStore + 'static,
    Qu: QueueStore + 'static,
    Pf: PumpFactory + 'static,
    Sp: SessionPreparer + 'static,
{
    pub fn new(
        sessions: Arc<St>,
        registry: Arc<SessionRegistry>,
        events: Arc<EventLog>,
        pumps: Arc<Pf>,
        preparer: Arc<Sp>,
        queue: Arc<Qu>,
        quotas: Arc<QuotaManager>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            sessions,
            registry,
            events,
            pumps,
            preparer,
            queue,
            quotas,
            config,
        }
    }

    /// Everything that can fail fast, before the task is considered
    /// "started": loading its permission profile, building its sandbox
    /// executor, resolving a resume-context/large-input-redirected task
    /// text, and opening its message pump. Once this succeeds the actual
    /// run is spawned in the background, matching the original
    /// `asyncio.create_task` fire-and-forget shape — a slow agent run must
    /// never block the queue processor from starting the next task.
    async fn run_in_background(&self, task: QueuedTask) -> Result<(), String> {
        let session_id = task.session_id;
        let (profile, sandbox, workspace_path) = self.preparer.prepare(&task).await?;

        let previous_status = self.sessions.get(session_id).await.map(|s| s.status);
        let task = self.resolve_task_text(task, previous_status, &workspace_path).await;

        let pump = self.pumps.build(&task).await?;

        let mut session = self
            .sessions
            .get(session_id)
            .await
            .unwrap_or_else(|| Session::new(task.user_id, task.task.clone(), "default"));
        session.id = session_id;
        session.status = SessionStatus::Running;
        session.working_dir = workspace_path.clone();
        session.updated_at = chrono::Utc::now();
        self.sessions.insert(session).await;

        let orchestrator = SessionOrchestrator::new(self.registry.clone(), self.events.clone());
        let ctx = orchestrator
            .claim(session_id, workspace_path, PermissionEngine::new(profile), sandbox)
            .map_err(|e| e.to_string())?;

        let effective_timeout = task.timeout_seconds.map(Duration::from_secs).unwrap_or(self.config.default_timeout);
        let sessions = self.sessions.clone();
        let queue = self.queue.clone();
        let quotas = self.quotas.clone();
        let user_id = task.user_id;
        tokio::spawn(async move {
            let outcome = orchestrator.run(ctx, pump, effective_timeout).await;
            if let Err(e) = apply_outcome(sessions.as_ref(), session_id, outcome).await {
                tracing::error!(session_id = %session_id, error = %e, "failed to persist run outcome");
            }
            quotas.decrement_global();
            if let Err(e) = queue.mark_user_inactive(user_id, session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to mark user inactive after run");
            }
        });
        Ok(())
    }

    /// If this task resumes a session that was `WaitingForInput`, answers
    /// its pending question (from `task.resume_from`) in the event log and
    /// prepends a `<resume-context>` block built from the session's Q&A and
    /// todo history. Then applies the large-input redirect, in that order,
    /// so a huge answer still gets redirected to a workspace file.
    async fn resolve_task_text(&self, mut task: QueuedTask, previous_status: Option<SessionStatus>, workspace_path: &str) -> QueuedTask {
        if previous_status == Some(SessionStatus::WaitingForInput) {
            let mut history = self.events.store().read_all(task.session_id).await.unwrap_or_default();
            if let Some(answer) = &task.resume_from {
                if let Some(question_id) = last_unanswered_question_id(&history) {
                    let event = self
                        .events
                        .append(
                            task.session_id,
                            sandboxd_event_log::EventType::QuestionAnswered,
                            serde_json::json!({"question_id": question_id, "answer": answer}),
                        )
                        .await;
                    if let Ok(event) = event {
                        history.push(event);
                    }
                }
            }
            if let Some(resume_context) = build_resume_context(&history) {
                task.task = format!("{resume_context}\n\n{}", task.task);
            }
        }

        match process_large_user_input(
            &task.task,
            self.config.large_input_threshold_bytes,
            std::path::Path::new(workspace_path),
            &self.config.large_input_template,
            task.queued_at.timestamp_millis(),
        ) {
            Ok(outcome) if outcome.is_large => {
                self.events
                    .append(
                        task.session_id,
                        sandboxd_event_log::EventType::UserMessage,
                        serde_json::json!({
                            "is_large": true,
                            "size_display": outcome.size_display,
                            "size_bytes": outcome.size_bytes,
                        }),
                    )
                    .await
                    .ok();
                task.task = outcome.processed_text;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %task.session_id, error = %e, "failed to redirect large task input");
            }
        }
        task
    }
}

/// Scans for a `question_pending` with no matching `question_answered`,
/// returning the most recently pending one.
fn last_unanswered_question_id(history: &[sandboxd_protocol::Event]) -> Option<String> {
    let mut pending: Option<String> = None;
    for event in history {
        if event.event_type == "question_pending" {
            pending = event.data.get("question_id").and_then(|v| v.as_str()).map(String::from);
        } else if event.event_type == "question_answered" {
            if event.data.get("question_id").and_then(|v| v.as_str()) == pending.as_deref() {
                pending = None;
            }
        }
    }
    pending
}

impl<St, Qu, Pf, Sp> sandboxd_queue::TaskHandler for OrchestratorTaskHandler<St, Qu, Pf, Sp>
where
    St: SessionStore + 'static,
    Qu: QueueStore + 'static,
    Pf: PumpFactory + 'static,
    Sp: SessionPreparer + 'static,
{
    async fn start_task(&self, task: QueuedTask) -> Result<(), String> {
        self.run_in_background(task).await
    }

    async fn emit_queue_event(&self, session_id: Uuid, event_type: &str, data: serde_json::Value) {
        if let Err(e) = self.events.append(session_id, event_type, data).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to emit queue event");
        }
    }

    async fn mark_session_failed(&self, session_id: Uuid, reason: &str) {
        if let Some(mut session) = self.sessions.get(session_id).await {
            session.status = SessionStatus::Failed;
            session.updated_at = chrono::Utc::now();
            session.completed_at = Some(chrono::Utc::now());
            let _ = self.sessions.update(session).await;
        }
        tracing::warn!(session_id = %session_id, reason, "session marked failed by queue processor");
    }
}
