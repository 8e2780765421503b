//! Per-run session state: the bundle of collaborators one agent run needs
//! (permission engine, sandbox executor, cancellation handle, workspace
//! path), registered by session id rather than held in an ambient global —
//! the same `configure`/`get`/`cleanup` shape `path-resolver` uses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use sandboxd_permissions::PermissionEngine;
use sandboxd_sandbox::SandboxExecutor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Whether the run is waiting on a human answer via `AskUserQuestion`, and
/// which question it's waiting on. The orchestrator treats a session with
/// `Some(question_id)` as `SessionStatus::WaitingForInput`.
#[derive(Debug, Clone, Default)]
pub struct PendingQuestion {
    pub question_id: Option<String>,
}

/// Everything one in-flight run needs, owned by the session registry for
/// the run's lifetime and dropped once it completes.
pub struct SessionContext {
    pub session_id: Uuid,
    pub workspace_path: String,
    pub permissions: Mutex<PermissionEngine>,
    pub sandbox: SandboxExecutor,
    pub cancellation: CancellationToken,
    pub pending_question: Mutex<PendingQuestion>,
}

impl SessionContext {
    pub fn new(
        session_id: Uuid,
        workspace_path: impl Into<String>,
        permissions: PermissionEngine,
        sandbox: SandboxExecutor,
    ) -> Self {
        Self {
            session_id,
            workspace_path: workspace_path.into(),
            permissions: Mutex::new(permissions),
            sandbox,
            cancellation: CancellationToken::new(),
            pending_question: Mutex::new(PendingQuestion::default()),
        }
    }

    pub fn request_cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn set_pending_question(&self, question_id: Option<String>) {
        self.pending_question.lock().expect("pending question lock poisoned").question_id = question_id;
    }

    pub fn pending_question_id(&self) -> Option<String> {
        self.pending_question
            .lock()
            .expect("pending question lock poisoned")
            .question_id
            .clone()
    }
}

/// Registry of active `SessionContext`s, keyed by session id. A session is
/// registered when its run starts and removed once the run (success,
/// failure, or cancellation) finishes — never left behind as a leak.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<SessionContext>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctx: Arc<SessionContext>) -> Result<(), crate::error::OrchestratorError> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        if sessions.contains_key(&ctx.session_id) {
            return Err(crate::error::OrchestratorError::AlreadyRunning(ctx.session_id));
        }
        sessions.insert(ctx.session_id, ctx);
        Ok(())
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<SessionContext>> {
        self.sessions.lock().expect("session registry lock poisoned").get(&session_id).cloned()
    }

    pub fn cleanup(&self, session_id: Uuid) {
        self.sessions.lock().expect("session registry lock poisoned").remove(&session_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().expect("session registry lock poisoned").len()
    }
}
