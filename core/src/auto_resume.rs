//! Startup recovery and staleness cleanup for sessions left behind by a
//! restart. Two distinct sweeps, not one generalized pass: they compare
//! `updated_at` against the cutoff with opposite operators and cover
//! different status sets, so folding them together would blur a real
//! difference in intent (recover what's recent, give up on what's old).

use chrono::{DateTime, Duration, Utc};
use sandboxd_protocol::{Session, SessionStatus};
use sandboxd_queue::{QueueError, QueueStore};

use crate::store::{SessionStore, SessionStoreError};

pub const PRIORITY_AUTO_RESUME: i64 = 100;
pub const PRIORITY_QUEUED_RECOVERY: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum AutoResumeError {
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryStats {
    pub recovered: u32,
    pub failed_no_resume_id: u32,
    pub failed_attempts_exhausted: u32,
}

pub struct AutoResumeService<S, Q> {
    sessions: S,
    queue: Q,
    max_resume_attempts: u32,
}

impl<S, Q> AutoResumeService<S, Q>
where
    S: SessionStore,
    Q: QueueStore,
{
    pub fn new(sessions: S, queue: Q, max_resume_attempts: u32) -> Self {
        Self {
            sessions,
            queue,
            max_resume_attempts,
        }
    }

    /// Re-queue sessions that were `running` or `queued` when the process
    /// last stopped, provided they're recent enough (`updated_at >=
    /// now - max_age`) and eligible to resume.
    pub async fn recover_on_startup(&self, max_age: Duration) -> Result<RecoveryStats, AutoResumeError> {
        let cutoff = Utc::now() - max_age;
        let candidates = self
            .sessions
            .find_by_status(
                &[SessionStatus::Running, SessionStatus::Queued],
                cutoff,
                |updated_at, cutoff| updated_at >= cutoff,
            )
            .await;

        let mut stats = RecoveryStats::default();
        for mut session in candidates {
            if session.resume_attempts >= self.max_resume_attempts {
                self.fail(&mut session, "resume attempts exhausted").await?;
                stats.failed_attempts_exhausted += 1;
                continue;
            }

            let has_resume_id = session.external_resume_id.is_some();
            if session.status == SessionStatus::Running && !has_resume_id {
                self.fail(&mut session, "running session has no resume id to recover from").await?;
                stats.failed_no_resume_id += 1;
                continue;
            }

            let priority = if session.status == SessionStatus::Running {
                PRIORITY_AUTO_RESUME
            } else {
                PRIORITY_QUEUED_RECOVERY
            };
            let mut task = sandboxd_protocol::QueuedTask::new(session.id, session.user_id, &session.task_text, priority);
            task.is_auto_resume = true;
            task.resume_from = has_resume_id.then(|| session.id.to_string());
            self.queue.enqueue(task).await?;

            session.status = SessionStatus::Queued;
            session.resume_attempts += 1;
            session.updated_at = Utc::now();
            self.sessions.update(session).await?;
            stats.recovered += 1;
        }
        Ok(stats)
    }

    /// Mark anything still `pending`, `queued`, or `running` and untouched
    /// since before `cutoff` as failed. Distinct from `recover_on_startup`:
    /// this runs continuously (not just at boot) to reap sessions that
    /// recovery itself can't resurrect.
    pub async fn cleanup_old_sessions(&self, max_age: Duration) -> Result<u32, AutoResumeError> {
        let cutoff = Utc::now() - max_age;
        let stale = self
            .sessions
            .find_by_status(
                &[SessionStatus::Pending, SessionStatus::Queued, SessionStatus::Running],
                cutoff,
                |updated_at, cutoff| updated_at < cutoff,
            )
            .await;
        let count = stale.len() as u32;
        for mut session in stale {
            self.fail(&mut session, "session stale beyond cleanup cutoff").await?;
        }
        Ok(count)
    }

    async fn fail(&self, session: &mut Session, reason: &str) -> Result<(), AutoResumeError> {
        tracing::warn!(session_id = %session.id, reason, "auto-resume marking session failed");
        session.status = SessionStatus::Failed;
        session.updated_at = Utc::now();
        session.completed_at = Some(Utc::now());
        self.sessions.update(session.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use sandboxd_queue::InMemoryQueueStore;
    use uuid::Uuid;

    fn service() -> AutoResumeService<InMemorySessionStore, InMemoryQueueStore> {
        AutoResumeService::new(InMemorySessionStore::default(), InMemoryQueueStore::default(), 3)
    }

    async fn seed(service: &AutoResumeService<InMemorySessionStore, InMemoryQueueStore>, session: Session) {
        service.sessions.insert(session).await;
    }

    #[tokio::test]
    async fn running_session_with_resume_id_is_recovered_at_high_priority() {
        let svc = service();
        let mut s = Session::new(Uuid::new_v4(), "continue work", "claude-sonnet");
        s.status = SessionStatus::Running;
        s.external_resume_id = Some("claude-session-abc".to_string());
        let session_id = s.id;
        seed(&svc, s).await;

        let stats = svc.recover_on_startup(Duration::hours(1)).await.unwrap();

        assert_eq!(stats.recovered, 1);
        let recovered = svc.sessions.get(session_id).await.unwrap();
        assert_eq!(recovered.status, SessionStatus::Queued);
        assert_eq!(recovered.resume_attempts, 1);
    }

    #[tokio::test]
    async fn running_session_without_resume_id_is_failed_not_recovered() {
        let svc = service();
        let mut s = Session::new(Uuid::new_v4(), "continue work", "claude-sonnet");
        s.status = SessionStatus::Running;
        let session_id = s.id;
        seed(&svc, s).await;

        let stats = svc.recover_on_startup(Duration::hours(1)).await.unwrap();

        assert_eq!(stats.failed_no_resume_id, 1);
        assert_eq!(stats.recovered, 0);
        assert_eq!(svc.sessions.get(session_id).await.unwrap().status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn queued_session_is_recovered_at_low_priority_without_resume_id() {
        let svc = service();
        let mut s = Session::new(Uuid::new_v4(), "still queued", "claude-sonnet");
        s.status = SessionStatus::Queued;
        seed(&svc, s).await;

        let stats = svc.recover_on_startup(Duration::hours(1)).await.unwrap();
        assert_eq!(stats.recovered, 1);
    }

    #[tokio::test]
    async fn exhausted_resume_attempts_are_failed() {
        let svc = service();
        let mut s = Session::new(Uuid::new_v4(), "stuck", "claude-sonnet");
        s.status = SessionStatus::Running;
        s.external_resume_id = Some("resume-id".to_string());
        s.resume_attempts = 3;
        let session_id = s.id;
        seed(&svc, s).await;

        let stats = svc.recover_on_startup(Duration::hours(1)).await.unwrap();
        assert_eq!(stats.failed_attempts_exhausted, 1);
        assert_eq!(svc.sessions.get(session_id).await.unwrap().status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn stale_session_outside_recovery_window_is_untouched_by_recovery() {
        let svc = service();
        let mut s = Session::new(Uuid::new_v4(), "ancient", "claude-sonnet");
        s.status = SessionStatus::Running;
        s.external_resume_id = Some("id".to_string());
        s.updated_at = Utc::now() - Duration::days(1);
        let session_id = s.id;
        seed(&svc, s).await;

        let stats = svc.recover_on_startup(Duration::hours(1)).await.unwrap();
        assert_eq!(stats.recovered, 0);
        assert_eq!(svc.sessions.get(session_id).await.unwrap().status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn cleanup_fails_sessions_strictly_older_than_cutoff_including_pending() {
        let svc = service();
        let mut pending = Session::new(Uuid::new_v4(), "never started", "claude-sonnet");
        pending.status = SessionStatus::Pending;
        pending.updated_at = Utc::now() - Duration::days(2);
        let pending_id = pending.id;

        let mut fresh = Session::new(Uuid::new_v4(), "just updated", "claude-sonnet");
        fresh.status = SessionStatus::Running;
        seed(&svc, pending).await;
        seed(&svc, fresh.clone()).await;

        let cleaned = svc.cleanup_old_sessions(Duration::hours(1)).await.unwrap();

        assert_eq!(cleaned, 1);
        assert_eq!(svc.sessions.get(pending_id).await.unwrap().status, SessionStatus::Failed);
        assert_eq!(svc.sessions.get(fresh.id).await.unwrap().status, SessionStatus::Running);
    }
}
