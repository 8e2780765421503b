//! Durable-ish session bookkeeping. No database crate lives in this
//! workspace's dependency stack, so `SessionStore` plays the same role
//! `queue::QueueStore` plays for the task queue: a trait describing the
//! queries the orchestrator and auto-resume sweep actually issue, with an
//! in-process default implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sandboxd_protocol::{Session, SessionStatus};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session {0} not found")]
    NotFound(Uuid),
}

/// Methods return `impl Future + Send` rather than `async fn` sugar so the
/// orchestrator can `tokio::spawn` work that awaits them, mirroring
/// `sandboxd_queue::QueueStore`.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> impl Future<Output = ()> + Send;
    fn get(&self, session_id: Uuid) -> impl Future<Output = Option<Session>> + Send;
    fn update(&self, session: Session) -> impl Future<Output = Result<(), SessionStoreError>> + Send;
    /// Sessions whose `status` is in `statuses` and `updated_at` compares
    /// against `cutoff` per `cmp` (`true` keeps the session).
    fn find_by_status(
        &self,
        statuses: &[SessionStatus],
        cutoff: DateTime<Utc>,
        keep_if: fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> impl Future<Output = Vec<Session>> + Send;
}

/// Lets an `Arc<impl SessionStore>` be shared between collaborators (e.g.
/// the auto-resume sweep and the task handler) that each need their own
/// owned `S: SessionStore` type parameter over the same backing store.
impl<T: SessionStore + ?Sized> SessionStore for std::sync::Arc<T> {
    fn insert(&self, session: Session) -> impl Future<Output = ()> + Send {
        (**self).insert(session)
    }

    fn get(&self, session_id: Uuid) -> impl Future<Output = Option<Session>> + Send {
        (**self).get(session_id)
    }

    fn update(&self, session: Session) -> impl Future<Output = Result<(), SessionStoreError>> + Send {
        (**self).update(session)
    }

    fn find_by_status(
        &self,
        statuses: &[SessionStatus],
        cutoff: DateTime<Utc>,
        keep_if: fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> impl Future<Output = Vec<Session>> + Send {
        (**self).find_by_status(statuses, cutoff, keep_if)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) {
        self.sessions.lock().expect("session store lock poisoned").insert(session.id, session);
    }

    async fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.lock().expect("session store lock poisoned").get(&session_id).cloned()
    }

    async fn update(&self, session: Session) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let slot = sessions.get_mut(&session.id).ok_or(SessionStoreError::NotFound(session.id))?;
        *slot = session;
        Ok(())
    }

    async fn find_by_status(
        &self,
        statuses: &[SessionStatus],
        cutoff: DateTime<Utc>,
        keep_if: fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> Vec<Session> {
        let sessions = self.sessions.lock().expect("session store lock poisoned");
        let mut matched: Vec<Session> = sessions
            .values()
            .filter(|s| statuses.contains(&s.status) && keep_if(s.updated_at, cutoff))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.updated_at);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(status: SessionStatus, updated_at: DateTime<Utc>) -> Session {
        let mut s = Session::new(Uuid::new_v4(), "do work", "claude-sonnet");
        s.status = status;
        s.updated_at = updated_at;
        s
    }

    #[tokio::test]
    async fn update_unknown_session_fails() {
        let store = InMemorySessionStore::default();
        let err = store.update(Session::new(Uuid::new_v4(), "x", "m")).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn find_by_status_filters_on_status_and_cutoff() {
        let store = InMemorySessionStore::default();
        let now = Utc::now();
        let fresh_running = session(SessionStatus::Running, now);
        let stale_running = session(SessionStatus::Running, now - chrono::Duration::hours(2));
        let complete = session(SessionStatus::Complete, now - chrono::Duration::hours(2));
        store.insert(fresh_running.clone()).await;
        store.insert(stale_running.clone()).await;
        store.insert(complete).await;

        let cutoff = now - chrono::Duration::hours(1);
        let matches = store
            .find_by_status(&[SessionStatus::Running], cutoff, |updated_at, cutoff| updated_at >= cutoff)
            .await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, fresh_running.id);

        let stale_matches = store
            .find_by_status(&[SessionStatus::Running], cutoff, |updated_at, cutoff| updated_at < cutoff)
            .await;
        assert_eq!(stale_matches.len(), 1);
        assert_eq!(stale_matches[0].id, stale_running.id);
    }
}
