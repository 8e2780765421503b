//! Priority queue behind a trait, with an in-process sorted-set
//! implementation as the only backend for now. `score = timestamp −
//! priority·1_000_000` (lower dequeues first) mirrors a Redis
//! `ZADD`/`ZPOPMIN` sorted set one-for-one, so swapping in a real Redis
//! (or other shared) backend later only means a new impl of this trait.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;

use sandboxd_protocol::QueuedTask;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is full ({current}/{max} tasks)")]
    Overflow { current: usize, max: usize },
    #[error("queue store is unavailable: {0}")]
    Unavailable(String),
}

/// A store for the pending-task priority queue plus the per-user active-
/// session bookkeeping the quota manager consults. Methods return
/// `impl Future + Send` rather than using `async fn` sugar directly, so
/// callers can `tokio::spawn` work that awaits them — not part of the
/// adopted dependency stack, and every caller is generic over a concrete
/// store rather than needing `dyn QueueStore`.
pub trait QueueStore: Send + Sync {
    fn enqueue(&self, task: QueuedTask) -> impl Future<Output = Result<u64, QueueError>> + Send;
    fn dequeue(&self) -> impl Future<Output = Result<Option<QueuedTask>, QueueError>> + Send;
    fn peek(&self) -> impl Future<Output = Result<Option<QueuedTask>, QueueError>> + Send;
    fn position(&self, session_id: Uuid) -> impl Future<Output = Result<Option<u64>, QueueError>> + Send;
    fn len(&self) -> impl Future<Output = Result<usize, QueueError>> + Send;
    fn remove(&self, session_id: Uuid) -> impl Future<Output = Result<bool, QueueError>> + Send;
    /// Queued sessions in dequeue order, capped at `limit`.
    fn queued_sessions(&self, limit: usize) -> impl Future<Output = Result<Vec<Uuid>, QueueError>> + Send;
    /// Every currently-queued task, in dequeue order, with no limit —
    /// used by the timeout reaper, which needs each task's `queued_at`.
    fn snapshot(&self) -> impl Future<Output = Result<Vec<QueuedTask>, QueueError>> + Send;

    fn mark_user_active(&self, user_id: Uuid, session_id: Uuid) -> impl Future<Output = Result<(), QueueError>> + Send;
    fn mark_user_inactive(&self, user_id: Uuid, session_id: Uuid) -> impl Future<Output = Result<(), QueueError>> + Send;
    fn user_active_count(&self, user_id: Uuid) -> impl Future<Output = Result<usize, QueueError>> + Send;
    fn clear_user_active(&self, user_id: Uuid) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// Backing-store reachability check, surfaced by the process health
    /// endpoint. The in-process store has nothing to ping, so it's
    /// trivially `Ok`; a future shared-store backend (Redis or otherwise)
    /// gives this a real round trip.
    fn health_check(&self) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// Lets an `Arc<impl QueueStore>` be shared between collaborators (e.g. the
/// auto-resume sweep and the queue processor) that each need their own
/// owned `S: QueueStore` type parameter over the same backing store.
impl<T: QueueStore + ?Sized> QueueStore for std::sync::Arc<T> {
    fn enqueue(&self, task: QueuedTask) -> impl Future<Output = Result<u64, QueueError>> + Send {
        (**self).enqueue(task)
    }
    fn dequeue(&self) -> impl Future<Output = Result<Option<QueuedTask>, QueueError>> + Send {
        (**self).dequeue()
    }
    fn peek(&self) -> impl Future<Output = Result<Option<QueuedTask>, QueueError>> + Send {
        (**self).peek()
    }
    fn position(&self, session_id: Uuid) -> impl Future<Output = Result<Option<u64>, QueueError>> + Send {
        (**self).position(session_id)
    }
    fn len(&self) -> impl Future<Output = Result<usize, QueueError>> + Send {
        (**self).len()
    }
    fn remove(&self, session_id: Uuid) -> impl Future<Output = Result<bool, QueueError>> + Send {
        (**self).remove(session_id)
    }
    fn queued_sessions(&self, limit: usize) -> impl Future<Output = Result<Vec<Uuid>, QueueError>> + Send {
        (**self).queued_sessions(limit)
    }
    fn snapshot(&self) -> impl Future<Output = Result<Vec<QueuedTask>, QueueError>> + Send {
        (**self).snapshot()
    }
    fn mark_user_active(&self, user_id: Uuid, session_id: Uuid) -> impl Future<Output = Result<(), QueueError>> + Send {
        (**self).mark_user_active(user_id, session_id)
    }
    fn mark_user_inactive(&self, user_id: Uuid, session_id: Uuid) -> impl Future<Output = Result<(), QueueError>> + Send {
        (**self).mark_user_inactive(user_id, session_id)
    }
    fn user_active_count(&self, user_id: Uuid) -> impl Future<Output = Result<usize, QueueError>> + Send {
        (**self).user_active_count(user_id)
    }
    fn clear_user_active(&self, user_id: Uuid) -> impl Future<Output = Result<usize, QueueError>> + Send {
        (**self).clear_user_active(user_id)
    }
    fn health_check(&self) -> impl Future<Output = Result<(), QueueError>> + Send {
        (**self).health_check()
    }
}

struct Inner {
    // (score, session_id) — session_id as tiebreaker keeps BTreeSet total-ordered
    // without needing a separate insertion counter.
    order: BTreeSet<(i64, Uuid)>,
    tasks: HashMap<Uuid, QueuedTask>,
    user_active: HashMap<Uuid, HashSet<Uuid>>,
}

pub struct InMemoryQueueStore {
    max_queue_size: usize,
    inner: Mutex<Inner>,
}

impl InMemoryQueueStore {
    /// `max_queue_size == 0` means unlimited, matching the original's
    /// `max_queue_size` semantics.
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            inner: Mutex::new(Inner {
                order: BTreeSet::new(),
                tasks: HashMap::new(),
                user_active: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("queue store lock poisoned")
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, task: QueuedTask) -> Result<u64, QueueError> {
        let mut inner = self.lock();
        if self.max_queue_size > 0 && inner.order.len() >= self.max_queue_size {
            return Err(QueueError::Overflow {
                current: inner.order.len(),
                max: self.max_queue_size,
            });
        }
        let key = (task.score(), task.session_id);
        inner.order.insert(key);
        inner.tasks.insert(task.session_id, task);
        let position = inner.order.iter().position(|k| *k == key).unwrap_or(0) + 1;
        Ok(position as u64)
    }

    async fn dequeue(&self) -> Result<Option<QueuedTask>, QueueError> {
        let mut inner = self.lock();
        let Some(&key) = inner.order.iter().next() else {
            return Ok(None);
        };
        inner.order.remove(&key);
        Ok(inner.tasks.remove(&key.1))
    }

    async fn peek(&self) -> Result<Option<QueuedTask>, QueueError> {
        let inner = self.lock();
        let Some(&(_, session_id)) = inner.order.iter().next() else {
            return Ok(None);
        };
        Ok(inner.tasks.get(&session_id).cloned())
    }

    async fn position(&self, session_id: Uuid) -> Result<Option<u64>, QueueError> {
        let inner = self.lock();
        let Some(task) = inner.tasks.get(&session_id) else {
            return Ok(None);
        };
        let key = (task.score(), session_id);
        Ok(inner.order.iter().position(|k| *k == key).map(|i| i as u64 + 1))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock().order.len())
    }

    async fn remove(&self, session_id: Uuid) -> Result<bool, QueueError> {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.remove(&session_id) else {
            return Ok(false);
        };
        Ok(inner.order.remove(&(task.score(), session_id)))
    }

    async fn queued_sessions(&self, limit: usize) -> Result<Vec<Uuid>, QueueError> {
        Ok(self.lock().order.iter().take(limit).map(|(_, id)| *id).collect())
    }

    async fn snapshot(&self) -> Result<Vec<QueuedTask>, QueueError> {
        let inner = self.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|(_, id)| inner.tasks.get(id).cloned())
            .collect())
    }

    async fn mark_user_active(&self, user_id: Uuid, session_id: Uuid) -> Result<(), QueueError> {
        self.lock().user_active.entry(user_id).or_default().insert(session_id);
        Ok(())
    }

    async fn mark_user_inactive(&self, user_id: Uuid, session_id: Uuid) -> Result<(), QueueError> {
        if let Some(set) = self.lock().user_active.get_mut(&user_id) {
            set.remove(&session_id);
        }
        Ok(())
    }

    async fn user_active_count(&self, user_id: Uuid) -> Result<usize, QueueError> {
        Ok(self.lock().user_active.get(&user_id).map(HashSet::len).unwrap_or(0))
    }

    async fn clear_user_active(&self, user_id: Uuid) -> Result<usize, QueueError> {
        Ok(self.lock().user_active.remove(&user_id).map(|s| s.len()).unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        // Lock acquisition doubles as the reachability probe: a poisoned
        // mutex surfaces as a panic elsewhere, never silently here.
        drop(self.lock());
        Ok(())
    }
}
