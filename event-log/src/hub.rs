//! Bounded-queue pub/sub fan-out over a session's live event stream. A
//! slow or disconnected subscriber is dropped rather than allowed to
//! apply backpressure to the writer or to other subscribers.

use std::collections::HashMap;
use std::sync::Mutex;

use sandboxd_protocol::Event;
use tokio::sync::mpsc;
use uuid::Uuid;

const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

pub struct EventHub {
    subscriber_buffer: usize,
    subscribers: Mutex<HashMap<Uuid, Vec<mpsc::Sender<Event>>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventHub {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            subscriber_buffer,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new live subscriber for `session_id`. Register this
    /// *before* reading any replay backlog so no event published in
    /// between is missed.
    pub fn subscribe(&self, session_id: Uuid) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .entry(session_id)
            .or_default()
            .push(tx);
        rx
    }

    /// Fan a persisted event out to every live subscriber of its session.
    /// Never blocks: a subscriber whose buffer is full or whose receiver
    /// has dropped is removed instead of being waited on.
    pub fn publish(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock().expect("subscribers lock poisoned");
        let Some(list) = subscribers.get_mut(&event.session_id) else {
            return;
        };
        list.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %event.session_id, "dropping slow event subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            subscribers.remove(&event.session_id);
        }
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .get(&session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
