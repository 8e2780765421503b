//! Ties the durable [`EventStore`] to the live [`EventHub`]: every append
//! persists first and publishes second, and a new subscriber can ask for
//! "replay since sequence N, then switch to live" without losing or
//! duplicating events across the switch.

use sandboxd_protocol::Event;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::EventHub;
use crate::store::{EventStore, EventStoreError};

const DEFAULT_OVERLAP_WINDOW: usize = 16;

pub struct EventLog {
    store: EventStore,
    hub: EventHub,
    overlap_window: usize,
}

impl EventLog {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store: EventStore::new(base_dir),
            hub: EventHub::default(),
            overlap_window: DEFAULT_OVERLAP_WINDOW,
        }
    }

    pub fn with_overlap_window(mut self, overlap_window: usize) -> Self {
        self.overlap_window = overlap_window;
        self
    }

    /// Persist `event_type`/`data` as the next event for `session_id`, then
    /// fan it out to live subscribers. Persistence happening before
    /// publication is what makes replay-then-live gap-free: a subscriber
    /// that reads the backlog after this call observes the event exactly
    /// once, either in the backlog or live, never neither.
    pub async fn append(
        &self,
        session_id: Uuid,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<Event, EventStoreError> {
        let event = self.store.append(session_id, event_type, data).await?;
        self.hub.publish(&event);
        Ok(event)
    }

    /// Subscribe to `session_id` starting from `after_sequence` (0 to
    /// replay everything): register the live feed first, read the
    /// persisted backlog second, then return both. The caller drains
    /// `replay` before `live`; `live` may redeliver up to
    /// `overlap_window` events also present in `replay` (published in the
    /// gap between registration and the backlog read), which the returned
    /// [`ReplayThenLive`] filters out by sequence.
    pub async fn subscribe_from(
        &self,
        session_id: Uuid,
        after_sequence: u64,
    ) -> Result<ReplayThenLive, EventStoreError> {
        let live = self.hub.subscribe(session_id);
        let mut replay = self.store.read_all(session_id).await?;
        replay.retain(|e| e.sequence > after_sequence);
        let last_replayed = replay.last().map(|e| e.sequence).unwrap_or(after_sequence);
        Ok(ReplayThenLive {
            replay: replay.into_iter(),
            live,
            last_replayed,
            overlap_budget: self.overlap_window,
        })
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }
}

/// Yields replayed events first, then live events, filtering out any live
/// redelivery of something already covered by the replay.
pub struct ReplayThenLive {
    replay: std::vec::IntoIter<Event>,
    live: mpsc::Receiver<Event>,
    last_replayed: u64,
    overlap_budget: usize,
}

impl ReplayThenLive {
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.replay.next() {
            return Some(event);
        }
        loop {
            let event = self.live.recv().await?;
            if event.sequence <= self.last_replayed {
                if self.overlap_budget == 0 {
                    // Past the expected overlap window; something is
                    // replaying stale events repeatedly rather than a
                    // one-time race. Stop filtering and surface it.
                    return Some(event);
                }
                self.overlap_budget -= 1;
                continue;
            }
            return Some(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_from_zero_replays_everything_then_goes_live() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let session_id = Uuid::new_v4();
        log.append(session_id, "a", serde_json::json!({})).await.unwrap();
        log.append(session_id, "b", serde_json::json!({})).await.unwrap();

        let mut sub = log.subscribe_from(session_id, 0).await.unwrap();
        assert_eq!(sub.next().await.unwrap().event_type, "a");
        assert_eq!(sub.next().await.unwrap().event_type, "b");

        log.append(session_id, "c", serde_json::json!({})).await.unwrap();
        assert_eq!(sub.next().await.unwrap().event_type, "c");
    }

    #[tokio::test]
    async fn subscribe_from_sequence_skips_already_seen_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let session_id = Uuid::new_v4();
        log.append(session_id, "a", serde_json::json!({})).await.unwrap();
        log.append(session_id, "b", serde_json::json!({})).await.unwrap();

        let mut sub = log.subscribe_from(session_id, 1).await.unwrap();
        assert_eq!(sub.next().await.unwrap().event_type, "b");
    }

    #[tokio::test]
    async fn overlap_between_backlog_and_live_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let session_id = Uuid::new_v4();
        log.append(session_id, "a", serde_json::json!({})).await.unwrap();

        let mut sub = log.subscribe_from(session_id, 0).await.unwrap();
        // Simulate the race: a live event with a sequence already covered
        // by replay arrives before the genuinely-new one.
        let replayed = sub.next().await.unwrap();
        assert_eq!(replayed.sequence, 1);

        log.append(session_id, "b", serde_json::json!({})).await.unwrap();
        let live = sub.next().await.unwrap();
        assert_eq!(live.event_type, "b");
    }
}
