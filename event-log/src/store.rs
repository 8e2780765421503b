//! Per-session append-only event store. One background task owns the
//! session's JSONL file and assigns sequence numbers, mirroring the
//! rollout recorder's "a task owns the file, callers talk to it over a
//! channel" shape: callers never perform blocking I/O themselves, and a
//! write failure is reported to that one caller rather than poisoning the
//! whole process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sandboxd_protocol::Event;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("failed to create session log directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("failed to open session log file: {0}")]
    OpenFile(#[source] std::io::Error),
    #[error("failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("session event writer is no longer running")]
    WriterGone,
    #[error("failed to read session log file: {0}")]
    ReadFile(#[source] std::io::Error),
    #[error("failed to parse persisted event: {0}")]
    Parse(#[source] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct PersistedLine {
    event_type: String,
    data: serde_json::Value,
    timestamp: chrono::DateTime<chrono::Utc>,
}

struct AppendRequest {
    event_type: String,
    data: serde_json::Value,
    reply: oneshot::Sender<Result<Event, EventStoreError>>,
}

#[derive(Clone)]
struct SessionWriter {
    tx: mpsc::Sender<AppendRequest>,
}

impl SessionWriter {
    async fn spawn(session_id: Uuid, path: PathBuf, resume_from: u64) -> Result<Self, EventStoreError> {
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(EventStoreError::OpenFile)?;

        let (tx, mut rx) = mpsc::channel::<AppendRequest>(256);

        tokio::task::spawn(async move {
            let mut file = file;
            let mut next_sequence = resume_from + 1;
            while let Some(req) = rx.recv().await {
                let event = Event::new(session_id, next_sequence, req.event_type, req.data);
                let line = PersistedLine {
                    event_type: event.event_type.clone(),
                    data: event.data.clone(),
                    timestamp: event.timestamp,
                };
                let result = async {
                    let json = serde_json::to_string(&line).map_err(EventStoreError::Serialize)?;
                    file.write_all(json.as_bytes()).await.map_err(EventStoreError::OpenFile)?;
                    file.write_all(b"\n").await.map_err(EventStoreError::OpenFile)?;
                    file.flush().await.map_err(EventStoreError::OpenFile)?;
                    Ok(event.clone())
                }
                .await;
                let failed = result.is_err();
                let _ = req.reply.send(result);
                if failed {
                    tracing::warn!(session_id = %session_id, "session event writer stopping after write failure");
                    break;
                }
                next_sequence += 1;
            }
        });

        Ok(Self { tx })
    }

    async fn append(&self, event_type: String, data: serde_json::Value) -> Result<Event, EventStoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AppendRequest { event_type, data, reply })
            .await
            .map_err(|_| EventStoreError::WriterGone)?;
        rx.await.map_err(|_| EventStoreError::WriterGone)?
    }
}

/// Owns one background writer per session with an event log on disk.
pub struct EventStore {
    base_dir: PathBuf,
    writers: Mutex<HashMap<Uuid, SessionWriter>>,
}

impl EventStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn session_path(&self, session_id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Read back every persisted event for a session in sequence order.
    /// Used both for replay and to recover the last-assigned sequence
    /// number when a writer is (re)spawned after a restart.
    pub async fn read_all(&self, session_id: Uuid) -> Result<Vec<Event>, EventStoreError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = tokio::fs::File::open(&path).await.map_err(EventStoreError::ReadFile)?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut events = Vec::new();
        let mut sequence = 0u64;
        while let Some(line) = lines.next_line().await.map_err(EventStoreError::ReadFile)? {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: PersistedLine = serde_json::from_str(&line).map_err(EventStoreError::Parse)?;
            sequence += 1;
            events.push(Event {
                session_id,
                sequence,
                event_type: parsed.event_type,
                data: parsed.data,
                timestamp: parsed.timestamp,
            });
        }
        Ok(events)
    }

    async fn writer_for(&self, session_id: Uuid) -> Result<SessionWriter, EventStoreError> {
        if let Some(w) = self.writers.lock().expect("writers lock poisoned").get(&session_id) {
            return Ok(w.clone());
        }
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(EventStoreError::CreateDir)?;
        let resume_from = self.read_all(session_id).await?.last().map(|e| e.sequence).unwrap_or(0);
        let writer = SessionWriter::spawn(session_id, self.session_path(session_id), resume_from).await?;
        self.writers
            .lock()
            .expect("writers lock poisoned")
            .insert(session_id, writer.clone());
        Ok(writer)
    }

    /// Assign the next sequence number and durably append the event. The
    /// returned [`Event`] carries its assigned sequence; callers publish it
    /// to subscribers only after this call succeeds (persist-then-publish).
    pub async fn append(
        &self,
        session_id: Uuid,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<Event, EventStoreError> {
        let writer = self.writer_for(session_id).await?;
        writer.append(event_type.into(), data).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_events_get_gapless_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let session_id = Uuid::new_v4();
        let a = store.append(session_id, "start", serde_json::json!({})).await.unwrap();
        let b = store.append(session_id, "tick", serde_json::json!({})).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
    }

    #[tokio::test]
    async fn read_all_round_trips_persisted_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let session_id = Uuid::new_v4();
        store.append(session_id, "start", serde_json::json!({"a": 1})).await.unwrap();
        store.append(session_id, "end", serde_json::json!({"b": 2})).await.unwrap();
        let events = store.read_all(session_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].event_type, "end");
    }

    #[tokio::test]
    async fn writer_resumes_sequence_after_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();
        {
            let store = EventStore::new(dir.path());
            store.append(session_id, "first", serde_json::json!({})).await.unwrap();
        }
        let store = EventStore::new(dir.path());
        let event = store.append(session_id, "second", serde_json::json!({})).await.unwrap();
        assert_eq!(event.sequence, 2);
    }
}
