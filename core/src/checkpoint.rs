//! Checkpoint bookkeeping (spec.md §4.7 step 9). The actual file-tree
//! snapshot/restore is delegated to the external LLM provider SDK — this
//! crate only tracks which checkpoint UUIDs exist, and in what order, so a
//! rewind can truncate the tail from the session's own record.

use chrono::Utc;
use sandboxd_protocol::{Checkpoint, CheckpointKind, Session};
use uuid::Uuid;

/// `uuid` is the checkpoint id the provider attached to the triggering
/// `ToolResult`, not a freshly minted one — it's the handle the provider
/// will later expect back in a rewind request.
pub fn record_auto_checkpoint(
    session: &mut Session,
    uuid: Uuid,
    turn_number: u32,
    tool_name: Option<String>,
    file_path: Option<String>,
) -> Uuid {
    session.checkpoints.push(Checkpoint {
        uuid,
        created_at: Utc::now(),
        kind: CheckpointKind::Auto,
        turn_number,
        tool_name,
        file_path,
        description: None,
    });
    uuid
}

pub fn record_manual_checkpoint(session: &mut Session, turn_number: u32, description: String) -> Uuid {
    let uuid = Uuid::new_v4();
    session.checkpoints.push(Checkpoint {
        uuid,
        created_at: Utc::now(),
        kind: CheckpointKind::Manual,
        turn_number,
        tool_name: None,
        file_path: None,
        description: Some(description),
    });
    uuid
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint {0} on this session")]
    NotFound(Uuid),
}

/// Truncate every checkpoint after `target` from the session's list. The
/// file restore itself happens on the provider side; this keeps the
/// session's bookkeeping in sync with it.
pub fn rewind_to_checkpoint(session: &mut Session, target: Uuid) -> Result<(), CheckpointError> {
    let position = session
        .checkpoints
        .iter()
        .position(|c| c.uuid == target)
        .ok_or(CheckpointError::NotFound(target))?;
    session.checkpoints.truncate(position + 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Uuid::new_v4(), "task", "claude-sonnet")
    }

    #[test]
    fn auto_checkpoint_is_appended() {
        let mut s = session();
        record_auto_checkpoint(&mut s, Uuid::new_v4(), 3, Some("Write".to_string()), Some("main.py".to_string()));
        assert_eq!(s.checkpoints.len(), 1);
        assert_eq!(s.checkpoints[0].kind, CheckpointKind::Auto);
    }

    #[test]
    fn manual_checkpoint_carries_its_description() {
        let mut s = session();
        record_manual_checkpoint(&mut s, 1, "before the risky refactor".to_string());
        assert_eq!(s.checkpoints[0].description.as_deref(), Some("before the risky refactor"));
    }

    #[test]
    fn rewind_truncates_everything_after_the_target() {
        let mut s = session();
        record_auto_checkpoint(&mut s, Uuid::new_v4(), 1, None, None);
        let target = record_auto_checkpoint(&mut s, Uuid::new_v4(), 2, None, None);
        record_auto_checkpoint(&mut s, Uuid::new_v4(), 3, None, None);
        rewind_to_checkpoint(&mut s, target).unwrap();
        assert_eq!(s.checkpoints.len(), 2);
    }

    #[test]
    fn rewind_to_unknown_checkpoint_errors() {
        let mut s = session();
        assert!(rewind_to_checkpoint(&mut s, Uuid::new_v4()).is_err());
    }
}
