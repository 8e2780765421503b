//! Orchestration core: ties the permission engine, sandbox executor, event
//! log, and task queue into the per-session run loop, plus the startup
//! recovery sweep that re-queues sessions interrupted by a restart.

pub mod auto_resume;
pub mod checkpoint;
pub mod error;
pub mod handler;
pub mod large_input;
pub mod orchestrator;
pub mod resume_context;
pub mod session;
pub mod store;
pub mod tool_dispatch;

pub use auto_resume::{AutoResumeError, AutoResumeService, RecoveryStats, PRIORITY_AUTO_RESUME, PRIORITY_QUEUED_RECOVERY};
pub use checkpoint::{record_auto_checkpoint, record_manual_checkpoint, rewind_to_checkpoint, CheckpointError};
pub use error::{OrchestratorError, Result};
pub use handler::{HandlerConfig, OrchestratorTaskHandler, PumpFactory, SessionPreparer};
pub use large_input::{process_large_user_input, LargeInputOutcome};
pub use orchestrator::{apply_outcome, RunOutcome, SessionOrchestrator};
pub use resume_context::build_resume_context;
pub use session::{PendingQuestion, SessionContext, SessionRegistry};
pub use store::{InMemorySessionStore, SessionStore, SessionStoreError};
pub use tool_dispatch::{execute_tool, ToolExecution};
