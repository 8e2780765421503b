use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session {0} not found")]
    SessionNotFound(uuid::Uuid),
    #[error("session {0} already has an active run")]
    AlreadyRunning(uuid::Uuid),
    #[error(transparent)]
    Permission(#[from] sandboxd_permissions::PermissionError),
    #[error(transparent)]
    SandboxMount(#[from] sandboxd_sandbox::SandboxMountError),
    #[error(transparent)]
    SandboxExec(#[from] sandboxd_sandbox::SandboxExecError),
    #[error(transparent)]
    EventStore(#[from] sandboxd_event_log::EventStoreError),
    #[error(transparent)]
    Queue(#[from] sandboxd_queue::QueueError),
    #[error(transparent)]
    PathValidation(#[from] sandboxd_path_resolver::ValidationError),
    #[error("message pump ended in error: {0}")]
    MessagePump(String),
    #[error(transparent)]
    SessionStore(#[from] crate::store::SessionStoreError),
}
