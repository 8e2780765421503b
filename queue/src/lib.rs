//! Priority task queue, quota gating, and the background processor that
//! drains the queue once quotas allow a session to start.

mod processor;
mod quota;
mod store;

pub use processor::{QueueProcessor, QueueProcessorConfig, TaskHandler, RESUME_CONTEXT_PREFIX};
pub use quota::{QuotaConfig, QuotaDenial, QuotaManager};
pub use store::{InMemoryQueueStore, QueueError, QueueStore};
