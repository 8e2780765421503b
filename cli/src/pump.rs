//! Placeholder [`PumpFactory`]: this crate never depends on a model
//! vendor SDK (building one is explicitly out of scope — see the
//! orchestration spec's non-goals), so the shipped factory always refuses
//! to start a task. A real deployment swaps this out for one that opens a
//! stream against its vendor of choice.

use futures::stream::Empty;
use sandboxd_core::PumpFactory;
use sandboxd_protocol::{IncomingMessage, MessagePumpError, QueuedTask};

pub struct UnimplementedPumpFactory;

impl PumpFactory for UnimplementedPumpFactory {
    type Pump = Empty<Result<IncomingMessage, MessagePumpError>>;

    async fn build(&self, task: &QueuedTask) -> Result<Self::Pump, String> {
        let _ = task;
        Err("no model vendor integration is configured for this build".to_string())
    }
}
