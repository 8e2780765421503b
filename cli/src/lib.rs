//! The `sandboxd` binary: config loading, the default `SessionPreparer`,
//! and the placeholder `PumpFactory` a real deployment swaps out for a
//! vendor integration.

pub mod app;
pub mod pump;
pub mod session_preparer;
