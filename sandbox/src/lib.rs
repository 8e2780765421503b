//! Assembles and runs an isolator-wrapped command (conceptually
//! `<isolator> <flags> -- <user-command>`) from a resolved
//! [`sandboxd_protocol::SandboxConfig`], and executes it with output
//! capping and a hard timeout.

mod command;
mod exec;

pub use command::{build_isolator_command, wrap_shell_command, SandboxMountError};
pub use exec::{execute_sandboxed_command, SandboxExecError, SandboxExecutor};
