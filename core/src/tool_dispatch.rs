//! Executes a tool call for real (spec.md §4.7 step 6): `Bash` routes
//! through the sandbox envelope, filesystem tools route through the path
//! validator. Previously the orchestrator only consulted the permission
//! engine and never ran anything — this is the missing dispatch step
//! between "permission engine approved" and "tool_complete is emitted".

use std::time::Duration;

use sandboxd_path_resolver::{Operation, PathResolver, ValidationError};
use sandboxd_sandbox::execute_sandboxed_command;

use crate::session::SessionContext;

/// Wall-clock bound for one sandboxed `Bash` call. Tool calls don't carry
/// their own timeout in the current protocol, so a single generous
/// constant is used rather than plumbing a per-tool value through.
const TOOL_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

const PATH_TOOLS: &[(&str, Operation)] = &[
    ("Read", Operation::Read),
    ("Write", Operation::Write),
    ("Edit", Operation::Edit),
    ("MultiEdit", Operation::Edit),
    ("Glob", Operation::Glob),
    ("Grep", Operation::Grep),
    ("LS", Operation::List),
];

/// Outcome of running one tool call, independent of how the caller turns
/// it into a `tool_complete` event.
pub struct ToolExecution {
    pub output: serde_json::Value,
    pub is_error: bool,
}

impl ToolExecution {
    fn ok(output: serde_json::Value) -> Self {
        Self { output, is_error: false }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            output: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

/// Run `tool_name` for real. `WebFetch` and `AskUserQuestion` carry neither
/// a shell command nor a filesystem path, so they pass through as no-ops
/// here — the orchestrator already handles `AskUserQuestion` separately,
/// and `WebFetch` has no sandbox/path-validator surface to route through.
pub async fn execute_tool(
    ctx: &SessionContext,
    paths: &PathResolver,
    tool_name: &str,
    tool_input: &serde_json::Value,
) -> ToolExecution {
    if tool_name == "Bash" {
        return execute_bash(ctx, tool_input).await;
    }
    if let Some((_, operation)) = PATH_TOOLS.iter().find(|(name, _)| *name == tool_name) {
        return validate_path_tool(paths, ctx.session_id, tool_input, *operation);
    }
    ToolExecution::ok(serde_json::Value::Null)
}

async fn execute_bash(ctx: &SessionContext, tool_input: &serde_json::Value) -> ToolExecution {
    let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) else {
        return ToolExecution::error("Bash tool call missing a \"command\" string");
    };
    match execute_sandboxed_command(&ctx.sandbox, command, false, TOOL_EXEC_TIMEOUT).await {
        Ok((exit_code, stdout, stderr)) => ToolExecution {
            output: serde_json::json!({ "exit_code": exit_code, "stdout": stdout, "stderr": stderr }),
            is_error: exit_code != 0,
        },
        Err(e) => ToolExecution::error(e.to_string()),
    }
}

fn validate_path_tool(
    paths: &PathResolver,
    session_id: uuid::Uuid,
    tool_input: &serde_json::Value,
    operation: Operation,
) -> ToolExecution {
    let Some(path) = tool_input
        .get("path")
        .or_else(|| tool_input.get("file_path"))
        .and_then(|v| v.as_str())
    else {
        return ToolExecution::error("tool call missing a \"path\"/\"file_path\" string");
    };
    match paths.validate_path(&session_id.to_string(), path, operation) {
        Ok(resolved) => ToolExecution::ok(serde_json::json!({
            "real_path": resolved.real_path.display().to_string(),
            "is_readonly": resolved.is_readonly,
        })),
        Err(e) => ToolExecution::error(validation_message(&e)),
    }
}

fn validation_message(e: &ValidationError) -> String {
    e.to_string()
}
