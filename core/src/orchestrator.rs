//! The per-session run loop: claim a session, activate its permission
//! profile, drive the agent's message stream through the permission gate
//! and real tool execution, and resolve a final status once the stream
//! ends, times out, or is cancelled.
//!
//! Vendor message production (the actual LLM call) lives outside this
//! crate — callers hand the orchestrator an already-constructed
//! [`MessagePump`]; this module only knows the tagged-variant protocol,
//! never a vendor SDK type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sandboxd_event_log::{parse_structured_output, sanitize_text_for_display, EventLog, EventType};
use sandboxd_path_resolver::{PathResolver, SessionPaths};
use sandboxd_permissions::{Decision, PermissionDenialTracker, PermissionEngine};
use sandboxd_protocol::{ContentBlock, IncomingMessage, MessagePump, Session, SessionStatus};
use sandboxd_sandbox::SandboxExecutor;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::session::{SessionContext, SessionRegistry};
use crate::store::SessionStore;
use crate::tool_dispatch::execute_tool;

/// Substrings the original implementation special-cases to turn a raw
/// failure into a user-facing message, rather than leaking internals.
const SOURCE_PATH_ERROR_NEEDLE: &str = "Can't find source path";
const SANDBOX_EXEC_ERROR_NEEDLE: &str = "bwrap";

/// A checkpoint observed mid-run, carried out of `drive` so `apply_outcome`
/// can append it to the authoritative `Session` record without `drive`
/// itself needing write access to session storage.
#[derive(Debug, Clone)]
pub struct PendingCheckpoint {
    pub uuid: Uuid,
    pub turn_number: u32,
    pub tool_name: Option<String>,
    pub file_path: Option<String>,
}

/// Outcome of one run, independent of how the caller chooses to persist it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: SessionStatus,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub resumable: bool,
    pub user_facing_error: Option<String>,
    pub checkpoints: Vec<PendingCheckpoint>,
}

impl RunOutcome {
    fn fresh(status: SessionStatus) -> Self {
        Self {
            status,
            num_turns: 0,
            duration_ms: 0,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            resumable: false,
            user_facing_error: None,
            checkpoints: Vec::new(),
        }
    }
}

/// Drives one session's `SessionContext` through an agent message stream.
/// Holds no vendor dependencies: the event log, permission engine, sandbox
/// executor, and path resolver are the entire collaborator set.
pub struct SessionOrchestrator {
    registry: Arc<SessionRegistry>,
    events: Arc<EventLog>,
    paths: Arc<PathResolver>,
}

impl SessionOrchestrator {
    pub fn new(registry: Arc<SessionRegistry>, events: Arc<EventLog>) -> Self {
        Self {
            registry,
            events,
            paths: Arc::new(PathResolver::new()),
        }
    }

    /// Register a fresh `SessionContext` for `session_id`, activating its
    /// permission profile and configuring its workspace for path
    /// validation. Fails if the session already has an active run.
    pub fn claim(
        &self,
        session_id: Uuid,
        workspace_path: impl Into<String>,
        mut permissions: PermissionEngine,
        sandbox: SandboxExecutor,
    ) -> Result<Arc<SessionContext>> {
        permissions.activate(None)?;
        let workspace_path = workspace_path.into();
        self.paths.configure(session_id.to_string(), SessionPaths::new(workspace_path.clone()));
        let ctx = Arc::new(SessionContext::new(session_id, workspace_path, permissions, sandbox));
        self.registry.register(ctx.clone())?;
        Ok(ctx)
    }

    /// Drive `pump` to completion, cancellation, or timeout, recording
    /// every message as a durable+live event, gating every tool call
    /// through the session's permission engine, and executing it through
    /// the sandbox/path-resolver. Always releases the session from the
    /// registry and its path-resolver registration before returning.
    pub async fn run(
        &self,
        ctx: Arc<SessionContext>,
        mut pump: impl MessagePump + Unpin,
        effective_timeout: Duration,
    ) -> RunOutcome {
        let outcome = tokio::select! {
            outcome = self.drive(&ctx, &mut pump) => outcome,
            _ = tokio::time::sleep(effective_timeout) => self.resolve_timeout(&ctx).await,
        };
        self.registry.cleanup(ctx.session_id);
        self.paths.cleanup(&ctx.session_id.to_string());
        outcome
    }

    async fn drive(&self, ctx: &SessionContext, pump: &mut (impl MessagePump + Unpin)) -> RunOutcome {
        let mut denials = PermissionDenialTracker::new();
        let mut saw_tool_error = false;
        let mut turn_number: u32 = 0;
        let mut tool_calls: HashMap<String, (String, Option<String>)> = HashMap::new();
        let mut checkpoints: Vec<PendingCheckpoint> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => {
                    return self.resolve_cancellation(ctx).await;
                }
                item = pump.next() => item,
            };

            let Some(item) = next else {
                break;
            };

            let message = match item {
                Ok(message) => message,
                Err(e) => {
                    return self.resolve_failure(ctx, &e.to_string());
                }
            };

            self.record_event(ctx.session_id, &message).await;

            if let IncomingMessage::Assistant { content } = &message {
                turn_number += 1;
                for block in content {
                    match block {
                        ContentBlock::ToolUse { id, name, input } => {
                            let decision = ctx
                                .permissions
                                .lock()
                                .expect("permission engine lock poisoned")
                                .can_use_tool(name, input);
                            denials.record(name, &decision);
                            if name == "AskUserQuestion" {
                                let question_id = input.get("id").and_then(|v| v.as_str()).map(String::from);
                                ctx.set_pending_question(question_id.clone());
                                self.events
                                    .append(
                                        ctx.session_id,
                                        EventType::QuestionPending,
                                        serde_json::json!({
                                            "question_id": question_id,
                                            "question": input.get("question").and_then(|v| v.as_str()),
                                        }),
                                    )
                                    .await
                                    .ok();
                            }
                            if let Decision::Deny { interrupt: true, .. } = decision {
                                return self.resolve_failure(ctx, "run interrupted by a permission denial");
                            }
                            if matches!(decision, Decision::Deny { .. }) {
                                continue;
                            }

                            let file_path = input
                                .get("file_path")
                                .or_else(|| input.get("path"))
                                .and_then(|v| v.as_str())
                                .map(String::from);
                            tool_calls.insert(id.clone(), (name.clone(), file_path));

                            self.events
                                .append(
                                    ctx.session_id,
                                    EventType::ToolStart,
                                    serde_json::json!({"tool_use_id": id, "tool_name": name, "input": input}),
                                )
                                .await
                                .ok();

                            let execution = execute_tool(ctx, &self.paths, name, input).await;
                            if execution.is_error {
                                saw_tool_error = true;
                            }
                            self.events
                                .append(
                                    ctx.session_id,
                                    EventType::ToolComplete,
                                    serde_json::json!({
                                        "tool_use_id": id,
                                        "tool_name": name,
                                        "is_error": execution.is_error,
                                        "output": execution.output,
                                    }),
                                )
                                .await
                                .ok();
                        }
                        ContentBlock::ToolResult { tool_use_id, is_error, checkpoint_id, .. } => {
                            if *is_error {
                                saw_tool_error = true;
                            }
                            if let Some(checkpoint_id) = checkpoint_id {
                                let (tool_name, file_path) = tool_calls.get(tool_use_id).cloned().unwrap_or_default();
                                checkpoints.push(PendingCheckpoint {
                                    uuid: *checkpoint_id,
                                    turn_number,
                                    tool_name: (!tool_name.is_empty()).then_some(tool_name),
                                    file_path,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }

            if let IncomingMessage::Result(result) = &message {
                self.events
                    .append(
                        ctx.session_id,
                        EventType::MetricsUpdate,
                        serde_json::json!({
                            "num_turns": result.num_turns,
                            "duration_ms": result.duration_ms,
                            "cost_usd": result.cost_usd,
                            "usage": result.usage,
                        }),
                    )
                    .await
                    .ok();

                if ctx.pending_question_id().is_some() {
                    return RunOutcome {
                        status: SessionStatus::WaitingForInput,
                        num_turns: result.num_turns,
                        duration_ms: result.duration_ms,
                        cost_usd: result.cost_usd,
                        checkpoints,
                        ..RunOutcome::fresh(SessionStatus::WaitingForInput)
                    };
                }
                let failed = result.is_error || saw_tool_error || denials.was_interrupted();
                let status = if failed { SessionStatus::Failed } else { SessionStatus::Complete };
                self.events
                    .append(ctx.session_id, EventType::AgentComplete, serde_json::json!({"status": status}))
                    .await
                    .ok();
                return RunOutcome {
                    status,
                    num_turns: result.num_turns,
                    duration_ms: result.duration_ms,
                    cost_usd: result.cost_usd,
                    input_tokens: result.usage.input_tokens,
                    output_tokens: result.usage.output_tokens,
                    cache_creation_tokens: result.usage.cache_creation_input_tokens,
                    cache_read_tokens: result.usage.cache_read_input_tokens,
                    resumable: false,
                    user_facing_error: failed.then(|| "agent run reported an error".to_string()),
                    checkpoints,
                };
            }
        }

        RunOutcome {
            checkpoints,
            ..RunOutcome::fresh(if saw_tool_error { SessionStatus::Failed } else { SessionStatus::Complete })
        }
    }

    async fn resolve_cancellation(&self, ctx: &SessionContext) -> RunOutcome {
        let resumable = self
            .events
            .store()
            .read_all(ctx.session_id)
            .await
            .map(|events| {
                events
                    .iter()
                    .any(|e| e.event_type == "agent_start" && e.data.get("session_id").is_some())
            })
            .unwrap_or(false);
        let mut outcome = RunOutcome::fresh(SessionStatus::Cancelled);
        outcome.resumable = resumable;
        self.events
            .append(
                ctx.session_id,
                EventType::Cancelled,
                serde_json::json!({"resumable": resumable}),
            )
            .await
            .ok();
        outcome
    }

    async fn resolve_timeout(&self, ctx: &SessionContext) -> RunOutcome {
        self.events
            .append(
                ctx.session_id,
                EventType::Error,
                serde_json::json!({"error_type": "timeout"}),
            )
            .await
            .ok();
        let mut outcome = RunOutcome::fresh(SessionStatus::Failed);
        outcome.user_facing_error = Some("agent run exceeded its wall-clock timeout".to_string());
        outcome
    }

    fn resolve_failure(&self, _ctx: &SessionContext, raw_error: &str) -> RunOutcome {
        let user_facing = classify_error(raw_error);
        let mut outcome = RunOutcome::fresh(SessionStatus::Failed);
        outcome.user_facing_error = Some(user_facing);
        outcome
    }

    async fn record_event(&self, session_id: Uuid, message: &IncomingMessage) {
        let event_type = match message {
            IncomingMessage::System { .. } => EventType::System,
            IncomingMessage::Assistant { .. } => EventType::AssistantMessage,
            IncomingMessage::User { .. } => EventType::UserMessage,
            IncomingMessage::Result(_) => EventType::RunResult,
            IncomingMessage::StreamEvent { .. } => EventType::StreamEvent,
        };
        let sanitized = sanitize_message_text(message);
        let payload = serde_json::to_value(&sanitized).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self.events.append(session_id, event_type, payload).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to persist event");
        }
    }
}

/// Applies the display-sanitization pipeline to every text-bearing piece of
/// `message` before it is persisted, per "Text → user_message/assistant
/// events after sanitization." Tool-use/result payloads and other
/// structured fields pass through untouched.
fn sanitize_message_text(message: &IncomingMessage) -> IncomingMessage {
    match message {
        IncomingMessage::Assistant { content } => IncomingMessage::Assistant {
            content: content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => ContentBlock::Text {
                        text: sanitize_text_for_display(&strip_structured_header(text)),
                    },
                    ContentBlock::Thinking { text } => ContentBlock::Thinking {
                        text: sanitize_text_for_display(text),
                    },
                    other => other.clone(),
                })
                .collect(),
        },
        IncomingMessage::User { content } => IncomingMessage::User {
            content: match content {
                serde_json::Value::String(text) => serde_json::Value::String(sanitize_text_for_display(text)),
                other => other.clone(),
            },
        },
        other => other.clone(),
    }
}

/// Strips a leading/trailing `--- k: v ---` structured output header off
/// `text` before it's sanitized for display, logging any recognized fields
/// (status, error) rather than leaking the raw header to the event log.
fn strip_structured_header(text: &str) -> String {
    let (fields, body) = parse_structured_output(text);
    if fields.is_empty() {
        return text.to_string();
    }
    tracing::debug!(?fields, "stripped structured output header from assistant text");
    body
}

/// Translate a raw error string into the same user-facing categories the
/// original run loop classified errors into, rather than leaking internal
/// detail.
fn classify_error(raw_error: &str) -> String {
    if raw_error.contains(SOURCE_PATH_ERROR_NEEDLE) {
        "sandbox configuration error: a mounted path could not be found".to_string()
    } else if raw_error.contains(SANDBOX_EXEC_ERROR_NEEDLE) {
        "sandbox execution error: the isolated process failed to start".to_string()
    } else {
        format!("internal error: {raw_error}")
    }
}

/// Fetches the authoritative `Session` record, applies a `RunOutcome`, and
/// persists it. Kept separate from `SessionOrchestrator` so the run loop
/// doesn't need to know how sessions are stored.
pub async fn apply_outcome(
    store: &impl SessionStore,
    session_id: Uuid,
    outcome: RunOutcome,
) -> Result<Session> {
    let mut session = store.get(session_id).await.ok_or(OrchestratorError::SessionNotFound(session_id))?;
    session.status = outcome.status;
    session.num_turns = outcome.num_turns;
    session.duration_ms = outcome.duration_ms;
    session.cost_usd = outcome.cost_usd;
    session.accumulate_run_metrics(
        outcome.input_tokens,
        outcome.output_tokens,
        outcome.cache_creation_tokens,
        outcome.cache_read_tokens,
    );
    for checkpoint in outcome.checkpoints {
        crate::checkpoint::record_auto_checkpoint(
            &mut session,
            checkpoint.uuid,
            checkpoint.turn_number,
            checkpoint.tool_name,
            checkpoint.file_path,
        );
    }
    session.updated_at = chrono::Utc::now();
    if session.status.is_terminal() {
        session.completed_at = Some(chrono::Utc::now());
        if let Err(e) = harden_session_permissions(&session.working_dir) {
            tracing::warn!(session_id = %session_id, error = %e, "failed to harden session workspace permissions");
        }
    }
    store.update(session.clone()).await?;
    Ok(session)
}

/// Recursively restricts a terminated session's workspace to owner-only
/// access (0700 directories, 0600 files), matching the original
/// implementation's post-run hardening pass. A no-op on non-unix targets.
#[cfg(unix)]
fn harden_session_permissions(workspace_path: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fn walk(path: &std::path::Path) -> std::io::Result<()> {
        let metadata = std::fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
            for entry in std::fs::read_dir(path)? {
                walk(&entry?.path())?;
            }
        } else if metadata.is_file() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    let path = std::path::Path::new(workspace_path);
    if path.exists() {
        walk(path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn harden_session_permissions(_workspace_path: &str) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxd_protocol::{PermissionProfile, ResultInfo, SandboxConfig, Usage};
    use sandboxd_uid_policy::UidPolicy;
    use std::collections::{HashMap, HashSet};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    struct VecPump {
        items: std::vec::IntoIter<std::result::Result<IncomingMessage, sandboxd_protocol::MessagePumpError>>,
    }

    impl VecPump {
        fn new(items: Vec<IncomingMessage>) -> Self {
            Self {
                items: items.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            }
        }
    }

    impl futures::Stream for VecPump {
        type Item = std::result::Result<IncomingMessage, sandboxd_protocol::MessagePumpError>;
        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.items.next())
        }
    }

    fn profile() -> PermissionProfile {
        PermissionProfile {
            name: "default".to_string(),
            description: String::new(),
            enabled_tools: HashSet::new(),
            disabled_tools: HashSet::new(),
            allow_rules: HashMap::new(),
            deny_rules: HashMap::new(),
            allowed_dirs: vec![],
            sandbox: SandboxConfig::default(),
        }
    }

    fn orchestrator(tmp: &std::path::Path) -> (SessionOrchestrator, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventLog::new(tmp));
        (SessionOrchestrator::new(registry.clone(), events), registry)
    }

    fn orchestrator_with_events(tmp: &std::path::Path) -> (SessionOrchestrator, Arc<EventLog>) {
        let registry = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventLog::new(tmp));
        (SessionOrchestrator::new(registry, events.clone()), events)
    }

    fn result_message(is_error: bool) -> IncomingMessage {
        IncomingMessage::Result(ResultInfo {
            usage: Usage::default(),
            num_turns: 1,
            duration_ms: 10,
            cost_usd: 0.01,
            is_error,
            subtype: "success".to_string(),
        })
    }

    #[tokio::test]
    async fn clean_run_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![result_message(false)]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn tool_result_error_fails_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: "1".to_string(),
                    content: serde_json::json!("boom"),
                    is_error: true,
                    checkpoint_id: None,
                }],
            },
            result_message(false),
        ]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn a_write_tool_call_carrying_a_checkpoint_id_is_recorded_on_the_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let checkpoint_id = Uuid::new_v4();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![
                    ContentBlock::ToolUse {
                        id: "1".to_string(),
                        name: "Write".to_string(),
                        input: serde_json::json!({"file_path": "/workspace/main.py"}),
                    },
                    ContentBlock::ToolResult {
                        tool_use_id: "1".to_string(),
                        content: serde_json::json!("ok"),
                        is_error: false,
                        checkpoint_id: Some(checkpoint_id),
                    },
                ],
            },
            result_message(false),
        ]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.checkpoints.len(), 1);
        assert_eq!(outcome.checkpoints[0].uuid, checkpoint_id);
        assert_eq!(outcome.checkpoints[0].tool_name.as_deref(), Some("Write"));
    }

    #[tokio::test]
    async fn pending_question_yields_waiting_for_input() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "AskUserQuestion".to_string(),
                    input: serde_json::json!({"id": "q1"}),
                }],
            },
            result_message(false),
        ]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.status, SessionStatus::WaitingForInput);
    }

    #[tokio::test]
    async fn pending_question_is_persisted_as_a_question_pending_event() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, events) = orchestrator_with_events(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "AskUserQuestion".to_string(),
                    input: serde_json::json!({"id": "q1", "question": "npm or yarn?"}),
                }],
            },
            result_message(false),
        ]);
        orch.run(ctx, pump, TEST_TIMEOUT).await;
        let history = events.store().read_all(session_id).await.unwrap();
        assert!(history.iter().any(|e| e.event_type == "question_pending"));
    }

    #[tokio::test]
    async fn waiting_for_input_still_releases_the_session_for_a_later_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "AskUserQuestion".to_string(),
                    input: serde_json::json!({"id": "q1"}),
                }],
            },
            result_message(false),
        ]);
        orch.run(ctx, pump, TEST_TIMEOUT).await;

        assert!(registry.get(session_id).is_none());
        // A resumed run starts a fresh SessionContext — no stale pending
        // question carries over to block the new run's own result handling.
        let resumed = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        assert!(resumed.pending_question_id().is_none());
        let resumed_outcome = orch.run(resumed, VecPump::new(vec![result_message(false)]), TEST_TIMEOUT).await;
        assert_eq!(resumed_outcome.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn a_later_ask_user_question_replaces_the_pending_question_id() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "AskUserQuestion".to_string(),
                    input: serde_json::json!({"id": "q1"}),
                }],
            },
            IncomingMessage::Assistant {
                content: vec![ContentBlock::ToolUse {
                    id: "2".to_string(),
                    name: "AskUserQuestion".to_string(),
                    input: serde_json::json!({"id": "q2"}),
                }],
            },
            result_message(false),
        ]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.status, SessionStatus::WaitingForInput);
    }

    #[tokio::test]
    async fn cancellation_before_any_message_yields_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        ctx.request_cancel();
        let pump = VecPump::new(vec![result_message(false)]);
        let outcome = orch.run(ctx, pump, TEST_TIMEOUT).await;
        assert_eq!(outcome.status, SessionStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_pump_is_failed_once_the_timeout_elapses() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, _registry) = orchestrator(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let pump = VecPump::new(vec![]);
        let outcome = orch.run(ctx, pump, Duration::from_millis(1)).await;
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert!(outcome.user_facing_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn assistant_text_is_sanitized_and_structured_header_stripped_before_persisting() {
        let tmp = tempfile::tempdir().unwrap();
        let (orch, events) = orchestrator_with_events(tmp.path());
        let session_id = Uuid::new_v4();
        let ctx = orch
            .claim(session_id, "/workspace", PermissionEngine::new(profile()), SandboxExecutor::new(SandboxConfig::default(), UidPolicy::isolated(), None))
            .unwrap();
        let raw = "---\nstatus: complete\nerror: none\n---\nhello <system-reminder>hidden</system-reminder>world, calling mcp__github__CreateIssue";
        let pump = VecPump::new(vec![
            IncomingMessage::Assistant {
                content: vec![ContentBlock::Text { text: raw.to_string() }],
            },
            result_message(false),
        ]);
        orch.run(ctx, pump, TEST_TIMEOUT).await;

        let history = events.store().read_all(session_id).await.unwrap();
        let assistant_event = history.iter().find(|e| e.event_type == "assistant").unwrap();
        let text = assistant_event.data["content"][0]["text"].as_str().unwrap();
        assert!(!text.contains("status: complete"));
        assert!(!text.contains("system-reminder"));
        assert!(!text.contains("hidden"));
        assert!(text.contains("CreateIssue"));
        assert!(!text.contains("mcp__github__"));
    }

    #[test]
    fn classify_error_recognizes_known_needles() {
        assert!(classify_error("Can't find source path: /tmp/x").contains("sandbox configuration"));
        assert!(classify_error("bwrap: execvp failed").contains("sandbox execution"));
        assert!(classify_error("totally unexpected").starts_with("internal error"));
    }
}
