//! Per-session permission engine: holds the loaded [`PermissionProfile`],
//! records dynamic session substitutions, and exposes the `can_use_tool`
//! decision callback the agent loop consults before every tool call.

use std::collections::{HashMap, HashSet};

use sandboxd_protocol::PermissionProfile;
use thiserror::Error;
use wildmatch::WildMatch;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(
        "fatal configuration error: permission_mode must be unset; a non-null value would \
         bypass the can_use_tool callback"
    )]
    PermissionModeMustBeUnset,
    #[error("permission engine activated twice for the same session")]
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String, interrupt: bool },
}

/// Holds one session's activated permission profile plus the dynamic
/// substitutions the profile's `allowed_dirs` may reference (the session
/// workspace path, its absolute form, and the username).
pub struct PermissionEngine {
    profile: PermissionProfile,
    active: bool,
    workspace_path: Option<String>,
    workspace_absolute_path: Option<String>,
    username: Option<String>,
}

impl PermissionEngine {
    pub fn new(profile: PermissionProfile) -> Self {
        Self {
            profile,
            active: false,
            workspace_path: None,
            workspace_absolute_path: None,
            username: None,
        }
    }

    /// Activate this profile as the session's current context. Non-reentrant:
    /// a session may only activate once. Refuses to start if `permission_mode`
    /// is set — this is a security invariant, not a convenience default.
    pub fn activate(&mut self, permission_mode: Option<&str>) -> Result<(), PermissionError> {
        if self.active {
            return Err(PermissionError::AlreadyActive);
        }
        if permission_mode.is_some() {
            return Err(PermissionError::PermissionModeMustBeUnset);
        }
        self.active = true;
        Ok(())
    }

    pub fn set_session_context(
        &mut self,
        workspace_path: impl Into<String>,
        workspace_absolute_path: impl Into<String>,
        username: impl Into<String>,
    ) {
        self.workspace_path = Some(workspace_path.into());
        self.workspace_absolute_path = Some(workspace_absolute_path.into());
        self.username = Some(username.into());
    }

    /// A fresh, session-local clone of the sandbox config with `custom_env`
    /// populated from `sandboxed_envs`. No shared mutable state crosses
    /// sessions — this is the only way callers obtain the env map.
    pub fn get_sandbox_config(
        &self,
        sandboxed_envs: HashMap<String, String>,
    ) -> sandboxd_protocol::SandboxConfig {
        let mut placeholders = HashMap::new();
        if let Some(p) = &self.workspace_path {
            placeholders.insert("workspace".to_string(), p.clone());
        }
        if let Some(p) = &self.workspace_absolute_path {
            placeholders.insert("workspace_absolute".to_string(), p.clone());
        }
        if let Some(u) = &self.username {
            placeholders.insert("username".to_string(), u.clone());
        }
        self.profile.sandbox.resolve(&placeholders).with_custom_env(sandboxed_envs)
    }

    pub fn get_permission_checked_tools(&self) -> &HashSet<String> {
        &self.profile.enabled_tools
    }

    pub fn get_disabled_tools(&self) -> &HashSet<String> {
        &self.profile.disabled_tools
    }

    pub fn get_allowed_dirs(&self) -> Vec<String> {
        let substitute = |dir: &str| {
            let mut resolved = dir.to_string();
            if let Some(p) = &self.workspace_path {
                resolved = resolved.replace("{workspace}", p);
            }
            if let Some(u) = &self.username {
                resolved = resolved.replace("{username}", u);
            }
            resolved
        };
        self.profile.allowed_dirs.iter().map(|d| substitute(d)).collect()
    }

    /// The decision callback consumed by the agent loop before each tool
    /// call. A deny may carry `interrupt=true`, which terminates the turn.
    pub fn can_use_tool(&self, tool_name: &str, tool_input: &serde_json::Value) -> Decision {
        if !self.profile.is_tool_enabled(tool_name) {
            return Decision::Deny {
                reason: format!("tool '{tool_name}' is disabled for this profile"),
                interrupt: false,
            };
        }
        if let Some(patterns) = self.profile.deny_rules.get(tool_name) {
            let input_str = tool_input.to_string();
            if patterns.iter().any(|p| WildMatch::new(p).matches(&input_str)) {
                return Decision::Deny {
                    reason: format!("tool '{tool_name}' input matched a deny rule"),
                    interrupt: true,
                };
            }
        }
        if let Some(patterns) = self.profile.allow_rules.get(tool_name) {
            let input_str = tool_input.to_string();
            if !patterns.iter().any(|p| WildMatch::new(p).matches(&input_str)) {
                return Decision::Deny {
                    reason: format!("tool '{tool_name}' input did not match any allow rule"),
                    interrupt: false,
                };
            }
        }
        Decision::Allow
    }
}

/// Tracks denials observed during one run; the orchestrator consults this
/// to decide whether the run was interrupted due to denial.
#[derive(Debug, Default)]
pub struct PermissionDenialTracker {
    denials: Vec<(String, String)>,
    interrupted: bool,
}

impl PermissionDenialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tool_name: &str, decision: &Decision) {
        if let Decision::Deny { reason, interrupt } = decision {
            self.denials.push((tool_name.to_string(), reason.clone()));
            if *interrupt {
                self.interrupted = true;
            }
        }
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn denials(&self) -> &[(String, String)] {
        &self.denials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxd_protocol::SandboxConfig;

    fn profile() -> PermissionProfile {
        PermissionProfile {
            name: "default".to_string(),
            description: String::new(),
            enabled_tools: HashSet::new(),
            disabled_tools: HashSet::new(),
            allow_rules: HashMap::new(),
            deny_rules: HashMap::new(),
            allowed_dirs: vec!["{workspace}".to_string()],
            sandbox: SandboxConfig::default(),
        }
    }

    #[test]
    fn activate_rejects_non_null_permission_mode() {
        let mut engine = PermissionEngine::new(profile());
        assert!(matches!(
            engine.activate(Some("bypassAllowlist")),
            Err(PermissionError::PermissionModeMustBeUnset)
        ));
    }

    #[test]
    fn activate_accepts_unset_permission_mode() {
        let mut engine = PermissionEngine::new(profile());
        assert!(engine.activate(None).is_ok());
    }

    #[test]
    fn activate_twice_fails() {
        let mut engine = PermissionEngine::new(profile());
        engine.activate(None).unwrap();
        assert!(matches!(engine.activate(None), Err(PermissionError::AlreadyActive)));
    }

    #[test]
    fn disabled_tool_is_denied() {
        let mut p = profile();
        p.disabled_tools.insert("Bash".to_string());
        let engine = PermissionEngine::new(p);
        let decision = engine.can_use_tool("Bash", &serde_json::json!({}));
        assert!(matches!(decision, Decision::Deny { interrupt: false, .. }));
    }

    #[test]
    fn deny_rule_match_interrupts() {
        let mut p = profile();
        p.deny_rules.insert("Bash".to_string(), vec!["*rm -rf*".to_string()]);
        let engine = PermissionEngine::new(p);
        let decision = engine.can_use_tool("Bash", &serde_json::json!({"command": "rm -rf /"}));
        assert!(matches!(decision, Decision::Deny { interrupt: true, .. }));
    }

    #[test]
    fn sandbox_config_clone_is_fresh_per_call() {
        let engine = PermissionEngine::new(profile());
        let mut envs = HashMap::new();
        envs.insert("SECRET".to_string(), "a".to_string());
        let cfg1 = engine.get_sandbox_config(envs);
        let cfg2 = engine.get_sandbox_config(HashMap::new());
        assert!(cfg1.environment.custom_env.contains_key("SECRET"));
        assert!(cfg2.environment.custom_env.is_empty());
    }

    #[test]
    fn denial_tracker_records_interrupts() {
        let mut tracker = PermissionDenialTracker::new();
        tracker.record(
            "Bash",
            &Decision::Deny {
                reason: "no".to_string(),
                interrupt: true,
            },
        );
        assert!(tracker.was_interrupted());
        assert_eq!(tracker.denials().len(), 1);
    }
}
