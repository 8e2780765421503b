use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxConfig;

/// A named, config-level bundle of tool rules, path rules and sandbox
/// config, activated per session. Immutable once loaded; the permission
/// engine clones the `sandbox` field fresh for every session it activates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionProfile {
    pub name: String,
    pub description: String,
    pub enabled_tools: HashSet<String>,
    pub disabled_tools: HashSet<String>,
    /// Glob-style allow rules keyed by tool name, e.g. `Bash` -> `["git *"]`.
    pub allow_rules: HashMap<String, Vec<String>>,
    pub deny_rules: HashMap<String, Vec<String>>,
    pub allowed_dirs: Vec<String>,
    pub sandbox: SandboxConfig,
}

impl PermissionProfile {
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        !self.disabled_tools.contains(tool_name)
            && (self.enabled_tools.is_empty() || self.enabled_tools.contains(tool_name))
    }
}
