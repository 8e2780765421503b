use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMountMode {
    Ro,
    Rw,
}

/// One bind mount to apply when building the isolator command.
/// `optional=false` mounts whose source is missing abort command
/// construction entirely (fail closed); optional ones are silently
/// skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxMount {
    pub source: String,
    pub target: String,
    pub mode: SandboxMountMode,
    pub optional: bool,
}

impl SandboxMount {
    pub fn required(source: impl Into<String>, target: impl Into<String>, mode: SandboxMountMode) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode,
            optional: false,
        }
    }

    pub fn optional(source: impl Into<String>, target: impl Into<String>, mode: SandboxMountMode) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode,
            optional: true,
        }
    }

    pub(crate) fn resolved(&self, placeholders: &HashMap<String, String>) -> Self {
        Self {
            source: resolve_placeholders(&self.source, placeholders),
            target: resolve_placeholders(&self.target, placeholders),
            mode: self.mode,
            optional: self.optional,
        }
    }
}

pub(crate) fn resolve_placeholders(value: &str, placeholders: &HashMap<String, String>) -> String {
    let mut resolved = value.to_string();
    for (key, replacement) in placeholders {
        resolved = resolved.replace(&format!("{{{key}}}"), replacement);
    }
    resolved
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxNetworkConfig {
    pub enabled: bool,
    pub allowed_domains: Vec<String>,
    pub allow_localhost: bool,
}

/// Environment policy for the sandboxed process. Crucially NOT shared
/// across sessions: `SandboxConfig::resolve` always produces a fresh
/// instance with an empty `custom_env`, to prevent one session's secrets
/// leaking into another's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxEnvConfig {
    pub home: String,
    pub path: String,
    pub clear_env: bool,
    pub custom_env: HashMap<String, String>,
}

impl Default for SandboxEnvConfig {
    fn default() -> Self {
        Self {
            home: "/workspace".to_string(),
            path: "/usr/bin:/bin".to_string(),
            clear_env: true,
            custom_env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcFilteringConfig {
    pub enabled: bool,
    pub allowed_entries: Vec<String>,
}

impl Default for ProcFilteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_entries: vec![
                "/proc/self".to_string(),
                "/proc/cpuinfo".to_string(),
                "/proc/meminfo".to_string(),
                "/proc/uptime".to_string(),
                "/proc/version".to_string(),
            ],
        }
    }
}

/// Complete, resolved sandbox configuration: enable flags, the isolator
/// path, and every mount set the envelope builder needs to assemble a
/// command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub file_sandboxing: bool,
    pub network_sandboxing: bool,
    pub bwrap_path: String,
    pub use_tmpfs_root: bool,
    pub static_mounts: HashMap<String, SandboxMount>,
    pub session_mounts: HashMap<String, SandboxMount>,
    pub dynamic_mounts: Vec<SandboxMount>,
    pub network: SandboxNetworkConfig,
    pub environment: SandboxEnvConfig,
    pub proc_filtering: ProcFilteringConfig,
    pub writable_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_sandboxing: true,
            network_sandboxing: true,
            bwrap_path: "bwrap".to_string(),
            use_tmpfs_root: true,
            static_mounts: HashMap::new(),
            session_mounts: HashMap::new(),
            dynamic_mounts: Vec::new(),
            network: SandboxNetworkConfig::default(),
            environment: SandboxEnvConfig::default(),
            proc_filtering: ProcFilteringConfig::default(),
            writable_paths: Vec::new(),
            readonly_paths: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Produce a session-local clone with every `{placeholder}` in paths
    /// substituted and a fresh, empty `custom_env` — never share a mutable
    /// environment config across sessions.
    pub fn resolve(&self, placeholders: &HashMap<String, String>) -> Self {
        let resolve_mounts = |mounts: &HashMap<String, SandboxMount>| {
            mounts
                .iter()
                .map(|(k, m)| (k.clone(), m.resolved(placeholders)))
                .collect()
        };
        Self {
            enabled: self.enabled,
            file_sandboxing: self.file_sandboxing,
            network_sandboxing: self.network_sandboxing,
            bwrap_path: resolve_placeholders(&self.bwrap_path, placeholders),
            use_tmpfs_root: self.use_tmpfs_root,
            static_mounts: resolve_mounts(&self.static_mounts),
            session_mounts: resolve_mounts(&self.session_mounts),
            dynamic_mounts: self.dynamic_mounts.iter().map(|m| m.resolved(placeholders)).collect(),
            network: self.network.clone(),
            environment: SandboxEnvConfig {
                home: self.environment.home.clone(),
                path: self.environment.path.clone(),
                clear_env: self.environment.clear_env,
                custom_env: HashMap::new(),
            },
            proc_filtering: self.proc_filtering.clone(),
            writable_paths: self
                .writable_paths
                .iter()
                .map(|p| resolve_placeholders(p, placeholders))
                .collect(),
            readonly_paths: self
                .readonly_paths
                .iter()
                .map(|p| resolve_placeholders(p, placeholders))
                .collect(),
        }
    }

    /// Set this session's `custom_env` on an already-resolved config. Kept
    /// as a separate step from `resolve` so callers can't accidentally
    /// populate it before the fresh-clone happens.
    pub fn with_custom_env(mut self, custom_env: HashMap<String, String>) -> Self {
        self.environment.custom_env = custom_env;
        self
    }
}
