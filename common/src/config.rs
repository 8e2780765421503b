//! Loads the five YAML config files under `SANDBOXD_HOME` the way the
//! teacher's `core/src/config.rs` loads `CODEX_HOME/config.toml`: resolve
//! the home directory (env override, else a dotfile under the user's home
//! directory), then parse each file into a typed struct.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sandboxd_protocol::{PermissionProfile, SandboxMount};
use serde::Deserialize;

const HOME_ENV_VAR: &str = "SANDBOXD_HOME";
const HOME_DIR_NAME: &str = ".sandboxd";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory; set {HOME_ENV_VAR} explicitly")]
    NoHomeDirectory,
    #[error("required config file missing: {0}")]
    MissingRequiredFile(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

/// `agent.yaml`: orchestrator/auto-resume tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub default_model: String,
    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,
    #[serde(default = "default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,
    #[serde(default = "default_recovery_max_age_hours")]
    pub recovery_max_age_hours: i64,
    #[serde(default = "default_cleanup_max_age_hours")]
    pub cleanup_max_age_hours: i64,
    /// Task text at or above this byte size is redirected to a workspace
    /// file rather than inlined into the first turn's prompt.
    #[serde(default = "default_large_input_threshold_bytes")]
    pub large_input_threshold_bytes: u64,
    #[serde(default = "default_large_input_template")]
    pub large_input_template: String,
}

fn default_max_resume_attempts() -> u32 {
    3
}
fn default_task_timeout_minutes() -> u64 {
    30
}
fn default_recovery_max_age_hours() -> i64 {
    1
}
fn default_cleanup_max_age_hours() -> i64 {
    24
}
fn default_large_input_threshold_bytes() -> u64 {
    200_000
}
fn default_large_input_template() -> String {
    "The task description is large ({size_display}) and has been saved to {filename} in your workspace. Read that file for the full task.".to_string()
}

/// `api.yaml`: the model vendor endpoint and credential lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key_env_var: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    600
}

/// `permissions.yaml`: named profiles plus which one new sessions get by
/// default.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    pub default_profile: String,
    pub profiles: HashMap<String, PermissionProfile>,
}

impl PermissionsConfig {
    pub fn default_profile(&self) -> Option<&PermissionProfile> {
        self.profiles.get(&self.default_profile)
    }
}

/// `external-mounts.yaml`: named mounts layered on top of every session's
/// sandbox, independent of the per-profile `sandbox.static_mounts` map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalMountsConfig {
    #[serde(default)]
    pub mounts: HashMap<String, SandboxMount>,
}

/// `secrets.yaml`: names of environment variables that carry secret
/// values, plus the key used to decrypt per-user API tokens. Secret
/// *values* are never stored in the file itself, only variable names to
/// forward into the sandbox environment and the hex-encoded AEAD key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub forwarded_env_vars: Vec<String>,
    /// 32-byte AES-256-GCM key, hex-encoded. Required to decrypt any
    /// `Token` rows; absent means only the system-wide
    /// `api.api_key_env_var` fallback is available.
    #[serde(default)]
    pub token_encryption_key_hex: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub agent: AgentConfig,
    pub api: ApiConfig,
    pub permissions: PermissionsConfig,
    pub external_mounts: ExternalMountsConfig,
    pub secrets: SecretsConfig,
}

/// Resolve `SANDBOXD_HOME`: honor the env var if set, otherwise
/// `~/.sandboxd`. Mirrors `find_codex_home`'s `CODEX_HOME` precedence.
pub fn find_sandboxd_home() -> Result<PathBuf, ConfigError> {
    if let Ok(val) = std::env::var(HOME_ENV_VAR) {
        if !val.is_empty() {
            return Ok(PathBuf::from(val));
        }
    }
    let mut home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    home.push(HOME_DIR_NAME);
    Ok(home)
}

fn load_required<T: for<'de> Deserialize<'de>>(home: &Path, file_name: &str) -> Result<T, ConfigError> {
    let path = home.join(file_name);
    if !path.exists() {
        return Err(ConfigError::MissingRequiredFile(path));
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
}

fn load_optional<T: for<'de> Deserialize<'de> + Default>(home: &Path, file_name: &str) -> Result<T, ConfigError> {
    let path = home.join(file_name);
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
}

/// Load all five config files under `home`. `agent.yaml`, `api.yaml`, and
/// `permissions.yaml` are required; `external-mounts.yaml` and
/// `secrets.yaml` default to empty when absent.
pub fn load(home: &Path) -> Result<Config, ConfigError> {
    let agent = load_required(home, "agent.yaml")?;
    let api = load_required(home, "api.yaml")?;
    let permissions: PermissionsConfig = load_required(home, "permissions.yaml")?;
    if !permissions.profiles.contains_key(&permissions.default_profile) {
        tracing::warn!(
            default_profile = permissions.default_profile,
            "default_profile not present in permissions.yaml's profiles map"
        );
    }
    let external_mounts = load_optional(home, "external-mounts.yaml")?;
    let secrets = load_optional(home, "secrets.yaml")?;
    Ok(Config {
        home: home.to_path_buf(),
        agent,
        api,
        permissions,
        external_mounts,
        secrets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn loads_a_complete_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "agent.yaml", "default_model: claude-sonnet\n");
        write(
            dir.path(),
            "api.yaml",
            "base_url: https://api.example.com\napi_key_env_var: SANDBOXD_API_KEY\n",
        );
        write(
            dir.path(),
            "permissions.yaml",
            "default_profile: default\n\
             profiles:\n\
             \x20 default:\n\
             \x20   name: default\n\
             \x20   description: \"\"\n\
             \x20   enabled_tools: []\n\
             \x20   disabled_tools: []\n\
             \x20   allow_rules: {}\n\
             \x20   deny_rules: {}\n\
             \x20   allowed_dirs: []\n\
             \x20   sandbox:\n\
             \x20     enabled: true\n\
             \x20     file_sandboxing: true\n\
             \x20     network_sandboxing: true\n\
             \x20     bwrap_path: bwrap\n\
             \x20     use_tmpfs_root: true\n\
             \x20     static_mounts: {}\n\
             \x20     session_mounts: {}\n\
             \x20     dynamic_mounts: []\n\
             \x20     network:\n\
             \x20       enabled: false\n\
             \x20       allowed_domains: []\n\
             \x20       allow_localhost: false\n\
             \x20     environment:\n\
             \x20       home: /workspace\n\
             \x20       path: /usr/bin:/bin\n\
             \x20       clear_env: true\n\
             \x20       custom_env: {}\n\
             \x20     proc_filtering:\n\
             \x20       enabled: true\n\
             \x20       allowed_entries: []\n\
             \x20     writable_paths: []\n\
             \x20     readonly_paths: []\n",
        );

        let config = load(dir.path()).unwrap();
        assert_eq!(config.agent.default_model, "claude-sonnet");
        assert_eq!(config.agent.max_resume_attempts, 3);
        assert!(config.permissions.default_profile().is_some());
        assert!(config.external_mounts.mounts.is_empty());
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredFile(_)));
    }

    #[test]
    fn env_var_overrides_default_home() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: test runs single-threaded w.r.t. this env var within the process;
        // std::env::set_var is unsafe since Rust 2024 because it isn't thread-safe
        // against concurrent getenv calls in other threads.
        unsafe {
            std::env::set_var(HOME_ENV_VAR, dir.path());
        }
        let resolved = find_sandboxd_home().unwrap();
        unsafe {
            std::env::remove_var(HOME_ENV_VAR);
        }
        assert_eq!(resolved, dir.path());
    }
}
