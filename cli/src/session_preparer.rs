//! The one `SessionPreparer` implementation this binary ships: resolves a
//! queued task's permission profile from the loaded [`Config`], carves out
//! a per-session workspace directory, resolves the API key to forward
//! (per-user token first, system secret fallback), and resolves the
//! profile's sandbox config against it all.

use std::path::PathBuf;
use std::sync::Arc;

use sandboxd_common::secrets::{resolve_api_key, InMemoryTokenStore, TokenCipher};
use sandboxd_common::Config;
use sandboxd_core::SessionPreparer;
use sandboxd_permissions::PermissionEngine;
use sandboxd_protocol::{PermissionProfile, QueuedTask};
use sandboxd_sandbox::SandboxExecutor;
use sandboxd_uid_policy::UidPolicy;

const TOKEN_PROVIDER: &str = "default";

pub struct ConfigSessionPreparer {
    config: Arc<Config>,
    token_cipher: Option<TokenCipher>,
    tokens: InMemoryTokenStore,
}

impl ConfigSessionPreparer {
    pub fn new(config: Arc<Config>) -> Self {
        let token_cipher = config.secrets.token_encryption_key_hex.as_deref().and_then(|key_hex| {
            TokenCipher::from_hex_key(key_hex)
                .inspect_err(|e| tracing::warn!(error = %e, "failed to load token encryption key; per-user tokens disabled"))
                .ok()
        });
        Self {
            config,
            token_cipher,
            tokens: InMemoryTokenStore::default(),
        }
    }

    fn workspace_dir(&self, task: &QueuedTask) -> PathBuf {
        self.config.home.join("sessions").join(task.session_id.to_string())
    }

    fn profile(&self) -> Result<PermissionProfile, String> {
        self.config
            .permissions
            .default_profile()
            .cloned()
            .ok_or_else(|| format!("no permission profile named '{}'", self.config.permissions.default_profile))
    }
}

impl SessionPreparer for ConfigSessionPreparer {
    async fn prepare(&self, task: &QueuedTask) -> Result<(PermissionProfile, SandboxExecutor, String), String> {
        let profile = self.profile()?;
        let workspace_dir = self.workspace_dir(task);
        std::fs::create_dir_all(&workspace_dir).map_err(|e| format!("failed to create workspace dir: {e}"))?;
        let workspace_path = workspace_dir.to_string_lossy().into_owned();

        let mut resolver = PermissionEngine::new(profile.clone());
        resolver.set_session_context(workspace_path.clone(), workspace_path.clone(), task.user_id.to_string());
        let mut forwarded_env: std::collections::HashMap<String, String> = self
            .config
            .secrets
            .forwarded_env_vars
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
            .collect();

        let api_key = resolve_api_key(
            self.token_cipher.as_ref(),
            &self.tokens,
            task.user_id,
            TOKEN_PROVIDER,
            &self.config.api.api_key_env_var,
        )
        .map_err(|e| format!("failed to resolve api key: {e}"))?;
        if let Some(key) = api_key {
            forwarded_env.insert(self.config.api.api_key_env_var.clone(), key);
        }

        let sandbox_config = resolver.get_sandbox_config(forwarded_env);

        let executor = SandboxExecutor::new(sandbox_config, UidPolicy::isolated(), None);
        Ok((profile, executor, workspace_path))
    }
}
