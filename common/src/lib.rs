//! Config loading, CLI scaffolding, and small formatting helpers shared
//! across the sandboxd binaries.

pub mod config;

#[cfg(feature = "elapsed")]
pub mod elapsed;

#[cfg(feature = "secrets")]
pub mod secrets;

#[cfg(feature = "cli")]
mod cli_args;

#[cfg(feature = "cli")]
pub use cli_args::{init_tracing, GlobalArgs};

pub use config::{
    AgentConfig, ApiConfig, Config, ConfigError, ExternalMountsConfig, PermissionsConfig, SecretsConfig,
};
