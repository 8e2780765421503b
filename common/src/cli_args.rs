//! Shared CLI surface for binaries in this workspace: a `--sandboxd-home`
//! override and a `--verbose` flag driving the same `RUST_LOG`/`EnvFilter`
//! wiring the teacher's binaries use.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct GlobalArgs {
    /// Override the config/state directory (defaults to `SANDBOXD_HOME` or `~/.sandboxd`).
    #[arg(long = "sandboxd-home", global = true)]
    pub sandboxd_home: Option<PathBuf>,

    /// Increase log verbosity. Repeatable: `-v` is info, `-vv` is debug, `-vvv` is trace.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalArgs {
    pub fn resolve_home(&self) -> Result<PathBuf, crate::config::ConfigError> {
        match &self.sandboxd_home {
            Some(home) => Ok(home.clone()),
            None => crate::config::find_sandboxd_home(),
        }
    }

    /// Translate `-v` repeat count into the default `EnvFilter` directive,
    /// unless `RUST_LOG` is already set (which always wins).
    pub fn default_log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Initialize `tracing-subscriber` with an `EnvFilter` seeded from
/// `RUST_LOG`, falling back to `args.default_log_directive()`.
pub fn init_tracing(args: &GlobalArgs) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
