use std::path::Path;

use sandboxd_protocol::{SandboxConfig, SandboxMount, SandboxMountMode};
use sandboxd_uid_policy::{UidPolicy, UidPolicyError};
use thiserror::Error;

const SANDBOX_CONTEXT_MARKER: &str = "SANDBOXD_CONTEXT";

#[derive(Debug, Error)]
pub enum SandboxMountError {
    #[error(
        "SECURITY: mount source does not exist for '{name}': {mount_source}. refusing to execute \
         without proper sandbox isolation"
    )]
    MissingRequiredMount { name: String, mount_source: String },
    #[error(
        "SECURITY: dynamic mount source does not exist: {mount_source}. refusing to execute \
         without proper sandbox isolation"
    )]
    MissingRequiredDynamicMount { mount_source: String },
    #[error("uid policy rejected privilege drop target: {0}")]
    UidPolicy(#[from] UidPolicyError),
}

/// Build the isolator argv: `<bwrap_path> <flags...> -- <command...>`.
///
/// `nested_container` selects between running inside an already-namespaced
/// container (the default; avoids `pivot_root`, which Docker disallows) and
/// running natively with full namespace isolation.
pub fn build_isolator_command(
    config: &SandboxConfig,
    command: &[String],
    allow_network: bool,
    nested_container: bool,
    privilege_drop: Option<(u32, u32)>,
    uid_policy: &UidPolicy,
) -> Result<Vec<String>, SandboxMountError> {
    let mut cmd = vec![config.bwrap_path.clone()];

    if nested_container {
        cmd.extend(["--unshare-pid", "--unshare-uts", "--unshare-ipc"].map(String::from));
    } else {
        cmd.push("--unshare-all".to_string());
    }

    cmd.extend(["--die-with-parent", "--new-session"].map(String::from));

    if config.use_tmpfs_root && !nested_container {
        cmd.extend(["--tmpfs", "/"].map(String::from));
    } else {
        cmd.extend(["--tmpfs", "/tmp:size=100M"].map(String::from));
    }

    if nested_container {
        append_proc_mounts(&mut cmd, config);
        cmd.extend(["--dev-bind", "/dev", "/dev"].map(String::from));
    } else {
        cmd.extend(["--proc", "/proc", "--dev", "/dev"].map(String::from));
    }

    for (name, mount) in config.static_mounts.iter().chain(config.session_mounts.iter()) {
        append_mount(&mut cmd, Some(name), mount)?;
    }
    for mount in &config.dynamic_mounts {
        append_mount(&mut cmd, None, mount)?;
    }

    // Network namespace unshared iff network sandboxing is on and network
    // isn't explicitly allowed for this invocation — applies regardless of
    // nesting (a deliberate divergence from the original, preexec-era
    // implementation; see DESIGN.md).
    if !allow_network && config.network_sandboxing {
        cmd.push("--unshare-net".to_string());
    }

    if config.environment.clear_env {
        cmd.push("--clearenv".to_string());
    }
    cmd.extend(["--setenv".to_string(), "HOME".to_string(), config.environment.home.clone()]);
    cmd.extend(["--setenv".to_string(), "PATH".to_string(), config.environment.path.clone()]);
    cmd.extend([
        "--setenv".to_string(),
        SANDBOX_CONTEXT_MARKER.to_string(),
        "sandbox".to_string(),
    ]);

    for (name, value) in &config.environment.custom_env {
        if is_valid_identifier(name) {
            cmd.extend(["--setenv".to_string(), name.clone(), value.clone()]);
        } else {
            tracing::warn!(env_name = name, "skipping invalid custom env var name");
        }
    }

    cmd.extend(["--chdir".to_string(), config.environment.home.clone()]);

    if let Some((uid, gid)) = privilege_drop {
        uid_policy.validate_uid(uid, None)?;
        uid_policy.validate_gid(gid)?;
        // Isolator-native flags compose with --unshare-user, unlike a
        // preexec-style setuid/setgid call made by the parent process.
        cmd.push("--unshare-user".to_string());
        cmd.extend(["--uid".to_string(), uid.to_string()]);
        cmd.extend(["--gid".to_string(), gid.to_string()]);
    }

    cmd.push("--".to_string());
    cmd.extend(command.iter().cloned());

    Ok(cmd)
}

fn append_proc_mounts(cmd: &mut Vec<String>, config: &SandboxConfig) {
    if config.proc_filtering.enabled {
        cmd.extend(["--tmpfs", "/proc"].map(String::from));
        for entry in &config.proc_filtering.allowed_entries {
            if Path::new(entry).exists() {
                cmd.extend(["--ro-bind".to_string(), entry.clone(), entry.clone()]);
            } else {
                tracing::debug!(entry, "skipping non-existent proc entry");
            }
        }
        tracing::info!(
            entries = config.proc_filtering.allowed_entries.len(),
            "using filtered /proc"
        );
    } else {
        tracing::warn!("using full /proc bind: all processes visible to the agent");
        cmd.extend(["--ro-bind", "/proc", "/proc"].map(String::from));
    }
}

fn append_mount(
    cmd: &mut Vec<String>,
    name: Option<&str>,
    mount: &SandboxMount,
) -> Result<(), SandboxMountError> {
    if !Path::new(&mount.source).exists() {
        if mount.optional {
            tracing::debug!(source = mount.source, "skipping optional mount: source missing");
            return Ok(());
        }
        return Err(match name {
            Some(name) => SandboxMountError::MissingRequiredMount {
                name: name.to_string(),
                mount_source: mount.source.clone(),
            },
            None => SandboxMountError::MissingRequiredDynamicMount {
                mount_source: mount.source.clone(),
            },
        });
    }
    let flag = match mount.mode {
        SandboxMountMode::Rw => "--bind",
        SandboxMountMode::Ro => "--ro-bind",
    };
    cmd.extend([flag.to_string(), mount.source.clone(), mount.target.clone()]);
    Ok(())
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Wrap a shell command string in `bash -c` and produce a single
/// shell-safe joined string, for contexts that need a single argv string
/// rather than a `Vec<String>` (e.g. logging or a remote-exec transport).
pub fn wrap_shell_command(
    config: &SandboxConfig,
    command: &str,
    allow_network: bool,
    uid_policy: &UidPolicy,
    privilege_drop: Option<(u32, u32)>,
) -> Result<String, SandboxMountError> {
    let argv = build_isolator_command(
        config,
        &["bash".to_string(), "-lc".to_string(), command.to_string()],
        allow_network,
        true,
        privilege_drop,
        uid_policy,
    )?;
    Ok(shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" ")))
}
