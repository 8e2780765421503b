use std::time::Duration;

use sandboxd_protocol::SandboxConfig;
use sandboxd_uid_policy::UidPolicy;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::command::{build_isolator_command, SandboxMountError};

const MAX_STREAM_OUTPUT: usize = 10 * 1024;

#[derive(Debug, Error)]
pub enum SandboxExecError {
    #[error(transparent)]
    Mount(#[from] SandboxMountError),
    #[error("failed to spawn sandboxed command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to read child output: {0}")]
    Io(#[source] std::io::Error),
}

/// Builds and runs isolator-wrapped commands for one session's sandbox
/// profile. Holds the resolved config and the validated privilege-drop
/// target, if any.
pub struct SandboxExecutor {
    config: SandboxConfig,
    uid_policy: UidPolicy,
    privilege_drop: Option<(u32, u32)>,
    /// Whether `config.bwrap_path` understands `--uid`/`--gid` natively.
    /// `true` (the default) injects the drop into the isolator's own argv,
    /// composed with `--unshare-user`. `false` means the configured
    /// isolator binary was invoked without those flags — the drop is
    /// instead applied with a `setgid`/`setuid` pair run in the child
    /// right before exec, per §9's documented fallback for isolators that
    /// don't support native UID injection.
    native_uid_injection: bool,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig, uid_policy: UidPolicy, privilege_drop: Option<(u32, u32)>) -> Self {
        Self {
            config,
            uid_policy,
            privilege_drop,
            native_uid_injection: true,
        }
    }

    /// Disable isolator-native `--uid`/`--gid` injection; any configured
    /// privilege drop is instead applied via a `setgid`/`setuid`
    /// pre-exec hook in [`execute_sandboxed_command`].
    pub fn without_native_uid_injection(mut self) -> Self {
        self.native_uid_injection = false;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn build_command(
        &self,
        command: &[String],
        allow_network: bool,
    ) -> Result<Vec<String>, SandboxMountError> {
        build_isolator_command(
            &self.config,
            command,
            allow_network,
            true,
            self.privilege_drop_for_isolator(),
            &self.uid_policy,
        )
    }

    fn privilege_drop_for_isolator(&self) -> Option<(u32, u32)> {
        self.native_uid_injection.then_some(self.privilege_drop).flatten()
    }

    /// The drop target to apply via the post-fork fallback, validated
    /// against the UID policy. `None` when native injection is in effect
    /// (already validated and encoded in the isolator argv) or no drop was
    /// configured.
    fn privilege_drop_for_fallback(&self) -> Result<Option<(u32, u32)>, SandboxMountError> {
        if self.native_uid_injection {
            return Ok(None);
        }
        let Some((uid, gid)) = self.privilege_drop else {
            return Ok(None);
        };
        self.uid_policy.validate_uid(uid, None)?;
        self.uid_policy.validate_gid(gid)?;
        Ok(Some((uid, gid)))
    }

    /// Return the required mount sources that do not currently exist on
    /// disk, for startup diagnostics. Optional mounts are never included.
    pub fn missing_required_mount_sources(&self) -> Vec<String> {
        self.config
            .static_mounts
            .values()
            .chain(self.config.session_mounts.values())
            .chain(self.config.dynamic_mounts.iter())
            .filter(|m| !m.optional && !std::path::Path::new(&m.source).exists())
            .map(|m| m.source.clone())
            .collect()
    }
}

/// Run `shell_command` inside the sandbox, capturing stdout/stderr
/// (UTF-8-lossy) and bounding wall-clock time at `timeout`. On timeout the
/// child is killed and the exit code is synthesized as 124. Never returns
/// an `Err` for the wrapped command's own failure — that's reported via
/// the returned exit code, matching "report errors with context rather
/// than raising."
pub async fn execute_sandboxed_command(
    executor: &SandboxExecutor,
    shell_command: &str,
    allow_network: bool,
    timeout: Duration,
) -> Result<(i32, String, String), SandboxExecError> {
    let argv = executor.build_command(
        &["bash".to_string(), "-c".to_string(), shell_command.to_string()],
        allow_network,
    )?;
    let fallback_drop = executor.privilege_drop_for_fallback()?;

    tracing::info!(argv0 = argv.first().map(String::as_str).unwrap_or(""), "sandbox exec");

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some((uid, gid)) = fallback_drop {
        tracing::info!(uid, gid, "applying setuid/setgid privilege-drop fallback");
        apply_uid_gid_fallback(&mut cmd, uid, gid);
    }
    let mut child = cmd.spawn().map_err(SandboxExecError::Spawn)?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let status = child.wait().await.map_err(SandboxExecError::Io)?;
        let stdout = read_capped(&mut stdout_pipe).await?;
        let stderr = read_capped(&mut stderr_pipe).await?;
        Ok::<_, SandboxExecError>((status.code().unwrap_or(1), stdout, stderr))
    };

    tokio::select! {
        result = run => result,
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(?timeout, "sandbox exec timed out, killing child");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok((124, String::new(), format!("command timed out after {timeout:?}")))
        }
    }
}

/// Drops the child to `gid`/`uid` right before exec, for isolators invoked
/// without native `--uid`/`--gid` support. Clears supplementary groups,
/// then GID, then UID last — dropping the UID first would strip the
/// privilege needed to change GID and groups.
#[cfg(unix)]
fn apply_uid_gid_fallback(cmd: &mut Command, uid: u32, gid: u32) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the closure only calls async-signal-safe libc functions
    // (setgid/setuid) between fork and exec, and returns an `io::Error` on
    // failure rather than touching any Rust-managed state.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setgroups(0, std::ptr::null()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setgid(gid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setuid(uid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_uid_gid_fallback(_cmd: &mut Command, _uid: u32, _gid: u32) {
    tracing::error!("setuid/setgid privilege-drop fallback is only supported on unix");
}

async fn read_capped(
    pipe: &mut Option<impl tokio::io::AsyncRead + Unpin>,
) -> Result<String, SandboxExecError> {
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = vec![0u8; MAX_STREAM_OUTPUT];
    let mut filled = 0;
    loop {
        if filled == buf.len() {
            break;
        }
        let n = pipe.read(&mut buf[filled..]).await.map_err(SandboxExecError::Io)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxd_protocol::SandboxConfig;

    fn plain_executor() -> SandboxExecutor {
        let mut config = SandboxConfig::default();
        config.file_sandboxing = false;
        config.bwrap_path = "env".to_string();
        SandboxExecutor::new(config, UidPolicy::isolated(), None)
    }

    #[tokio::test]
    async fn missing_required_mount_sources_reports_only_required() {
        let mut config = SandboxConfig::default();
        config.static_mounts.insert(
            "missing".to_string(),
            sandboxd_protocol::SandboxMount::required(
                "/definitely/not/here",
                "/mnt",
                sandboxd_protocol::SandboxMountMode::Ro,
            ),
        );
        config.dynamic_mounts.push(sandboxd_protocol::SandboxMount::optional(
            "/also/not/here",
            "/mnt2",
            sandboxd_protocol::SandboxMountMode::Ro,
        ));
        let executor = SandboxExecutor::new(config, UidPolicy::isolated(), None);
        assert_eq!(executor.missing_required_mount_sources(), vec!["/definitely/not/here"]);
    }

    #[tokio::test]
    async fn plain_executor_builds_without_required_mounts() {
        assert!(plain_executor().missing_required_mount_sources().is_empty());
    }

    #[test]
    fn native_injection_keeps_drop_out_of_the_fallback_path() {
        let config = SandboxConfig::default();
        let executor = SandboxExecutor::new(config, UidPolicy::isolated(), Some((55_000, 55_000)));
        assert_eq!(executor.privilege_drop_for_isolator(), Some((55_000, 55_000)));
        assert_eq!(executor.privilege_drop_for_fallback().unwrap(), None);
    }

    #[test]
    fn disabling_native_injection_routes_drop_through_the_fallback() {
        let config = SandboxConfig::default();
        let executor = SandboxExecutor::new(config, UidPolicy::isolated(), Some((55_000, 55_000)))
            .without_native_uid_injection();
        assert_eq!(executor.privilege_drop_for_isolator(), None);
        assert_eq!(executor.privilege_drop_for_fallback().unwrap(), Some((55_000, 55_000)));
    }

    #[test]
    fn fallback_path_still_enforces_the_uid_policy() {
        let config = SandboxConfig::default();
        let executor =
            SandboxExecutor::new(config, UidPolicy::isolated(), Some((0, 0))).without_native_uid_injection();
        assert!(executor.privilege_drop_for_fallback().is_err());
    }

    #[test]
    fn no_configured_drop_means_no_fallback_either_way() {
        let config = SandboxConfig::default();
        let executor =
            SandboxExecutor::new(config, UidPolicy::isolated(), None).without_native_uid_injection();
        assert_eq!(executor.privilege_drop_for_fallback().unwrap(), None);
    }
}
