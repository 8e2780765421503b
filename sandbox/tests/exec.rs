//! Process-interaction tests for the sandboxed executor — real child
//! processes, real timeouts. Pure-logic coverage of argv assembly and mount
//! resolution lives in `src/command.rs` and `src/exec.rs`'s own unit tests.

use std::time::Duration;

use sandboxd_protocol::{SandboxConfig, SandboxMount, SandboxMountMode};
use sandboxd_sandbox::{execute_sandboxed_command, SandboxExecutor};
use sandboxd_uid_policy::UidPolicy;
use tokio::process::Command;

fn plain_executor() -> SandboxExecutor {
    let mut config = SandboxConfig::default();
    config.file_sandboxing = false;
    config.bwrap_path = "env".to_string();
    SandboxExecutor::new(config, UidPolicy::isolated(), None)
}

#[tokio::test]
async fn select_timeout_arm_fires_before_a_slow_child_exits() {
    // Exercises the same select! shape execute_sandboxed_command uses,
    // against a real long-running child, independent of the isolator argv
    // assembly already covered in `command.rs`'s tests.
    let mut child = Command::new("sleep").arg("5").spawn().unwrap();
    tokio::select! {
        _ = child.wait() => panic!("child should not exit before the timeout"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {
            let _ = child.start_kill();
        }
    }
}

#[tokio::test]
async fn execute_sandboxed_command_times_out_with_synthesized_exit_code() {
    let executor = plain_executor();
    let (code, _stdout, stderr) =
        execute_sandboxed_command(&executor, "sleep 5", false, Duration::from_millis(50))
            .await
            .unwrap();
    assert_eq!(code, 124);
    assert!(stderr.contains("timed out"));
}

#[tokio::test]
async fn execute_sandboxed_command_captures_stdout_of_a_quick_command() {
    let executor = plain_executor();
    let (code, stdout, _stderr) =
        execute_sandboxed_command(&executor, "echo hello-from-sandbox", false, Duration::from_secs(5))
            .await
            .unwrap();
    assert_eq!(code, 0);
    assert!(stdout.contains("hello-from-sandbox"));
}

#[tokio::test]
async fn fallback_privilege_drop_rejects_disallowed_uid_before_spawn() {
    let mut config = SandboxConfig::default();
    config.file_sandboxing = false;
    config.bwrap_path = "env".to_string();
    let executor = SandboxExecutor::new(config, UidPolicy::isolated(), Some((0, 0))).without_native_uid_injection();
    let result = execute_sandboxed_command(&executor, "true", false, Duration::from_secs(1)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_required_mount_source_surfaces_as_error_before_spawn() {
    let mut config = SandboxConfig::default();
    config.bwrap_path = "env".to_string();
    config.static_mounts.insert(
        "nope".to_string(),
        SandboxMount::required("/definitely/not/on/this/box", "/mnt/nope", SandboxMountMode::Ro),
    );
    let executor = SandboxExecutor::new(config, UidPolicy::isolated(), None);
    let result = execute_sandboxed_command(&executor, "true", false, Duration::from_secs(1)).await;
    assert!(result.is_err());
}
