//! Pure validator for UID/GID targets used in sandboxed `setuid`/`setgid`
//! operations. Holds no process state beyond the immutable [`UidPolicy`]
//! configuration; every call is a pure function plus an audit log line.

use serde::Serialize;
use thiserror::Error;

/// UID mapping mode for session isolation.
///
/// `Isolated` draws from a dedicated range that does not correspond to any
/// real host account, which is the safe default for multi-tenant
/// deployments. `Direct` maps session UIDs straight onto host UIDs, which
/// simplifies bind-mount ownership for single-tenant/dev deployments at the
/// cost of host UID collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UidMode {
    Isolated,
    Direct,
}

impl UidMode {
    pub fn from_env_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "direct" => UidMode::Direct,
            _ => UidMode::Isolated,
        }
    }
}

/// Immutable UID/GID security configuration.
#[derive(Debug, Clone)]
pub struct UidPolicy {
    pub mode: UidMode,
    pub isolated_uid_min: u32,
    pub isolated_uid_max: u32,
    pub direct_uid_min: u32,
    pub direct_uid_max: u32,
    pub system_uid_max: u32,
    pub api_service_uid: u32,
    pub legacy_uid_min: u32,
    pub legacy_uid_max: u32,
    pub allow_legacy_uids: bool,
}

impl Default for UidPolicy {
    fn default() -> Self {
        Self {
            mode: UidMode::Isolated,
            isolated_uid_min: 50_000,
            isolated_uid_max: 60_000,
            direct_uid_min: 1_000,
            direct_uid_max: 65_533,
            system_uid_max: 999,
            api_service_uid: 45_045,
            legacy_uid_min: 2_000,
            legacy_uid_max: 49_999,
            allow_legacy_uids: true,
        }
    }
}

impl UidPolicy {
    pub fn isolated() -> Self {
        Self {
            mode: UidMode::Isolated,
            ..Self::default()
        }
    }

    pub fn direct() -> Self {
        Self {
            mode: UidMode::Direct,
            ..Self::default()
        }
    }

    fn active_range(&self) -> (u32, u32) {
        match self.mode {
            UidMode::Isolated => (self.isolated_uid_min, self.isolated_uid_max),
            UidMode::Direct => (self.direct_uid_min, self.direct_uid_max),
        }
    }

    fn in_active_range(&self, id: u32) -> bool {
        let (min, max) = self.active_range();
        if min <= id && id <= max {
            return true;
        }
        self.allow_legacy_uids && self.legacy_uid_min <= id && id <= self.legacy_uid_max
    }

    /// Validate `target_uid` for a `setuid` target. `session_uid`, when
    /// given, enforces least privilege: the target must equal the session's
    /// own authenticated UID.
    pub fn validate_uid(
        &self,
        target_uid: u32,
        session_uid: Option<u32>,
    ) -> Result<(), UidPolicyError> {
        let result = self.validate_uid_inner(target_uid, session_uid);
        log_uid_operation("validate_uid", target_uid, session_uid, &result, self.mode);
        result
    }

    fn validate_uid_inner(
        &self,
        target_uid: u32,
        session_uid: Option<u32>,
    ) -> Result<(), UidPolicyError> {
        if target_uid == 0 {
            return Err(UidPolicyError::RootBlocked);
        }
        if target_uid <= self.system_uid_max {
            return Err(UidPolicyError::SystemAccount {
                uid: target_uid,
                system_uid_max: self.system_uid_max,
            });
        }
        if target_uid == self.api_service_uid {
            return Err(UidPolicyError::ApiServiceUid { uid: target_uid });
        }
        if !self.in_active_range(target_uid) {
            let (min, max) = self.active_range();
            return Err(UidPolicyError::OutsideRange {
                uid: target_uid,
                min,
                max,
                mode: self.mode,
            });
        }
        if let Some(session_uid) = session_uid {
            if target_uid != session_uid {
                return Err(UidPolicyError::NotLeastPrivilege {
                    uid: target_uid,
                    session_uid,
                });
            }
        }
        Ok(())
    }

    /// Validate `target_gid` for a `setgid` target. GIDs share UID ranges
    /// but have no least-privilege session match (groups are not
    /// per-session identities).
    pub fn validate_gid(&self, target_gid: u32) -> Result<(), UidPolicyError> {
        let result = self.validate_gid_inner(target_gid);
        log_uid_operation("validate_gid", target_gid, None, &result, self.mode);
        result
    }

    fn validate_gid_inner(&self, target_gid: u32) -> Result<(), UidPolicyError> {
        if target_gid == 0 {
            return Err(UidPolicyError::RootGroupBlocked);
        }
        if target_gid <= self.system_uid_max {
            return Err(UidPolicyError::SystemGroup {
                gid: target_gid,
                system_uid_max: self.system_uid_max,
            });
        }
        if !self.in_active_range(target_gid) {
            let (min, max) = self.active_range();
            return Err(UidPolicyError::GidOutsideRange {
                gid: target_gid,
                min,
                max,
                mode: self.mode,
            });
        }
        Ok(())
    }

    /// Build the seccomp filter program for the current mode: block the
    /// `setuid`/`setreuid`/`setresuid`/`setfsuid` and `setgid` families
    /// (both plain and the `32`-suffixed compat syscalls) from ever
    /// targeting UID/GID 0, a system account, or (in isolated mode) an
    /// out-of-range id.
    pub fn seccomp_profile(&self) -> SeccompProfile {
        let (min, max) = self.active_range();
        let mut syscalls = vec![
            block_rule(&UID_SETTERS, Cmp::Eq, 0, "block setuid to root (uid 0)"),
            block_rule(&GID_SETTERS, Cmp::Eq, 0, "block setgid to root (gid 0)"),
            block_rule(
                &UID_SETTERS,
                Cmp::Le,
                self.system_uid_max,
                "block setuid to system accounts",
            ),
            block_rule(
                &GID_SETTERS,
                Cmp::Le,
                self.system_uid_max,
                "block setgid to system groups",
            ),
        ];
        if self.mode == UidMode::Isolated {
            syscalls.push(block_rule(
                &UID_SETTERS,
                Cmp::Lt,
                min,
                "block setuid below isolated range",
            ));
            syscalls.push(block_rule(
                &UID_SETTERS,
                Cmp::Gt,
                max,
                "block setuid above isolated range",
            ));
            syscalls.push(block_rule(
                &GID_SETTERS,
                Cmp::Lt,
                min,
                "block setgid below isolated range",
            ));
            syscalls.push(block_rule(
                &GID_SETTERS,
                Cmp::Gt,
                max,
                "block setgid above isolated range",
            ));
        }
        SeccompProfile {
            default_action: "SCMP_ACT_ALLOW",
            architectures: vec!["SCMP_ARCH_X86_64", "SCMP_ARCH_X86", "SCMP_ARCH_AARCH64"],
            syscalls,
        }
    }
}

const UID_SETTERS: [&str; 8] = [
    "setuid",
    "setuid32",
    "setreuid",
    "setreuid32",
    "setresuid",
    "setresuid32",
    "setfsuid",
    "setfsuid32",
];

const GID_SETTERS: [&str; 8] = [
    "setgid",
    "setgid32",
    "setregid",
    "setregid32",
    "setresgid",
    "setresgid32",
    "setfsgid",
    "setfsgid32",
];

#[derive(Debug, Clone, Copy, Serialize)]
enum Cmp {
    #[serde(rename = "SCMP_CMP_EQ")]
    Eq,
    #[serde(rename = "SCMP_CMP_LE")]
    Le,
    #[serde(rename = "SCMP_CMP_LT")]
    Lt,
    #[serde(rename = "SCMP_CMP_GT")]
    Gt,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeccompArg {
    index: u32,
    value: u32,
    op: Cmp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeccompRule {
    names: Vec<&'static str>,
    action: &'static str,
    #[serde(rename = "errnoRet")]
    errno_ret: i32,
    args: Vec<SeccompArg>,
    comment: &'static str,
}

fn block_rule(names: &[&'static str], op: Cmp, value: u32, comment: &'static str) -> SeccompRule {
    SeccompRule {
        names: names.to_vec(),
        action: "SCMP_ACT_ERRNO",
        errno_ret: 1, // EPERM
        args: vec![SeccompArg {
            index: 0,
            value,
            op,
        }],
        comment,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeccompProfile {
    #[serde(rename = "defaultAction")]
    default_action: &'static str,
    architectures: Vec<&'static str>,
    syscalls: Vec<SeccompRule>,
}

impl SeccompProfile {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UidPolicyError {
    #[error("SECURITY VIOLATION: UID 0 (root) is blocked unconditionally")]
    RootBlocked,
    #[error("SECURITY VIOLATION: GID 0 (root) is blocked unconditionally")]
    RootGroupBlocked,
    #[error("UID {uid} is a system account (<= {system_uid_max})")]
    SystemAccount { uid: u32, system_uid_max: u32 },
    #[error("GID {gid} is a system group (<= {system_uid_max})")]
    SystemGroup { gid: u32, system_uid_max: u32 },
    #[error("UID {uid} is the API service UID and cannot be used for sandboxed commands")]
    ApiServiceUid { uid: u32 },
    #[error("UID {uid} is outside valid range [{min}, {max}] for mode {mode:?}")]
    OutsideRange {
        uid: u32,
        min: u32,
        max: u32,
        mode: UidMode,
    },
    #[error("GID {gid} is outside valid range [{min}, {max}] for mode {mode:?}")]
    GidOutsideRange {
        gid: u32,
        min: u32,
        max: u32,
        mode: UidMode,
    },
    #[error("UID {uid} does not match session UID {session_uid} (principle of least privilege)")]
    NotLeastPrivilege { uid: u32, session_uid: u32 },
}

fn log_uid_operation(
    operation: &str,
    target: u32,
    session_uid: Option<u32>,
    result: &Result<(), UidPolicyError>,
    mode: UidMode,
) {
    match result {
        Ok(()) => tracing::info!(
            operation,
            target_uid = target,
            ?session_uid,
            ?mode,
            "uid policy decision: allow"
        ),
        Err(reason) => tracing::warn!(
            operation,
            target_uid = target,
            ?session_uid,
            ?mode,
            %reason,
            "uid policy decision: block"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_rejected() {
        let policy = UidPolicy::isolated();
        assert_eq!(policy.validate_uid(0, None), Err(UidPolicyError::RootBlocked));
    }

    #[test]
    fn system_account_is_rejected() {
        let policy = UidPolicy::isolated();
        assert!(matches!(
            policy.validate_uid(500, None),
            Err(UidPolicyError::SystemAccount { .. })
        ));
    }

    #[test]
    fn isolated_range_is_accepted() {
        let policy = UidPolicy::isolated();
        assert_eq!(policy.validate_uid(55_000, None), Ok(()));
    }

    #[test]
    fn least_privilege_mismatch_is_rejected() {
        let policy = UidPolicy::isolated();
        assert!(matches!(
            policy.validate_uid(55_000, Some(55_001)),
            Err(UidPolicyError::NotLeastPrivilege { .. })
        ));
    }

    #[test]
    fn api_service_uid_is_rejected() {
        let policy = UidPolicy::isolated();
        assert!(matches!(
            policy.validate_uid(45_045, None),
            Err(UidPolicyError::ApiServiceUid { .. })
        ));
    }

    #[test]
    fn legacy_range_is_accepted_when_enabled() {
        let policy = UidPolicy::isolated();
        assert_eq!(policy.validate_uid(10_000, None), Ok(()));
    }

    #[test]
    fn legacy_range_is_rejected_when_disabled() {
        let policy = UidPolicy {
            allow_legacy_uids: false,
            ..UidPolicy::isolated()
        };
        assert!(matches!(
            policy.validate_uid(10_000, None),
            Err(UidPolicyError::OutsideRange { .. })
        ));
    }

    #[test]
    fn direct_mode_accepts_host_uids() {
        let policy = UidPolicy::direct();
        assert_eq!(policy.validate_uid(1_500, None), Ok(()));
    }

    #[test]
    fn direct_mode_rejects_out_of_range() {
        let policy = UidPolicy::direct();
        assert!(matches!(
            policy.validate_uid(65_534, None),
            Err(UidPolicyError::OutsideRange { .. })
        ));
    }

    #[test]
    fn gid_zero_is_rejected() {
        let policy = UidPolicy::isolated();
        assert_eq!(policy.validate_gid(0), Err(UidPolicyError::RootGroupBlocked));
    }

    #[test]
    fn seccomp_profile_blocks_root_and_system_for_both_modes() {
        for policy in [UidPolicy::isolated(), UidPolicy::direct()] {
            let profile = policy.seccomp_profile();
            assert!(profile.syscalls.iter().any(|r| r.args[0].value == 0));
            assert_eq!(profile.default_action, "SCMP_ACT_ALLOW");
        }
    }

    #[test]
    fn seccomp_profile_has_range_rules_only_in_isolated_mode() {
        let isolated_rules = UidPolicy::isolated().seccomp_profile().syscalls.len();
        let direct_rules = UidPolicy::direct().seccomp_profile().syscalls.len();
        assert!(isolated_rules > direct_rules);
    }
}
