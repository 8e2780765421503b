//! Canonical agent-facing path namespace (`/workspace/...`) translated to
//! real host paths across a workspace root and a set of overlays, plus the
//! validation pipeline every tool-handler path flows through before it
//! touches the filesystem.
//!
//! Session state is kept in an explicit, lock-guarded [`PathResolver`]
//! registry rather than an ambient global map: `configure`/`get`/`cleanup`
//! are the only ways in or out.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use wildmatch::WildMatch;

const WORKSPACE_ROOT: &str = "/workspace";
const EXTERNAL_RO: &str = "/workspace/external/ro/";
const EXTERNAL_RW: &str = "/workspace/external/rw/";
const EXTERNAL_PERSISTENT: &str = "/workspace/external/persistent";

/// Reserved overlay name under which the single configured global
/// (non-per-user) read-only/read-write overlay is reachable, the same way
/// `mount_service.py`'s global mounts carry a `name` and live in the same
/// `external/{ro,rw}/<name>/...` namespace as per-user mounts — they're just
/// not filtered by username.
const GLOBAL_OVERLAY_NAME: &str = "global";

const DEFAULT_BLOCKLIST: &[&str] = &["*.env", "*.key", ".git/**", "__pycache__/**", "*.pyc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Edit,
    Delete,
    List,
    Glob,
    Grep,
}

impl Operation {
    fn is_mutating(self) -> bool {
        matches!(self, Operation::Write | Operation::Edit | Operation::Delete)
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub real_path: PathBuf,
    pub is_readonly: bool,
    pub allow_directory: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("PATH_OUTSIDE_ALLOWED: {0}")]
    OutsideAllowed(String),
    #[error("PATH_BLOCKED: {0}")]
    BlockedByPolicy(String),
    #[error("PATH_NOT_IN_ALLOWLIST: {0}")]
    NotInAllowlist(String),
    #[error("PATH_READ_ONLY: {0}")]
    ReadOnly(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("no resolver configured for session {0}")]
    SessionNotConfigured(String),
}

/// Per-session configuration: the real workspace root plus the overlay
/// roots that make up the canonical `/workspace/external/...` namespace.
#[derive(Debug, Clone, Default)]
pub struct SessionPaths {
    pub workspace_path: PathBuf,
    pub readonly_overlay_base: Option<PathBuf>,
    pub readwrite_overlay_base: Option<PathBuf>,
    pub per_user_readonly: HashMap<String, PathBuf>,
    pub per_user_readwrite: HashMap<String, PathBuf>,
    pub persistent_path: Option<PathBuf>,
    pub readonly_prefixes: Vec<PathBuf>,
    pub blocklist: Vec<String>,
    pub allowlist: Option<Vec<String>>,
    pub username: Option<String>,
}

impl SessionPaths {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            blocklist: DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Translate a canonical agent-facing path into a real host path.
    /// Returns `None` if the path references an overlay name that isn't
    /// configured for this session.
    fn translate(&self, canonical: &str) -> Option<PathBuf> {
        if let Some(rest) = canonical.strip_prefix(EXTERNAL_RO) {
            let (name, tail) = split_first_segment(rest);
            if name == GLOBAL_OVERLAY_NAME {
                return self.readonly_overlay_base.as_ref().map(|base| join_tail(base, tail));
            }
            return self
                .per_user_readonly
                .get(name)
                .map(|base| join_tail(base, tail));
        }
        if let Some(rest) = canonical.strip_prefix(EXTERNAL_RW) {
            let (name, tail) = split_first_segment(rest);
            if name == GLOBAL_OVERLAY_NAME {
                return self.readwrite_overlay_base.as_ref().map(|base| join_tail(base, tail));
            }
            return self
                .per_user_readwrite
                .get(name)
                .map(|base| join_tail(base, tail));
        }
        if let Some(rest) = canonical.strip_prefix(EXTERNAL_PERSISTENT) {
            return self
                .persistent_path
                .as_ref()
                .map(|base| join_tail(base, rest.trim_start_matches('/')));
        }
        let rest = canonical
            .strip_prefix(WORKSPACE_ROOT)
            .unwrap_or(canonical)
            .trim_start_matches('/');
        Some(join_tail(&self.workspace_path, rest))
    }

    fn is_readonly_path(&self, real_path: &Path) -> bool {
        if let Some(ro_base) = &self.readonly_overlay_base {
            if real_path.starts_with(ro_base) {
                return true;
            }
        }
        if self
            .per_user_readonly
            .values()
            .any(|p| real_path.starts_with(p))
        {
            return true;
        }
        self.readonly_prefixes
            .iter()
            .any(|p| real_path.starts_with(p))
    }

    fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.workspace_path.clone()];
        roots.extend(self.readonly_overlay_base.clone());
        roots.extend(self.readwrite_overlay_base.clone());
        roots.extend(self.per_user_readonly.values().cloned());
        roots.extend(self.per_user_readwrite.values().cloned());
        roots.extend(self.persistent_path.clone());
        roots
    }
}

fn split_first_segment(rest: &str) -> (&str, &str) {
    match rest.split_once('/') {
        Some((name, tail)) => (name, tail),
        None => (rest, ""),
    }
}

fn join_tail(base: &Path, tail: &str) -> PathBuf {
    if tail.is_empty() {
        base.to_path_buf()
    } else {
        base.join(tail)
    }
}

/// Normalize `.` / `..` components without touching the filesystem; used
/// before canonicalization so that non-existent paths (new files) can
/// still be boundary-checked.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn has_control_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control() && c != '\t')
}

/// Session-scoped registry: `configure`/`get`/`cleanup`. Multiple sessions
/// coexist with independent workspace roots; there is no fallback to
/// process-global state.
#[derive(Default)]
pub struct PathResolver {
    sessions: Mutex<HashMap<String, SessionPaths>>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, session_id: impl Into<String>, paths: SessionPaths) {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(session_id.into(), paths);
    }

    pub fn cleanup(&self, session_id: &str) {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(session_id);
    }

    fn get(&self, session_id: &str) -> Result<SessionPaths, ValidationError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| ValidationError::SessionNotConfigured(session_id.to_string()))
    }

    /// Run the full seven-step validation pipeline for `path` under
    /// `operation`, scoped to `session_id`'s configured roots.
    pub fn validate_path(
        &self,
        session_id: &str,
        path: &str,
        operation: Operation,
    ) -> Result<Resolved, ValidationError> {
        let session = self.get(session_id)?;
        validate_path_with(&session, path, operation)
    }
}

/// The validation pipeline, free of the registry so it can be tested and
/// reused without constructing a [`PathResolver`].
pub fn validate_path_with(
    session: &SessionPaths,
    path: &str,
    operation: Operation,
) -> Result<Resolved, ValidationError> {
    if has_control_chars(path) {
        return Err(ValidationError::InvalidPath(
            "path contains control characters".to_string(),
        ));
    }
    if path.is_empty() || path == "." {
        return Ok(Resolved {
            real_path: session.workspace_path.clone(),
            is_readonly: false,
            allow_directory: true,
        });
    }

    // Step 1: normalize — strip the canonical /workspace prefix (done in
    // `translate`) and resolve relative to the workspace.
    let translated = session
        .translate(path)
        .ok_or_else(|| ValidationError::OutsideAllowed(path.to_string()))?;
    let normalized = normalize(&translated);

    // Step 2: resolve the real path, following symlinks when the target
    // exists; a broken symlink or missing path is treated as "new file
    // under an existing parent" rather than an error here.
    let resolved = match std::fs::canonicalize(&normalized) {
        Ok(resolved) => resolved,
        Err(_) => match normalized.parent().map(std::fs::canonicalize) {
            Some(Ok(parent)) => parent.join(
                normalized
                    .file_name()
                    .ok_or_else(|| ValidationError::InvalidPath(path.to_string()))?,
            ),
            _ => normalized.clone(),
        },
    };

    // Step 3: boundary check.
    let roots = session.allowed_roots();
    if !roots.iter().any(|root| {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
        resolved.starts_with(&root)
    }) {
        return Err(ValidationError::OutsideAllowed(format!(
            "{} escapes all allowed roots",
            resolved.display()
        )));
    }

    // Step 4: blocklist, matched against the canonical (agent-facing) form.
    let canonical_str = path.trim_start_matches('/');
    if session
        .blocklist
        .iter()
        .any(|pattern| WildMatch::new(pattern).matches(canonical_str))
    {
        return Err(ValidationError::BlockedByPolicy(path.to_string()));
    }

    // Step 5: allowlist, if configured.
    if let Some(allowlist) = &session.allowlist {
        if !allowlist
            .iter()
            .any(|pattern| WildMatch::new(pattern).matches(canonical_str))
        {
            return Err(ValidationError::NotInAllowlist(path.to_string()));
        }
    }

    // Step 6: read-only prefix check.
    let is_readonly = session.is_readonly_path(&resolved);
    if operation.is_mutating() && is_readonly {
        return Err(ValidationError::ReadOnly(path.to_string()));
    }

    Ok(Resolved {
        real_path: resolved,
        is_readonly,
        allow_directory: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace() -> (tempfile::TempDir, SessionPaths) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), b"print(1)").unwrap();
        fs::write(dir.path().join(".env"), b"SECRET=1").unwrap();
        let paths = SessionPaths::new(dir.path());
        (dir, paths)
    }

    #[test]
    fn traversal_outside_workspace_is_rejected() {
        let (_dir, session) = workspace();
        let err = validate_path_with(&session, "../etc/passwd", Operation::Read).unwrap_err();
        assert!(matches!(err, ValidationError::OutsideAllowed(_)));
    }

    #[test]
    fn blocklisted_file_is_rejected() {
        let (_dir, session) = workspace();
        let err = validate_path_with(&session, ".env", Operation::Read).unwrap_err();
        assert!(matches!(err, ValidationError::BlockedByPolicy(_)));
    }

    #[test]
    fn ordinary_workspace_file_is_accepted() {
        let (_dir, session) = workspace();
        let resolved = validate_path_with(&session, "./main.py", Operation::Read).unwrap();
        assert!(!resolved.is_readonly);
        assert!(resolved.real_path.ends_with("main.py"));
    }

    #[test]
    fn write_under_readonly_overlay_is_rejected() {
        let (dir, mut session) = workspace();
        let ro_dir = dir.path().join("ro");
        fs::create_dir(&ro_dir).unwrap();
        fs::write(ro_dir.join("skill.md"), b"# skill").unwrap();
        session.per_user_readonly.insert("skills".into(), ro_dir);
        let err = validate_path_with(
            &session,
            "/workspace/external/ro/skills/skill.md",
            Operation::Write,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::ReadOnly(_)));
    }

    #[test]
    fn empty_path_resolves_to_workspace_root() {
        let (_dir, session) = workspace();
        let resolved = validate_path_with(&session, "", Operation::List).unwrap();
        assert!(resolved.allow_directory);
        assert_eq!(resolved.real_path, session.workspace_path);
    }

    #[test]
    fn control_chars_are_rejected() {
        let (_dir, session) = workspace();
        let err = validate_path_with(&session, "foo\u{0000}bar", Operation::Read).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPath(_)));
    }

    #[test]
    fn global_readonly_overlay_is_reachable_through_the_reserved_name() {
        let (dir, mut session) = workspace();
        let ro_dir = dir.path().join("global-ro");
        fs::create_dir(&ro_dir).unwrap();
        fs::write(ro_dir.join("notes.md"), b"# notes").unwrap();
        session.readonly_overlay_base = Some(ro_dir);
        let resolved = validate_path_with(
            &session,
            "/workspace/external/ro/global/notes.md",
            Operation::Read,
        )
        .unwrap();
        assert!(resolved.is_readonly);
        assert!(resolved.real_path.ends_with("notes.md"));
    }

    #[test]
    fn write_under_global_readonly_overlay_is_rejected() {
        let (dir, mut session) = workspace();
        let ro_dir = dir.path().join("global-ro");
        fs::create_dir(&ro_dir).unwrap();
        fs::write(ro_dir.join("notes.md"), b"# notes").unwrap();
        session.readonly_overlay_base = Some(ro_dir);
        let err = validate_path_with(
            &session,
            "/workspace/external/ro/global/notes.md",
            Operation::Write,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::ReadOnly(_)));
    }

    #[test]
    fn registry_is_session_scoped() {
        let resolver = PathResolver::new();
        let (_dir, session) = workspace();
        resolver.configure("sess-1", session);
        assert!(resolver.validate_path("sess-1", "main.py", Operation::Read).is_ok());
        assert!(matches!(
            resolver.validate_path("sess-2", "main.py", Operation::Read),
            Err(ValidationError::SessionNotConfigured(_))
        ));
        resolver.cleanup("sess-1");
        assert!(matches!(
            resolver.validate_path("sess-1", "main.py", Operation::Read),
            Err(ValidationError::SessionNotConfigured(_))
        ));
    }
}
