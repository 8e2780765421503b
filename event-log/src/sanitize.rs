//! Text sanitization applied to event payloads before they reach a UI:
//! strip internal system-reminder blocks, rewrite fully-qualified MCP tool
//! names down to their bare tool name, and fold an attached-files block
//! down to a single compact JSON tag.

use regex_lite::Regex;
use serde::Serialize;
use std::sync::LazyLock;

const MAX_FILENAME_LENGTH: usize = 255;
const MAX_MIME_LENGTH: usize = 100;
const MAX_EXTENSION_LENGTH: usize = 10;
const MAX_SIZE_STRING_LENGTH: usize = 20;
const MAX_SIZE_BYTES: i64 = 1_000_000_000_000_000;
const ATTACHED_FILE_TAG: &str = "sandboxd-attached-file";

static SYSTEM_REMINDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").expect("static pattern")
});

// `mcp__<server>__<Tool>` -> `<Tool>`, for any server name, not just one
// hardcoded vendor's MCP bridge.
static MCP_TOOL_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mcp__[A-Za-z0-9_-]+__([A-Za-z0-9_-]+)").expect("static pattern"));

static ATTACHED_FILES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<attached-files>(.*?)</attached-files>").expect("static pattern")
});

static LEGACY_FILE_ENTRY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^-\s*(.+)$").expect("static pattern"));

static LAST_MODIFIED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static pattern"));

/// Remove every `<system-reminder>...</system-reminder>` block verbatim.
pub fn strip_system_reminders(text: &str) -> String {
    SYSTEM_REMINDER_PATTERN.replace_all(text, "").into_owned()
}

/// Rewrite `mcp__<server>__<Tool>` occurrences down to `<Tool>`.
pub fn sanitize_tool_names_in_text(text: &str) -> String {
    MCP_TOOL_NAME_PATTERN.replace_all(text, "$1").into_owned()
}

#[derive(Debug, Clone, Serialize)]
struct AttachedFileSummary {
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
}

fn sanitize_filename(raw: &str) -> String {
    let trimmed = raw.trim();
    truncate_chars(trimmed, MAX_FILENAME_LENGTH)
}

fn sanitize_mime_type(raw: &str) -> String {
    truncate_chars(raw.trim(), MAX_MIME_LENGTH)
}

fn sanitize_extension(raw: &str) -> String {
    truncate_chars(raw.trim().trim_start_matches('.'), MAX_EXTENSION_LENGTH)
}

fn sanitize_size_formatted(raw: &str) -> String {
    truncate_chars(raw.trim(), MAX_SIZE_STRING_LENGTH)
}

fn sanitize_last_modified(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() > 30 || !LAST_MODIFIED_PATTERN.is_match(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn clamp_size_bytes(value: i64) -> i64 {
    value.clamp(0, MAX_SIZE_BYTES)
}

/// A loosely-typed entry from either the YAML or legacy-bullet attached
/// files sub-format, before per-field sanitization.
struct RawFileEntry {
    name: String,
    mime_type: Option<String>,
    extension: Option<String>,
    size_formatted: Option<String>,
    last_modified: Option<String>,
}

fn parse_yaml_files(body: &str) -> Option<Vec<RawFileEntry>> {
    let value: serde_yaml::Value = serde_yaml::from_str(body).ok()?;
    let files = value.get("files")?.as_sequence()?;
    let mut out = Vec::with_capacity(files.len());
    for entry in files {
        let name = entry.get("name")?.as_str()?.to_string();
        let mime_type = entry.get("mime_type").and_then(|v| v.as_str()).map(str::to_string);
        let extension = entry.get("extension").and_then(|v| v.as_str()).map(str::to_string);
        let size_formatted = entry.get("size").map(|v| match v {
            serde_yaml::Value::Number(n) => {
                let bytes = n.as_i64().unwrap_or(0);
                format_size(clamp_size_bytes(bytes))
            }
            serde_yaml::Value::String(s) => s.clone(),
            _ => String::new(),
        });
        let last_modified = entry
            .get("last_modified")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        out.push(RawFileEntry {
            name,
            mime_type,
            extension,
            size_formatted,
            last_modified,
        });
    }
    Some(out)
}

fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn parse_legacy_files(body: &str) -> Vec<RawFileEntry> {
    LEGACY_FILE_ENTRY_PATTERN
        .captures_iter(body)
        .map(|caps| RawFileEntry {
            name: caps[1].trim().to_string(),
            mime_type: None,
            extension: None,
            size_formatted: None,
            last_modified: None,
        })
        .collect()
}

/// Replace every `<attached-files>...</attached-files>` block with a
/// compact `<sandboxd-attached-file>[...]</sandboxd-attached-file>` JSON
/// tag. A block that yields zero parsed entries is removed outright rather
/// than replaced with an empty tag.
pub fn transform_attached_files(text: &str) -> String {
    ATTACHED_FILES_PATTERN
        .replace_all(text, |caps: &regex_lite::Captures| {
            let body = caps[1].trim();
            let raw = parse_yaml_files(body).unwrap_or_else(|| parse_legacy_files(body));
            if raw.is_empty() {
                return String::new();
            }
            let summaries: Vec<AttachedFileSummary> = raw
                .into_iter()
                .map(|r| AttachedFileSummary {
                    filename: sanitize_filename(&r.name),
                    mime_type: r.mime_type.as_deref().map(sanitize_mime_type),
                    extension: r.extension.as_deref().map(sanitize_extension),
                    size_formatted: r.size_formatted.as_deref().map(sanitize_size_formatted),
                    last_modified: r.last_modified.as_deref().and_then(sanitize_last_modified),
                })
                .collect();
            let json = serde_json::to_string(&summaries).unwrap_or_else(|_| "[]".to_string());
            format!("<{ATTACHED_FILE_TAG}>{json}</{ATTACHED_FILE_TAG}>")
        })
        .into_owned()
}

/// Full display-sanitization pipeline, applied in order: strip reminders,
/// rewrite MCP tool names, then fold attached-file blocks.
pub fn sanitize_text_for_display(text: &str) -> String {
    let text = strip_system_reminders(text);
    let text = sanitize_tool_names_in_text(&text);
    transform_attached_files(&text)
}
