//! Large initial-task-text redirect (spec.md §4.7 step 8): past a
//! configured byte threshold, the task text is written to a workspace file
//! and replaced with a short template pointing the agent at it, so the
//! first turn's prompt doesn't carry the entire payload inline.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct LargeInputOutcome {
    pub processed_text: String,
    pub is_large: bool,
    pub size_display: String,
    pub size_bytes: usize,
}

/// Below `threshold_bytes`, returns `text` unchanged (`is_large=false`) —
/// the round-trip identity law for small input. At or above it, writes
/// `text`'s bytes verbatim to a uniquely-named file under `workspace_path`
/// and substitutes `{filename}`/`{size_display}` into `template`.
/// `now_ms` names the file rather than calling a clock directly, so the
/// function stays pure and testable.
pub fn process_large_user_input(
    text: &str,
    threshold_bytes: usize,
    workspace_path: &Path,
    template: &str,
    now_ms: i64,
) -> std::io::Result<LargeInputOutcome> {
    let size_bytes = text.len();
    let size_display = format_size(size_bytes);
    if size_bytes < threshold_bytes {
        return Ok(LargeInputOutcome {
            processed_text: text.to_string(),
            is_large: false,
            size_display,
            size_bytes,
        });
    }

    let filename = format!("large_task_input_{now_ms}.txt");
    std::fs::write(workspace_path.join(&filename), text.as_bytes())?;
    let processed_text = template
        .replace("{filename}", &filename)
        .replace("{size_display}", &size_display);
    Ok(LargeInputOutcome {
        processed_text,
        is_large: true,
        size_display,
        size_bytes,
    })
}

fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let bytes_f = bytes as f64;
    if bytes_f >= MB {
        format!("{:.1} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.1} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "Task description is large ({size_display}); full text saved to workspace file {filename}.";

    #[test]
    fn below_threshold_is_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = process_large_user_input("short", 200_000, tmp.path(), TEMPLATE, 1).unwrap();
        assert_eq!(outcome.processed_text, "short");
        assert!(!outcome.is_large);
    }

    #[test]
    fn above_threshold_writes_the_file_and_redirects() {
        let tmp = tempfile::tempdir().unwrap();
        let text = "x".repeat(350_000);
        let outcome = process_large_user_input(&text, 200_000, tmp.path(), TEMPLATE, 42).unwrap();
        assert!(outcome.is_large);
        assert_eq!(outcome.size_bytes, 350_000);
        let filename = "large_task_input_42.txt";
        assert!(outcome.processed_text.contains(filename));
        let written = std::fs::read(tmp.path().join(filename)).unwrap();
        assert_eq!(written.len(), 350_000);
        assert_eq!(written, text.as_bytes());
    }
}
