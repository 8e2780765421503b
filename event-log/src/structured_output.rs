//! Parses the optional `---\nstatus: ...\nerror: ...\n---` header an agent
//! may prepend to a message, separating it from the message body.

use std::collections::BTreeMap;

const ERROR_PLACEHOLDERS: &[&str] = &[
    "none",
    "none yet",
    "no error",
    "no errors",
    "n/a",
    "na",
    "null",
    "undefined",
    "empty",
    "-",
    "",
];

/// Collapse placeholder error text ("none", "n/a", ...) down to an empty
/// string; anything else is returned trimmed but otherwise unchanged.
pub fn normalize_error_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return String::new();
    }
    if ERROR_PLACEHOLDERS.contains(&normalized.as_str()) {
        return String::new();
    }
    if normalized.starts_with("none yet") || normalized.starts_with("no error") {
        return String::new();
    }
    value.trim().to_string()
}

/// Parse a `---`-delimited header block from the start of `text`. Returns
/// the parsed `key: value` fields (lowercased keys, `error` normalized) and
/// the remaining body. If no valid header is present, `fields` is empty and
/// `body` is `text` unchanged.
pub fn parse_structured_output(text: &str) -> (BTreeMap<String, String>, String) {
    if text.is_empty() {
        return (BTreeMap::new(), text.to_string());
    }

    let mut payload = text;
    if payload.starts_with("```") {
        match payload.find('\n') {
            Some(idx) => payload = &payload[idx + 1..],
            None => return (BTreeMap::new(), text.to_string()),
        }
    }

    let lines: Vec<&str> = payload.lines().collect();
    if lines.len() < 3 || lines[0].trim() != "---" {
        return (BTreeMap::new(), text.to_string());
    }

    let end_index = lines.iter().skip(1).position(|l| l.trim() == "---").map(|i| i + 1);
    let Some(end_index) = end_index else {
        return (BTreeMap::new(), text.to_string());
    };

    let mut fields = BTreeMap::new();
    for line in &lines[1..end_index] {
        if line.trim().is_empty() || !line.contains(':') {
            continue;
        }
        let (key, value) = line.split_once(':').expect("checked above");
        let key = key.trim().to_lowercase();
        let mut value = value.trim().to_string();
        if key.is_empty() {
            continue;
        }
        if key == "error" {
            value = normalize_error_value(&value);
        }
        fields.insert(key, value);
    }

    let mut body_lines = &lines[end_index + 1..];
    if let Some(first) = body_lines.first() {
        if first.trim().starts_with("```") {
            body_lines = &body_lines[1..];
        }
    }
    let mut body = body_lines.join("\n");
    if let Some(stripped) = body.strip_prefix('\n') {
        body = stripped.to_string();
    }

    (fields, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_returns_original_text_unchanged() {
        let (fields, body) = parse_structured_output("just a plain message");
        assert!(fields.is_empty());
        assert_eq!(body, "just a plain message");
    }

    #[test]
    fn header_fields_are_extracted_and_lowercased() {
        let (fields, body) = parse_structured_output("---\nStatus: COMPLETE\nerror: none\n---\nthe body");
        assert_eq!(fields.get("status"), Some(&"COMPLETE".to_string()));
        assert_eq!(fields.get("error"), Some(&String::new()));
        assert_eq!(body, "the body");
    }

    #[test]
    fn real_error_text_survives_normalization() {
        let (fields, _) = parse_structured_output("---\nstatus: FAILED\nerror: disk full\n---\nbody");
        assert_eq!(fields.get("error"), Some(&"disk full".to_string()));
    }

    #[test]
    fn fenced_header_is_unwrapped_first() {
        let (fields, body) = parse_structured_output("```\n---\nstatus: COMPLETE\n---\nbody\n```");
        assert_eq!(fields.get("status"), Some(&"COMPLETE".to_string()));
        assert!(body.contains("body"));
    }

    #[test]
    fn placeholder_variants_all_normalize_to_empty() {
        for p in ["None", "  N/A ", "NO ERRORS", "none yet, still running"] {
            assert_eq!(normalize_error_value(p), "");
        }
    }
}
