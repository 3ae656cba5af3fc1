//! Prompt template rendering.
//!
//! Templates contain `@[name]` tokens. A template is parsed into literal and
//! placeholder segments once, then every placeholder is replaced from a flat
//! data map. Substituted values are never scanned again, so a value that
//! itself contains `@[...]` is inserted as-is.

use serde_json::{Map, Value};

/// Token names filled from the data map under the same key.
pub const RECOGNIZED_PLACEHOLDERS: [&str; 6] = ["前文", "后文", "提示词", "字数", "风格", "设定"];

/// Reserved token for the markdown formatting instructions.
pub const MARKDOWN_PLACEHOLDER: &str = "markdown";

/// Data key holding the markdown formatting instructions.
pub const MARKDOWN_KEY: &str = "markdown指令";

/// Data key holding the settings block.
pub const SETTINGS_KEY: &str = "设定";

/// Piece of a parsed template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied unchanged
    Literal(&'a str),
    /// `@[name]`, holding `name`
    Placeholder(&'a str),
}

/// Splits a template into segments.
///
/// A placeholder is `@[` followed by at least one character other than `]`
/// and a closing `]`. Anything else, including `@[]` and an unclosed `@[`, is
/// literal text.
#[must_use]
pub fn parse(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while let Some(offset) = template[cursor..].find("@[") {
        let open = cursor + offset;
        let name_start = open + 2;
        match template[name_start..].find(']') {
            Some(0) => {
                // `@[]` is not a token; rescan from the bracket
                cursor = name_start;
            }
            Some(len) => {
                if literal_start < open {
                    segments.push(Segment::Literal(&template[literal_start..open]));
                }
                segments.push(Segment::Placeholder(&template[name_start..name_start + len]));
                cursor = name_start + len + 1;
                literal_start = cursor;
            }
            None => break,
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }
    segments
}

/// Converts a data value to the text inserted into a prompt.
///
/// Lists are treated as setting entries: enabled ones (a missing flag counts
/// as enabled) with non-empty text become `- text` lines.
#[must_use]
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(entries) => entries
            .iter()
            .filter(|entry| {
                entry
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(true)
            })
            .filter_map(entry_text)
            .map(|text| format!("- {text}"))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => value.to_string(),
    }
}

fn entry_text(entry: &Value) -> Option<String> {
    let text = match entry.get("text")? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Renders a template against a data map.
///
/// Unknown tokens and recognized tokens missing from `data` stay in the
/// output unchanged and are logged as warnings.
#[must_use]
pub fn render(template: &str, data: &Map<String, Value>) -> String {
    let mut output = String::with_capacity(template.len());

    for segment in parse(template) {
        match segment {
            Segment::Literal(text) => output.push_str(text),
            Segment::Placeholder(MARKDOWN_PLACEHOLDER) => {
                if let Some(value) = data.get(MARKDOWN_KEY) {
                    output.push_str(&value_to_text(value));
                }
            }
            Segment::Placeholder(name) => {
                match data.get(name).filter(|_| RECOGNIZED_PLACEHOLDERS.contains(&name)) {
                    Some(value) => output.push_str(&value_to_text(value)),
                    None => {
                        tracing::warn!(
                            "Template placeholder '@[{}]' is unsupported or has no value",
                            name
                        );
                        output.push_str("@[");
                        output.push_str(name);
                        output.push(']');
                    }
                }
            }
        }
    }

    output
}

/// Builds the settings block used by generation requests.
///
/// From a list, keeps entries whose `enabled` is exactly `true` and whose text
/// is non-empty after trimming, as `- text` lines. A plain string is trimmed.
/// Anything else yields an empty block.
#[must_use]
pub fn format_enabled_settings(raw: &Value) -> String {
    match raw {
        Value::Array(entries) => entries
            .iter()
            .filter(|entry| entry.get("enabled") == Some(&Value::Bool(true)))
            .filter_map(entry_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .map(|text| format!("- {text}"))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.trim().to_string(),
        _ => String::new(),
    }
}
