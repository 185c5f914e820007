//! Pulls structured JSON fragments out of free-form process output.
//!
//! Output lines may wrap a JSON object in prose, colour codes or log
//! prefixes. Each line is tried as a whole first; failing that, the first
//! balanced `{...}` span is cut out and parsed. Nothing here ever fails:
//! a line that yields no object simply contributes nothing.

use serde_json::Value;

use crate::events::classify;
use crate::events::StreamEvent;

/// Longest line handed to the parser; anything beyond is cut.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const TRUNCATION_MARKER: &str = "...[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    OutsideString,
    InsideString,
    Escaped,
}

/// Every JSON object found in `text`, one at most per line, in line order.
pub fn extract_fragments(text: &str) -> Vec<Value> {
    text.lines().filter_map(extract_from_line).collect()
}

/// Fragments classified by discriminator. Unrecognized shapes are dropped.
pub fn extract_events(text: &str) -> Vec<StreamEvent> {
    extract_fragments(text)
        .iter()
        .filter_map(|fragment| {
            let event = classify(fragment);
            if event.is_none() {
                tracing::trace!(%fragment, "ignoring unrecognized fragment");
            }
            event
        })
        .collect()
}

fn extract_from_line(raw: &str) -> Option<Value> {
    let line = clean_line(raw);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(line) {
        return match value {
            Value::Object(_) => Some(value),
            // Some emitters print the JSON text as a JSON string.
            Value::String(inner) => serde_json::from_str::<Value>(&inner)
                .ok()
                .filter(Value::is_object),
            _ => None,
        };
    }

    let span = first_balanced_span(line)?;
    serde_json::from_str::<Value>(span)
        .ok()
        .filter(Value::is_object)
}

/// Finds the first top-level `{...}` span, ignoring braces inside quoted
/// strings. Quotes are only tracked once a brace has been opened.
fn first_balanced_span(line: &str) -> Option<&str> {
    let mut state = ScanState::OutsideString;
    let mut depth = 0usize;
    let mut start = None;

    for (idx, ch) in line.char_indices() {
        match state {
            ScanState::Escaped => state = ScanState::InsideString,
            ScanState::InsideString => match ch {
                '\\' => state = ScanState::Escaped,
                '"' => state = ScanState::OutsideString,
                _ => {}
            },
            ScanState::OutsideString => match ch {
                '"' if depth > 0 => state = ScanState::InsideString,
                '{' => {
                    if depth == 0 {
                        start = Some(idx);
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return start.map(|begin| &line[begin..=idx]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Strips escape sequences and caps the line at [`MAX_LINE_BYTES`].
pub fn clean_line(raw: &str) -> String {
    truncate_line(strip_ansi_sequences(raw))
}

pub fn truncate_line(mut line: String) -> String {
    if line.len() <= MAX_LINE_BYTES {
        return line;
    }
    let mut cut = MAX_LINE_BYTES;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    line.push_str(TRUNCATION_MARKER);
    line
}

/// Removes CSI escape sequences and carriage returns.
pub fn strip_ansi_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
            }
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::events::InputRequestEvent;

    #[test]
    fn finds_object_embedded_in_prose() {
        let fragments = extract_fragments(
            r#"noise {"kind":"inputRequest","prompt":"Name?","isSecret":false} trailing"#,
        );
        assert_eq!(
            fragments,
            vec![json!({"kind": "inputRequest", "prompt": "Name?", "isSecret": false})]
        );
    }

    #[test]
    fn unbalanced_braces_yield_nothing() {
        assert!(extract_fragments(r#"start {"kind": "text", "content": {"a": 1}"#).is_empty());
        assert!(extract_fragments("}}} {{").is_empty());
        assert!(extract_fragments("{not json at all}").is_empty());
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_span() {
        let fragments = extract_fragments(
            r#"[agent] {"type": "text", "content": "a } brace and \"quoted {\" text"} done"#,
        );
        assert_eq!(
            fragments,
            vec![json!({"type": "text", "content": "a } brace and \"quoted {\" text"})]
        );
    }

    #[test]
    fn quotes_before_the_first_brace_are_prose() {
        let fragments = extract_fragments(r#"it said "hi {"type": "text"}"#);
        assert_eq!(fragments, vec![json!({"type": "text"})]);
    }

    #[test]
    fn handles_multiple_lines_and_skips_non_objects() {
        let text = "plain text\n[1, 2, 3]\n42\n{\"type\": \"print\"}\r\n\n{\"type\": \"text\"}";
        assert_eq!(
            extract_fragments(text),
            vec![json!({"type": "print"}), json!({"type": "text"})]
        );
    }

    #[test]
    fn unwraps_double_encoded_objects() {
        let line = serde_json::to_string(&json!({"type": "text"}).to_string()).expect("encode");
        assert_eq!(extract_fragments(&line), vec![json!({"type": "text"})]);
        assert!(extract_fragments(r#""just a string""#).is_empty());
    }

    #[test]
    fn strips_escape_sequences_before_parsing() {
        let line = "\u{1b}[32m{\"type\": \"text\"}\u{1b}[0m";
        assert_eq!(extract_fragments(line), vec![json!({"type": "text"})]);
    }

    #[test]
    fn oversized_lines_are_truncated() {
        let line = "é".repeat(MAX_LINE_BYTES);
        let truncated = truncate_line(line);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.len() <= MAX_LINE_BYTES + TRUNCATION_MARKER.len());
    }

    #[test]
    fn events_are_classified_and_unknown_shapes_dropped() {
        let text = concat!(
            r#"{"type": "mystery"}"#,
            "\n",
            r#"prefix {"kind":"inputRequest","prompt":"Name?","isSecret":false}"#,
        );
        assert_eq!(
            extract_events(text),
            vec![StreamEvent::InputRequest(InputRequestEvent {
                request_id: None,
                prompt: "Name?".to_string(),
                is_secret: false,
            })]
        );
    }
}
