use serde_json::Value;

/// Message kinds that belong to a conversation transcript.
const CHAT_KINDS: [&str; 18] = [
    "text",
    "print",
    "group_chat_run_chat",
    "using_auto_reply",
    "tool_call",
    "tool_response",
    "function_call",
    "function_response",
    "execute_function",
    "executed_function",
    "execute_code_block",
    "speaker_selection",
    "select_speaker",
    "select_speaker_invalid_input",
    "post_carryover_processing",
    "clear_agents_history",
    "generate_code_execution_reply",
    "termination_and_human_reply_no_input",
];

/// A structured fragment classified by its discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    InputRequest(InputRequestEvent),
    Chat(ChatEvent),
    Step(StepEvent),
    Lifecycle(LifecycleEvent),
    Diagnostic(Diagnostic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequestEvent {
    pub request_id: Option<String>,
    pub prompt: String,
    pub is_secret: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message { kind: String, payload: Value },
    Timeline(Value),
    Participants(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    ControlRequest {
        request_id: Option<String>,
        prompt: String,
    },
    Event(Value),
    Help(Value),
    Error(String),
    Breakpoints(Vec<Value>),
    Config {
        step_mode: Option<bool>,
        auto_continue: Option<bool>,
    },
    Print(String),
    Stats(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Termination(Value),
    Completion(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// `inputRequest`, `input-request` and `input_request` all become
/// `input_request`.
pub fn normalize_kind(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for (idx, ch) in raw.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn discriminator(fragment: &Value) -> Option<String> {
    fragment
        .get("type")
        .or_else(|| fragment.get("kind"))
        .and_then(Value::as_str)
        .map(normalize_kind)
}

/// Maps a fragment to the event it represents, or `None` for shapes that
/// are not part of the protocol.
pub fn classify(fragment: &Value) -> Option<StreamEvent> {
    let kind = discriminator(fragment)?;
    let event = match kind.as_str() {
        "input_request" => StreamEvent::InputRequest(InputRequestEvent {
            request_id: string_field(fragment, &["request_id", "requestId"]),
            prompt: string_field(fragment, &["prompt"]).unwrap_or_default(),
            is_secret: secret_flag(fragment),
        }),
        "debug_input_request" => StreamEvent::Step(StepEvent::ControlRequest {
            request_id: string_field(fragment, &["request_id", "requestId"]),
            prompt: string_field(fragment, &["prompt"]).unwrap_or_default(),
        }),
        "debug_event" => StreamEvent::Step(StepEvent::Event(inner(fragment, "event"))),
        "debug_help" => StreamEvent::Step(StepEvent::Help(inner(fragment, "help"))),
        "debug_error" => StreamEvent::Step(StepEvent::Error(
            string_field(fragment, &["error", "message"]).unwrap_or_else(|| "debugger error".to_string()),
        )),
        "debug_breakpoints_list" | "debug_breakpoints" => {
            StreamEvent::Step(StepEvent::Breakpoints(array_field(fragment, "breakpoints")))
        }
        "debug_config" | "debug_step_mode" => StreamEvent::Step(StepEvent::Config {
            step_mode: bool_field(fragment, &["step_mode", "stepMode"]),
            auto_continue: bool_field(fragment, &["auto_continue", "autoContinue"]),
        }),
        "debug_print" => StreamEvent::Step(StepEvent::Print(
            string_field(fragment, &["content", "message"]).unwrap_or_default(),
        )),
        "debug_stats" => StreamEvent::Step(StepEvent::Stats(inner(fragment, "stats"))),
        "timeline" => StreamEvent::Chat(ChatEvent::Timeline(timeline_of(fragment))),
        "participants" => StreamEvent::Chat(ChatEvent::Participants(participants_of(fragment))),
        "termination" => StreamEvent::Lifecycle(LifecycleEvent::Termination(fragment.clone())),
        "run_completion" => StreamEvent::Lifecycle(LifecycleEvent::Completion(fragment.clone())),
        "error" | "warning" => StreamEvent::Diagnostic(Diagnostic {
            level: if kind == "error" {
                DiagnosticLevel::Error
            } else {
                DiagnosticLevel::Warning
            },
            message: string_field(fragment, &["message", "error", "content"])
                .unwrap_or_else(|| fragment.to_string()),
        }),
        other if CHAT_KINDS.contains(&other) => StreamEvent::Chat(ChatEvent::Message {
            kind,
            payload: fragment.clone(),
        }),
        _ => return None,
    };
    Some(event)
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn bool_field(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_bool))
}

fn array_field(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// `password` may arrive as a bool or as a "True"/"false" string.
fn secret_flag(value: &Value) -> bool {
    ["is_secret", "isSecret", "password"]
        .iter()
        .find_map(|key| match value.get(*key)? {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => Some(text.eq_ignore_ascii_case("true")),
            _ => None,
        })
        .unwrap_or(false)
}

fn inner(fragment: &Value, key: &str) -> Value {
    fragment
        .get(key)
        .filter(|value| !value.is_null())
        .cloned()
        .unwrap_or_else(|| fragment.clone())
}

fn timeline_of(fragment: &Value) -> Value {
    fragment
        .get("content")
        .filter(|content| content.is_object())
        .map(|content| inner(content, "timeline"))
        .or_else(|| fragment.get("timeline").cloned())
        .unwrap_or_else(|| fragment.clone())
}

fn participants_of(fragment: &Value) -> Vec<Value> {
    let direct = array_field(fragment, "participants");
    if !direct.is_empty() {
        return direct;
    }
    fragment
        .get("content")
        .map(|content| array_field(content, "participants"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn normalizes_discriminator_spellings() {
        assert_eq!(normalize_kind("inputRequest"), "input_request");
        assert_eq!(normalize_kind("debug_input_request"), "debug_input_request");
        assert_eq!(normalize_kind("run-end"), "run_end");
        assert_eq!(normalize_kind("DebugEvent"), "debug_event");
    }

    #[test]
    fn classifies_input_requests_from_either_field() {
        let from_kind = classify(&json!({"kind": "inputRequest", "prompt": "Name?", "isSecret": false}));
        let from_type = classify(&json!({
            "type": "input_request", "request_id": "r1", "prompt": "> ", "password": "True"
        }));

        assert_eq!(
            from_kind,
            Some(StreamEvent::InputRequest(InputRequestEvent {
                request_id: None,
                prompt: "Name?".to_string(),
                is_secret: false,
            }))
        );
        assert_eq!(
            from_type,
            Some(StreamEvent::InputRequest(InputRequestEvent {
                request_id: Some("r1".to_string()),
                prompt: "> ".to_string(),
                is_secret: true,
            }))
        );
    }

    #[test]
    fn classifies_debug_payloads() {
        let event = classify(&json!({"type": "debug_event", "event": {"id": "e1", "type": "message"}}));
        assert_eq!(
            event,
            Some(StreamEvent::Step(StepEvent::Event(json!({"id": "e1", "type": "message"}))))
        );

        let config = classify(&json!({"type": "debug_config", "auto_continue": true}));
        assert_eq!(
            config,
            Some(StreamEvent::Step(StepEvent::Config {
                step_mode: None,
                auto_continue: Some(true),
            }))
        );

        let request = classify(&json!({"type": "debug_input_request", "request_id": "d1", "prompt": "[c]ontinue"}));
        assert!(matches!(
            request,
            Some(StreamEvent::Step(StepEvent::ControlRequest { request_id: Some(id), .. })) if id == "d1"
        ));
    }

    #[test]
    fn classifies_chat_lifecycle_and_diagnostics() {
        assert!(matches!(
            classify(&json!({"type": "text", "content": "hi"})),
            Some(StreamEvent::Chat(ChatEvent::Message { kind, .. })) if kind == "text"
        ));
        assert_eq!(
            classify(&json!({"type": "timeline", "content": {"timeline": [1, 2]}})),
            Some(StreamEvent::Chat(ChatEvent::Timeline(json!([1, 2]))))
        );
        assert!(matches!(
            classify(&json!({"type": "run_completion", "summary": "done"})),
            Some(StreamEvent::Lifecycle(LifecycleEvent::Completion(_)))
        ));
        assert_eq!(
            classify(&json!({"type": "error", "message": "boom"})),
            Some(StreamEvent::Diagnostic(Diagnostic {
                level: DiagnosticLevel::Error,
                message: "boom".to_string(),
            }))
        );
    }

    #[test]
    fn unknown_or_missing_discriminators_are_ignored() {
        assert_eq!(classify(&json!({"type": "mystery"})), None);
        assert_eq!(classify(&json!({"content": "no discriminator"})), None);
        assert_eq!(classify(&json!({"type": 5})), None);
    }
}
