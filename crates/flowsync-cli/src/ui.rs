use std::collections::HashSet;

use flowsync_core::ExecutionState;
use serde_json::Value;

/// Prints what changed between successive state snapshots as a plain
/// transcript.
#[derive(Debug, Default)]
pub struct Transcript {
    seen_messages: HashSet<String>,
    current_event: Option<Value>,
    prompt: Option<String>,
    error: Option<String>,
}

impl Transcript {
    pub fn render(&mut self, state: &ExecutionState) -> Vec<String> {
        let mut lines = Vec::new();

        for message in &state.chat.messages {
            let id = message_id(message);
            if self.seen_messages.insert(id) {
                lines.push(format_message(message));
            }
        }

        let step = &state.step_by_step;
        if step.current_event.is_some() && step.current_event != self.current_event {
            self.current_event = step.current_event.clone();
            if let Some(event) = &step.current_event {
                lines.push(format!("[step] {}", format_message(event)));
            }
        }

        let prompt = step
            .pending_control_input
            .as_ref()
            .map(|control| control.prompt.clone())
            .or_else(|| state.pending_input.as_ref().map(|input| input.prompt.clone()));
        if prompt != self.prompt {
            if let Some(prompt) = &prompt {
                lines.push(format!("? {}", prompt.trim_end()));
            }
            self.prompt = prompt;
        }

        let error = state
            .chat
            .error
            .clone()
            .or_else(|| step.last_error.clone());
        if error != self.error {
            if let Some(error) = &error {
                lines.push(format!("! {error}"));
            }
            self.error = error;
        }

        lines
    }
}

fn message_id(message: &Value) -> String {
    ["id", "uuid", "timestamp"]
        .iter()
        .find_map(|key| message.get(*key))
        .map(Value::to_string)
        .unwrap_or_else(|| message.to_string())
}

fn format_message(message: &Value) -> String {
    let kind = message
        .get("type")
        .or_else(|| message.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or("event");
    let body = message.get("content").unwrap_or(message);
    let sender = body
        .get("sender")
        .or_else(|| message.get("sender"))
        .and_then(Value::as_str);
    let text = match body.get("content").unwrap_or(body) {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match sender {
        Some(sender) => format!("{sender} ({kind}): {text}"),
        None => format!("({kind}) {text}"),
    }
}
