use std::path::Path;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
use std::sync::mpsc::TryRecvError;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::events::normalize_kind;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("no active process")]
    NotRunning,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

/// A prompt for typed input, as delivered by the transport itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputPrompt {
    #[serde(alias = "request_id")]
    pub request_id: Option<String>,
    pub prompt: String,
    #[serde(alias = "is_secret", alias = "password")]
    pub is_secret: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEnd {
    pub status: RunStatus,
    #[serde(default)]
    pub return_code: i32,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl RunEnd {
    pub fn ok(elapsed_ms: u64) -> Self {
        Self {
            status: RunStatus::Ok,
            return_code: 0,
            elapsed_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }
}

/// Everything a transport can deliver to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Stdout(String),
    Stderr(String),
    InputRequest(InputPrompt),
    DebugInputRequest(InputPrompt),
    RunStatus(Value),
    RunEnd(RunEnd),
    StdinAck { request_id: Option<String> },
    StdinError { error: String },
    CompileStart { source: Option<String> },
    CompileEnd,
    CompileError { message: String },
    Other { kind: String, data: Value },
}

impl TransportEvent {
    /// Decodes a `{type|kind, data}` envelope. Accepts both the `run_*`
    /// wire names and the short camelCase forms.
    pub fn from_wire(envelope: &Value) -> Option<Self> {
        let raw_kind = envelope
            .get("type")
            .or_else(|| envelope.get("kind"))
            .and_then(Value::as_str)?;
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);
        let kind = normalize_kind(raw_kind);
        let kind = kind.strip_prefix("run_").unwrap_or(&kind);

        let event = match kind {
            "stdout" => Self::Stdout(text_of(&data)),
            "stderr" => Self::Stderr(text_of(&data)),
            "input_request" => Self::InputRequest(prompt_of(data)),
            "debug_input_request" => Self::DebugInputRequest(prompt_of(data)),
            "status" => Self::RunStatus(data),
            "end" => Self::RunEnd(serde_json::from_value(data).unwrap_or(RunEnd {
                status: RunStatus::Error,
                return_code: -1,
                elapsed_ms: 0,
            })),
            "stdin_ack" => Self::StdinAck {
                request_id: string_field(&data, &["request_id", "requestId"]),
            },
            "stdin_error" => Self::StdinError {
                error: string_field(&data, &["error"]).unwrap_or_else(|| "stdin error".to_string()),
            },
            "compile_start" => Self::CompileStart {
                source: string_field(&data, &["source"]),
            },
            "compile_end" => Self::CompileEnd,
            "compile_error" => Self::CompileError {
                message: string_field(&data, &["message"])
                    .unwrap_or_else(|| "compilation failed".to_string()),
            },
            _ => Self::Other {
                kind: raw_kind.to_string(),
                data,
            },
        };
        Some(event)
    }
}

fn text_of(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        other => string_field(other, &["text"]).unwrap_or_default(),
    }
}

fn prompt_of(data: Value) -> InputPrompt {
    serde_json::from_value(data).unwrap_or_default()
}

fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Structured message written to the running process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "payload", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Step/continue/breakpoint commands for the debugger.
    Control(Map<String, Value>),
    /// Answer to an outstanding input request.
    Respond(Map<String, Value>),
}

impl OutboundMessage {
    pub fn payload(&self) -> &Map<String, Value> {
        match self {
            Self::Control(payload) | Self::Respond(payload) => payload,
        }
    }
}

/// Receiving end of a transport subscription. Dropping it unsubscribes and
/// discards anything still queued.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<TransportEvent>,
}

impl Subscription {
    pub fn channel() -> (Sender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    pub fn try_next(&self) -> Option<TransportEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<TransportEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// The running external process, as seen by the run controller.
pub trait Transport {
    fn run(&mut self, path: &Path, args: &[String]) -> Result<(), TransportError>;
    fn stop(&mut self) -> Result<(), TransportError>;
    fn subscribe(&mut self) -> Subscription;
    fn write_stdin(&mut self, text: &str) -> Result<(), TransportError>;
    fn interrupt(&mut self) -> Result<(), TransportError>;
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_run_protocol_envelopes() {
        assert_eq!(
            TransportEvent::from_wire(&json!({"type": "run_stdout", "data": {"text": "hi\n"}})),
            Some(TransportEvent::Stdout("hi\n".to_string()))
        );
        assert_eq!(
            TransportEvent::from_wire(&json!({
                "type": "run_end",
                "data": {"status": "error", "returnCode": 2, "elapsedMs": 40}
            })),
            Some(TransportEvent::RunEnd(RunEnd {
                status: RunStatus::Error,
                return_code: 2,
                elapsed_ms: 40,
            }))
        );
        assert_eq!(
            TransportEvent::from_wire(&json!({"type": "compile_error", "data": {"message": "bad"}})),
            Some(TransportEvent::CompileError {
                message: "bad".to_string()
            })
        );
    }

    #[test]
    fn decodes_short_kind_envelopes() {
        assert_eq!(
            TransportEvent::from_wire(&json!({
                "kind": "debugInputRequest",
                "data": {"prompt": "Dbg:", "isSecret": true}
            })),
            Some(TransportEvent::DebugInputRequest(InputPrompt {
                request_id: None,
                prompt: "Dbg:".to_string(),
                is_secret: true,
            }))
        );
        assert_eq!(
            TransportEvent::from_wire(&json!({
                "kind": "inputRequest",
                "data": {"request_id": "r9", "prompt": "Name?", "password": false}
            })),
            Some(TransportEvent::InputRequest(InputPrompt {
                request_id: Some("r9".to_string()),
                prompt: "Name?".to_string(),
                is_secret: false,
            }))
        );
        assert!(matches!(
            TransportEvent::from_wire(&json!({"kind": "somethingNew", "data": 1})),
            Some(TransportEvent::Other { .. })
        ));
        assert_eq!(TransportEvent::from_wire(&json!({"data": 1})), None);
    }

    #[test]
    fn outbound_messages_use_op_and_payload() {
        let mut payload = Map::new();
        payload.insert("action".to_string(), json!("go"));
        let value = serde_json::to_value(OutboundMessage::Control(payload)).expect("serialize");
        assert_eq!(value, json!({"op": "control", "payload": {"action": "go"}}));
    }

    #[test]
    fn dropped_sender_ends_the_subscription() {
        let (tx, subscription) = Subscription::channel();
        tx.send(TransportEvent::CompileEnd).expect("send");
        drop(tx);
        assert_eq!(subscription.try_next(), Some(TransportEvent::CompileEnd));
        assert_eq!(subscription.try_next(), None);
        assert_eq!(subscription.next_timeout(Duration::from_millis(1)), None);
    }
}
