use flowsync_core::Field;
use flowsync_core::Node;
use flowsync_core::Patch;
use flowsync_core::PendingRequest;
use serde_json::json;
use serde_json::Value;

use super::ensure_identity;
use crate::events::ChatEvent;
use crate::events::DiagnosticLevel;
use crate::events::LifecycleEvent;
use crate::events::StreamEvent;

/// Changes to the `chat` sub-state produced by one event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatUpdate {
    /// Appended to `messages`.
    pub message: Option<Value>,
    pub timeline: Field<Value>,
    pub participants: Field<Vec<Value>>,
    pub active_request: Field<PendingRequest>,
    pub error: Field<String>,
}

impl ChatUpdate {
    pub fn into_patch(self) -> Patch {
        let mut patch = Patch::empty();
        if let Some(message) = self.message {
            patch = patch.set("messages", Node::array(vec![Node::from(message)]));
        }
        patch
            .field("timeline", self.timeline)
            .field("participants", self.participants.map(Value::Array))
            .field("activeRequest", self.active_request)
            .field("error", self.error)
    }
}

#[derive(Debug, Default)]
pub struct ChatProcessor {
    seq: u64,
}

impl ChatProcessor {
    /// `transport_request_id` stands in for input requests that carry no id
    /// of their own.
    pub fn process(
        &mut self,
        event: &StreamEvent,
        transport_request_id: Option<&str>,
    ) -> Option<ChatUpdate> {
        let update = match event {
            StreamEvent::InputRequest(request) => {
                let request_id = request
                    .request_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .or(transport_request_id)
                    .unwrap_or_default()
                    .to_string();
                let message = json!({
                    "type": "input_request",
                    "requestId": request_id,
                    "prompt": request.prompt,
                    "isSecret": request.is_secret,
                });
                ChatUpdate {
                    message: Some(self.identified(message)),
                    active_request: Field::Set(PendingRequest {
                        request_id,
                        prompt: request.prompt.clone(),
                        is_secret: request.is_secret,
                    }),
                    ..ChatUpdate::default()
                }
            }
            StreamEvent::Chat(ChatEvent::Message { payload, .. }) => ChatUpdate {
                message: Some(self.identified(payload.clone())),
                active_request: Field::Clear,
                ..ChatUpdate::default()
            },
            StreamEvent::Chat(ChatEvent::Timeline(timeline)) => ChatUpdate {
                timeline: Field::Set(timeline.clone()),
                ..ChatUpdate::default()
            },
            StreamEvent::Chat(ChatEvent::Participants(participants)) => ChatUpdate {
                participants: Field::Set(participants.clone()),
                ..ChatUpdate::default()
            },
            StreamEvent::Lifecycle(LifecycleEvent::Termination(payload)) => ChatUpdate {
                message: Some(self.identified(payload.clone())),
                active_request: Field::Clear,
                ..ChatUpdate::default()
            },
            StreamEvent::Diagnostic(diagnostic) if diagnostic.level == DiagnosticLevel::Error => {
                ChatUpdate {
                    error: Field::Set(diagnostic.message.clone()),
                    ..ChatUpdate::default()
                }
            }
            StreamEvent::Lifecycle(LifecycleEvent::Completion(_))
            | StreamEvent::Diagnostic(_)
            | StreamEvent::Step(_) => return None,
        };
        Some(update)
    }

    fn identified(&mut self, message: Value) -> Value {
        let seq = &mut self.seq;
        ensure_identity(message, || {
            *seq += 1;
            format!("msg-{seq}")
        })
    }
}
