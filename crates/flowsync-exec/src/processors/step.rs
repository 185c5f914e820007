use flowsync_core::ControlPrompt;
use flowsync_core::Field;
use flowsync_core::Node;
use flowsync_core::Patch;
use flowsync_core::PendingRequest;
use serde_json::json;
use serde_json::Value;

use super::ensure_identity;
use super::ChatUpdate;
use crate::events::DiagnosticLevel;
use crate::events::StepEvent;
use crate::events::StreamEvent;

/// Changes to the `stepByStep` sub-state produced by one event. Every field
/// can be left alone, cleared, or set independently.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepUpdate {
    pub current_event: Field<Value>,
    /// Prepended to `eventHistory`.
    pub history_entry: Option<Value>,
    pub participants: Field<Vec<Value>>,
    pub help: Field<Value>,
    pub stats: Field<Value>,
    pub last_error: Field<String>,
    pub pending_control_input: Field<ControlPrompt>,
    pub active_request: Field<PendingRequest>,
    pub step_mode: Field<bool>,
    pub auto_continue: Field<bool>,
    pub timeline: Field<Value>,
    pub breakpoints: Field<Vec<Value>>,
}

impl StepUpdate {
    /// Keeps only the mode-agnostic parts of a chat update.
    pub fn from_chat_metadata(update: &ChatUpdate) -> Self {
        Self {
            participants: update.participants.clone(),
            timeline: update.timeline.clone(),
            ..Self::default()
        }
    }

    /// Correlation id of the request this update opened, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.active_request
            .as_set()
            .map(|request| request.request_id.as_str())
            .or_else(|| {
                self.pending_control_input
                    .as_set()
                    .map(|prompt| prompt.request_id.as_str())
            })
            .filter(|id| !id.is_empty())
    }

    pub fn into_patch(self) -> Patch {
        let mut patch = Patch::empty();
        if let Some(entry) = self.history_entry {
            patch = patch.set("eventHistory", Node::array(vec![Node::from(entry)]));
        }
        patch
            .field("currentEvent", self.current_event)
            .field("participants", self.participants.map(Value::Array))
            .field("help", self.help)
            .field("stats", self.stats)
            .field("lastError", self.last_error)
            .field("pendingControlInput", self.pending_control_input)
            .field("activeRequest", self.active_request)
            .field("stepMode", self.step_mode)
            .field("autoContinue", self.auto_continue)
            .field("timeline", self.timeline)
            .field("breakpoints", self.breakpoints.map(Value::Array))
    }
}

#[derive(Debug, Default)]
pub struct StepProcessor {
    seq: u64,
}

impl StepProcessor {
    pub fn process(&mut self, event: &StreamEvent) -> Option<StepUpdate> {
        let update = match event {
            StreamEvent::InputRequest(request) => StepUpdate {
                active_request: Field::Set(PendingRequest {
                    request_id: request.request_id.clone().unwrap_or_default(),
                    prompt: request.prompt.clone(),
                    is_secret: request.is_secret,
                }),
                pending_control_input: Field::Clear,
                ..StepUpdate::default()
            },
            StreamEvent::Step(step) => self.process_step(step),
            StreamEvent::Diagnostic(diagnostic) if diagnostic.level == DiagnosticLevel::Error => {
                StepUpdate {
                    last_error: Field::Set(diagnostic.message.clone()),
                    ..StepUpdate::default()
                }
            }
            StreamEvent::Chat(_) | StreamEvent::Lifecycle(_) | StreamEvent::Diagnostic(_) => {
                return None
            }
        };
        Some(update)
    }

    fn process_step(&mut self, step: &StepEvent) -> StepUpdate {
        match step {
            StepEvent::ControlRequest { request_id, prompt } => StepUpdate {
                pending_control_input: Field::Set(ControlPrompt {
                    request_id: request_id.clone().unwrap_or_default(),
                    prompt: prompt.clone(),
                }),
                ..StepUpdate::default()
            },
            StepEvent::Event(event) => {
                let seq = &mut self.seq;
                let entry = ensure_identity(event.clone(), || {
                    *seq += 1;
                    format!("event-{seq}")
                });
                StepUpdate {
                    current_event: Field::Set(event.clone()),
                    history_entry: Some(entry),
                    participants: event
                        .get("participants")
                        .and_then(Value::as_array)
                        .cloned()
                        .map_or(Field::Unset, Field::Set),
                    active_request: Field::Clear,
                    last_error: Field::Clear,
                    ..StepUpdate::default()
                }
            }
            StepEvent::Help(help) => StepUpdate {
                help: Field::Set(help.clone()),
                ..StepUpdate::default()
            },
            StepEvent::Error(error) => StepUpdate {
                last_error: Field::Set(error.clone()),
                ..StepUpdate::default()
            },
            StepEvent::Breakpoints(breakpoints) => StepUpdate {
                breakpoints: Field::Set(breakpoints.clone()),
                ..StepUpdate::default()
            },
            StepEvent::Config {
                step_mode,
                auto_continue,
            } => StepUpdate {
                step_mode: step_mode.map_or(Field::Unset, Field::Set),
                auto_continue: auto_continue.map_or(Field::Unset, Field::Set),
                ..StepUpdate::default()
            },
            StepEvent::Print(content) => {
                let seq = &mut self.seq;
                let entry = ensure_identity(json!({"type": "debug_print", "content": content}), || {
                    *seq += 1;
                    format!("print-{seq}")
                });
                StepUpdate {
                    history_entry: Some(entry),
                    ..StepUpdate::default()
                }
            }
            StepEvent::Stats(stats) => StepUpdate {
                stats: Field::Set(stats.clone()),
                ..StepUpdate::default()
            },
        }
    }
}
