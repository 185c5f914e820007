use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::config::MergeSettings;
use crate::merge::ArrayRule;
use crate::merge::MergeOptions;
use crate::node::Node;

pub const CHAT: &str = "chat";
pub const STEP_BY_STEP: &str = "stepByStep";
pub const PENDING_INPUT: &str = "pendingInput";

pub const CHAT_MESSAGES_PATH: &str = "chat.messages";
pub const STEP_EVENT_HISTORY_PATH: &str = "stepByStep.eventHistory";
pub const STEP_CURRENT_EVENT_PATH: &str = "stepByStep.currentEvent";
pub const STEP_PARTICIPANTS_PATH: &str = "stepByStep.participants";

/// Mode-agnostic "typed input needed" signal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingInput {
    pub prompt: String,
    pub is_secret: bool,
}

/// An outstanding request, correlated with its answer by `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingRequest {
    pub request_id: String,
    pub prompt: String,
    pub is_secret: bool,
}

/// The debugger asking which control command to run next.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPrompt {
    pub request_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatState {
    pub show: bool,
    pub active: bool,
    pub messages: Vec<Value>,
    pub timeline: Option<Value>,
    pub active_request: Option<PendingRequest>,
    pub participants: Vec<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepState {
    pub show: bool,
    pub active: bool,
    pub current_event: Option<Value>,
    pub event_history: Vec<Value>,
    pub participants: Vec<Value>,
    pub breakpoints: Vec<Value>,
    pub pending_control_input: Option<ControlPrompt>,
    pub active_request: Option<PendingRequest>,
    pub step_mode: bool,
    pub auto_continue: bool,
    pub help: Option<Value>,
    pub stats: Option<Value>,
    pub last_error: Option<String>,
    pub timeline: Option<Value>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            show: false,
            active: false,
            current_event: None,
            event_history: Vec::new(),
            participants: Vec::new(),
            breakpoints: Vec::new(),
            pending_control_input: None,
            active_request: None,
            step_mode: true,
            auto_continue: false,
            help: None,
            stats: None,
            last_error: None,
            timeline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionState {
    pub chat: ChatState,
    pub step_by_step: StepState,
    pub pending_input: Option<PendingInput>,
}

impl ExecutionState {
    pub fn is_running(&self) -> bool {
        self.chat.active || self.step_by_step.active
    }
}

impl From<&PendingInput> for Node {
    fn from(input: &PendingInput) -> Self {
        Node::from(json!({
            "prompt": input.prompt,
            "isSecret": input.is_secret,
        }))
    }
}

impl From<PendingInput> for Node {
    fn from(input: PendingInput) -> Self {
        Node::from(&input)
    }
}

impl From<&PendingRequest> for Node {
    fn from(request: &PendingRequest) -> Self {
        Node::from(json!({
            "requestId": request.request_id,
            "prompt": request.prompt,
            "isSecret": request.is_secret,
        }))
    }
}

impl From<PendingRequest> for Node {
    fn from(request: PendingRequest) -> Self {
        Node::from(&request)
    }
}

impl From<&ControlPrompt> for Node {
    fn from(prompt: &ControlPrompt) -> Self {
        Node::from(json!({
            "requestId": prompt.request_id,
            "prompt": prompt.prompt,
        }))
    }
}

impl From<ControlPrompt> for Node {
    fn from(prompt: ControlPrompt) -> Self {
        Node::from(&prompt)
    }
}

/// Merge configuration for an [`ExecutionState`] tree: chat messages append,
/// step history prepends, and the focused step event plus the step
/// participant list are always replaced whole.
pub fn execution_merge_options(settings: &MergeSettings) -> MergeOptions {
    MergeOptions::default()
        .with_max_depth(settings.max_depth)
        .with_shallow(STEP_CURRENT_EVENT_PATH)
        .with_shallow(STEP_PARTICIPANTS_PATH)
        .with_array(
            CHAT_MESSAGES_PATH,
            ArrayRule::append()
                .with_max_len(settings.max_messages)
                .deduplicated(),
        )
        .with_array(
            STEP_EVENT_HISTORY_PATH,
            ArrayRule::prepend()
                .with_max_len(settings.max_event_history)
                .deduplicated(),
        )
}
