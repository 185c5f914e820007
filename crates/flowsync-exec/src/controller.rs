use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use flowsync_core::Node;
use flowsync_core::Patch;
use flowsync_core::PendingInput;
use flowsync_core::CHAT;
use flowsync_core::PENDING_INPUT;
use flowsync_core::STEP_BY_STEP;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::contracts::InputPrompt;
use crate::contracts::OutboundMessage;
use crate::contracts::Subscription;
use crate::contracts::Transport;
use crate::contracts::TransportError;
use crate::contracts::TransportEvent;
use crate::events::StepEvent;
use crate::events::StreamEvent;
use crate::extractor::clean_line;
use crate::extractor::extract_events;
use crate::processors::ChatProcessor;
use crate::processors::StepProcessor;
use crate::processors::StepUpdate;

pub const DEFAULT_STEP_FLAG: &str = "--step";

const CONTROL_KIND: &str = "debugInputResponse";
const RESPONSE_KIND: &str = "inputResponse";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("a run is already in progress")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Chat,
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartOptions {
    pub mode: RunMode,
    pub args: Vec<String>,
}

impl StartOptions {
    pub fn step() -> Self {
        Self {
            mode: RunMode::Step,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    ChatActive,
    StepActive,
}

/// Receives every patch the controller produces. The receiver owns the
/// canonical state and merges patches into it.
pub trait StateSink {
    fn on_state(&mut self, patch: Patch);
}

impl<F> StateSink for F
where
    F: FnMut(Patch),
{
    fn on_state(&mut self, patch: Patch) {
        self(patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStream {
    Stdout,
    Stderr,
}

/// One line of process output, forwarded verbatim before extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub stream: RawStream,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

type RawSink = Box<dyn FnMut(&RawLine)>;

/// Drives one run at a time: turns transport events into state patches and
/// routes user input back to the process.
pub struct RunController<T, S> {
    transport: Option<T>,
    sink: S,
    phase: Phase,
    mode: RunMode,
    subscription: Option<Subscription>,
    last_request_id: Option<String>,
    transport_request_id: Option<String>,
    step_flag: String,
    raw_sink: Option<RawSink>,
    chat: ChatProcessor,
    step: StepProcessor,
}

impl<T, S> RunController<T, S>
where
    T: Transport,
    S: StateSink,
{
    pub fn new(transport: T, sink: S) -> Self {
        Self {
            transport: Some(transport),
            sink,
            phase: Phase::Idle,
            mode: RunMode::Chat,
            subscription: None,
            last_request_id: None,
            transport_request_id: None,
            step_flag: DEFAULT_STEP_FLAG.to_string(),
            raw_sink: None,
            chat: ChatProcessor::default(),
            step: StepProcessor::default(),
        }
    }

    pub fn with_step_flag(mut self, flag: impl Into<String>) -> Self {
        self.step_flag = flag.into();
        self
    }

    pub fn with_raw_sink(mut self, sink: impl FnMut(&RawLine) + 'static) -> Self {
        self.raw_sink = Some(Box::new(sink));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn last_request_id(&self) -> Option<&str> {
        self.last_request_id.as_deref()
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Detaches the transport. Outbound calls become no-ops afterwards.
    pub fn release_transport(&mut self) -> Option<T> {
        self.transport.take()
    }

    pub fn start(&mut self, path: &Path, options: StartOptions) -> Result<(), RunError> {
        if self.phase != Phase::Idle {
            return Err(RunError::Busy);
        }
        self.phase = Phase::Starting;
        self.mode = options.mode;
        self.last_request_id = None;
        self.transport_request_id = None;
        self.chat = ChatProcessor::default();
        self.step = StepProcessor::default();
        self.emit(initial_patch(options.mode));

        let mut args = options.args;
        if options.mode == RunMode::Step {
            args.push(self.step_flag.clone());
        }

        let outcome = match self.transport.as_mut() {
            Some(transport) => {
                self.subscription = Some(transport.subscribe());
                transport.run(path, &args)
            }
            None => Err(TransportError::NotRunning),
        };

        match outcome {
            Ok(()) => {
                self.phase = match options.mode {
                    RunMode::Chat => Phase::ChatActive,
                    RunMode::Step => Phase::StepActive,
                };
                tracing::info!(path = %path.display(), mode = ?options.mode, "run started");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "run failed to start");
                self.finish(Some(err.to_string()));
            }
        }
        Ok(())
    }

    /// Asks the transport to terminate and unsubscribes. Safe when idle.
    pub fn stop(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            match transport.stop() {
                Ok(()) | Err(TransportError::NotRunning) => {}
                Err(err) => tracing::warn!(error = %err, "failed to stop run"),
            }
        }
        if self.subscription.is_some() {
            tracing::info!("run stopped");
            self.finish(None);
        }
    }

    /// Handles everything already queued without blocking. Returns how many
    /// events were processed.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.next_queued() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for one event. Returns whether one was handled.
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        let Some(event) = self
            .subscription
            .as_ref()
            .and_then(|subscription| subscription.next_timeout(timeout))
        else {
            return false;
        };
        self.handle_event(event);
        true
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.subscription.is_none() {
            tracing::trace!(?event, "dropping event after unsubscribe");
            return;
        }
        match event {
            TransportEvent::Stdout(text) => self.handle_output(RawStream::Stdout, &text),
            TransportEvent::Stderr(text) => self.handle_output(RawStream::Stderr, &text),
            TransportEvent::InputRequest(prompt) => self.handle_input_prompt(prompt, false),
            TransportEvent::DebugInputRequest(prompt) => self.handle_input_prompt(prompt, true),
            TransportEvent::RunEnd(end) => {
                tracing::info!(
                    status = ?end.status,
                    return_code = end.return_code,
                    elapsed_ms = end.elapsed_ms,
                    "run ended"
                );
                let error = (!end.is_ok())
                    .then(|| format!("run exited with code {}", end.return_code));
                self.finish(error);
            }
            TransportEvent::StdinError { error } => self.report_error(error),
            TransportEvent::CompileError { message } => self.report_error(message),
            TransportEvent::RunStatus(status) => tracing::debug!(%status, "run status"),
            TransportEvent::StdinAck { request_id } => {
                tracing::debug!(?request_id, "stdin acknowledged");
            }
            TransportEvent::CompileStart { source } => tracing::debug!(?source, "compiling flow"),
            TransportEvent::CompileEnd => tracing::debug!("flow compiled"),
            TransportEvent::Other { kind, .. } => tracing::trace!(%kind, "ignoring transport event"),
        }
    }

    /// Writes user input to the process. Strings go verbatim, anything else
    /// as JSON text.
    pub fn submit_input(&mut self, value: &Value) {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        if self.with_transport("stdin", |transport| transport.write_stdin(&text)) {
            self.emit(
                Patch::empty()
                    .clear(PENDING_INPUT)
                    .nested(CHAT, Patch::empty().clear("activeRequest")),
            );
        }
    }

    pub fn interrupt(&mut self) {
        self.with_transport("interrupt", |transport| transport.interrupt());
    }

    /// Sends a debugger command. The last seen correlation id is attached
    /// when the payload has none.
    pub fn send_control(&mut self, mut payload: Map<String, Value>) {
        payload.insert("kind".to_string(), Value::from(CONTROL_KIND));
        if !payload.contains_key("requestId") && !payload.contains_key("request_id") {
            if let Some(request_id) = &self.last_request_id {
                payload.insert("requestId".to_string(), Value::from(request_id.as_str()));
            }
        }
        let message = OutboundMessage::Control(payload);
        if self.with_transport("control", |transport| transport.send(&message)) {
            self.emit(
                Patch::empty()
                    .clear(PENDING_INPUT)
                    .nested(STEP_BY_STEP, Patch::empty().clear("pendingControlInput")),
            );
        }
    }

    /// Answers an outstanding input request while stepping.
    pub fn respond(&mut self, mut payload: Map<String, Value>) {
        payload.insert("kind".to_string(), Value::from(RESPONSE_KIND));
        let message = OutboundMessage::Respond(payload);
        if self.with_transport("respond", |transport| transport.send(&message)) {
            self.emit(
                Patch::empty()
                    .clear(PENDING_INPUT)
                    .nested(STEP_BY_STEP, Patch::empty().clear("activeRequest")),
            );
        }
    }

    fn next_queued(&self) -> Option<TransportEvent> {
        self.subscription.as_ref().and_then(Subscription::try_next)
    }

    fn handle_input_prompt(&mut self, prompt: InputPrompt, debug: bool) {
        if let Some(request_id) = prompt.request_id.filter(|id| !id.is_empty()) {
            if debug {
                self.last_request_id = Some(request_id.clone());
            }
            self.transport_request_id = Some(request_id);
        }
        self.emit(Patch::empty().set(
            PENDING_INPUT,
            PendingInput {
                prompt: prompt.prompt,
                is_secret: prompt.is_secret,
            },
        ));
    }

    fn handle_output(&mut self, stream: RawStream, text: &str) {
        if let Some(raw_sink) = self.raw_sink.as_mut() {
            let received_at = Utc::now();
            for line in text.lines() {
                raw_sink(&RawLine {
                    stream,
                    text: clean_line(line),
                    received_at,
                });
            }
        }
        for event in extract_events(text) {
            self.handle_stream_event(&event);
        }
    }

    fn handle_stream_event(&mut self, event: &StreamEvent) {
        let mut patch = match event {
            StreamEvent::InputRequest(request) => Patch::empty().set(
                PENDING_INPUT,
                PendingInput {
                    prompt: request.prompt.clone(),
                    is_secret: request.is_secret,
                },
            ),
            StreamEvent::Step(StepEvent::ControlRequest { prompt, .. }) => Patch::empty().set(
                PENDING_INPUT,
                PendingInput {
                    prompt: prompt.clone(),
                    is_secret: false,
                },
            ),
            _ => Patch::empty(),
        };

        let chat_update = self
            .chat
            .process(event, self.transport_request_id.as_deref());
        match self.mode {
            RunMode::Chat => {
                if let Some(update) = chat_update {
                    patch = patch.nested(CHAT, update.into_patch());
                }
            }
            RunMode::Step => {
                let step_update = self
                    .step
                    .process(event)
                    .or_else(|| chat_update.as_ref().map(StepUpdate::from_chat_metadata));
                if let Some(update) = step_update {
                    if let Some(request_id) = update.request_id() {
                        self.last_request_id = Some(request_id.to_string());
                    }
                    patch = patch.nested(STEP_BY_STEP, update.into_patch());
                }
            }
        }
        self.emit(patch);
    }

    /// Runs `op` against the transport of the active run. Returns false when
    /// no run is attached or the call failed; failures land in the error
    /// field.
    fn with_transport<F>(&mut self, op: &'static str, f: F) -> bool
    where
        F: FnOnce(&mut T) -> Result<(), TransportError>,
    {
        if self.subscription.is_none() {
            tracing::debug!(op, "no active run, ignoring");
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            tracing::debug!(op, "no transport attached, ignoring");
            return false;
        };
        match f(transport) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(op, error = %err, "transport call failed");
                self.report_error(format!("{op} failed: {err}"));
                false
            }
        }
    }

    fn report_error(&mut self, message: String) {
        let patch = match self.mode {
            RunMode::Chat => Patch::empty().nested(CHAT, Patch::empty().set("error", message)),
            RunMode::Step => {
                Patch::empty().nested(STEP_BY_STEP, Patch::empty().set("lastError", message))
            }
        };
        self.emit(patch);
    }

    fn finish(&mut self, error: Option<String>) {
        self.subscription = None;
        self.phase = Phase::Idle;
        self.last_request_id = None;
        self.transport_request_id = None;
        self.emit(end_patch(self.mode, error));
    }

    fn emit(&mut self, patch: Patch) {
        if !patch.is_empty() {
            self.sink.on_state(patch);
        }
    }
}

fn initial_patch(mode: RunMode) -> Patch {
    let empty = || Node::array(Vec::new());
    let chat = match mode {
        RunMode::Chat => Patch::empty()
            .set("show", true)
            .set("active", true)
            .set("messages", empty())
            .set("participants", empty())
            .clear("timeline")
            .clear("activeRequest")
            .clear("error"),
        RunMode::Step => Patch::empty().set("show", false).set("active", false),
    };
    let step = match mode {
        RunMode::Step => Patch::empty()
            .set("show", true)
            .set("active", true)
            .set("eventHistory", empty())
            .set("participants", empty())
            .set("breakpoints", empty())
            .clear("currentEvent")
            .clear("pendingControlInput")
            .clear("activeRequest")
            .clear("help")
            .clear("stats")
            .clear("lastError")
            .clear("timeline"),
        RunMode::Chat => Patch::empty().set("show", false).set("active", false),
    };
    Patch::empty()
        .clear(PENDING_INPUT)
        .nested(CHAT, chat)
        .nested(STEP_BY_STEP, step)
}

fn end_patch(mode: RunMode, error: Option<String>) -> Patch {
    let mut chat = Patch::empty().set("active", false).clear("activeRequest");
    let mut step = Patch::empty()
        .set("active", false)
        .clear("activeRequest")
        .clear("pendingControlInput");
    if let Some(error) = error {
        match mode {
            RunMode::Chat => chat = chat.set("error", error),
            RunMode::Step => step = step.set("lastError", error),
        }
    }
    Patch::empty()
        .clear(PENDING_INPUT)
        .nested(CHAT, chat)
        .nested(STEP_BY_STEP, step)
}
