//! Recorder state machine.
//!
//! Owns a launched browser tab, arms the capture script, and turns raw
//! page events into the canonical action and error streams. States:
//!
//! ```text
//! Idle -> Launching -> Ready <-> Recording -> Closing -> Idle
//! ```
//!
//! Every caller-visible operation resolves to an [`Envelope`]; the
//! `Closing` state doubles as the cancellation flag for in-flight
//! operations, checked after every awaited step.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use relive_browser::{BrowserError, BrowserHandle, CdpEvent, PageDriver};
use relive_types::{
    format_duration, Action, CapturedError, Envelope, Recording, RecordingMeta, StatusCode,
};

use crate::capture::{parse_captured_action, CAPTURE_BINDING, CAPTURE_SCRIPT};
use crate::events::{HandlerSet, RecorderHandler};
use crate::options::{OptionsError, RecorderOptions};
use crate::session::{open_session, LaunchFailure};

/// Recorder lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Launching,
    Ready,
    Recording,
    Closing,
}

/// Network error texts dropped from the error stream. `ERR_ABORTED` is the
/// normal cancellation noise of in-flight requests during navigation.
const FILTERED_REQUEST_ERRORS: &[&str] = &["net::ERR_ABORTED"];

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Capture store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureStore {
    actions: Vec<Action>,
    errors: Vec<CapturedError>,
    start_time: i64,
    end_time: i64,
}

impl CaptureStore {
    fn reset(&mut self) {
        self.actions.clear();
        self.errors.clear();
        self.start_time = 0;
        self.end_time = 0;
    }
}

// ---------------------------------------------------------------------------
// Shared state (machine + event pump)
// ---------------------------------------------------------------------------

struct RecorderShared {
    options: RecorderOptions,
    state: StdMutex<RecorderState>,
    store: StdMutex<CaptureStore>,
    handlers: HandlerSet<dyn RecorderHandler>,
}

impl RecorderShared {
    fn state(&self) -> RecorderState {
        *self.state.lock().expect("recorder state poisoned")
    }

    fn set_state(&self, state: RecorderState) {
        *self.state.lock().expect("recorder state poisoned") = state;
    }

    /// Append a captured action. Dropped outside `Recording`; timestamps
    /// are clamped non-decreasing so the stream stays sorted even when the
    /// page clock jumps.
    fn push_action(&self, mut action: Action) {
        if self.state() != RecorderState::Recording {
            return;
        }
        {
            let mut store = self.store.lock().expect("capture store poisoned");
            if let Some(last) = store.actions.last() {
                if action.timestamp() < last.timestamp() {
                    action.set_timestamp(last.timestamp());
                }
            }
            store.actions.push(action.clone());
        }
        tracing::debug!(action = %action, "captured");
        if self.options.stream {
            self.handlers.for_each(|h| h.on_action(&action));
        }
    }

    fn push_error(&self, error: CapturedError) {
        if self.state() != RecorderState::Recording {
            return;
        }
        self.store
            .lock()
            .expect("capture store poisoned")
            .errors
            .push(error.clone());
        if self.options.stream {
            self.handlers.for_each(|h| h.on_console_error(&error));
        }
    }

    /// Build the recording from the store and emit it: batched channels
    /// first when not streaming, then `stop`.
    fn finalize_and_emit(&self) -> Recording {
        let (actions, errors, start, end) = {
            let store = self.store.lock().expect("capture store poisoned");
            (
                store.actions.clone(),
                store.errors.clone(),
                store.start_time,
                store.end_time,
            )
        };
        let duration_ms = (end - start).max(0);
        let recording = Recording {
            kind: self.options.label.clone(),
            url: self.options.url.clone(),
            recording_start_time: start,
            recording_end_time: end,
            duration_ms,
            duration: format_duration(duration_ms),
            actions,
            errors,
        };
        if !self.options.stream {
            self.handlers.for_each(|h| h.on_action_batch(&recording.actions));
            self.handlers
                .for_each(|h| h.on_console_error_batch(&recording.errors));
        }
        self.handlers.for_each(|h| h.on_stop(&recording));
        recording
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

struct RequestInfo {
    url: String,
    method: String,
}

/// Consume page events until the connection drops, then run the
/// disconnected handler.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    shared: Arc<RecorderShared>,
    browser: Arc<BrowserHandle>,
) {
    let mut inflight: HashMap<String, RequestInfo> = HashMap::new();
    while let Some(event) = events.recv().await {
        handle_page_event(&shared, &mut inflight, &event);
    }
    on_disconnected(&shared, &browser).await;
}

fn handle_page_event(
    shared: &RecorderShared,
    inflight: &mut HashMap<String, RequestInfo>,
    event: &CdpEvent,
) {
    match event.method.as_str() {
        "Runtime.bindingCalled" => {
            if event.params.get("name").and_then(Value::as_str) != Some(CAPTURE_BINDING) {
                return;
            }
            let Some(payload) = event.params.get("payload").and_then(Value::as_str) else {
                return;
            };
            match parse_captured_action(payload) {
                Ok(action) => shared.push_action(action),
                Err(e) => tracing::warn!(error = %e, "discarding malformed capture payload"),
            }
        }
        "Runtime.consoleAPICalled" => {
            if event.params.get("type").and_then(Value::as_str) != Some("error") {
                return;
            }
            let empty = Vec::new();
            let args = event
                .params
                .get("args")
                .and_then(Value::as_array)
                .unwrap_or(&empty);
            for error in console_errors_from_args(args, now_ms()) {
                shared.push_error(error);
            }
        }
        "Runtime.exceptionThrown" => {
            if let Some(error) = exception_error(&event.params, now_ms()) {
                shared.push_error(error);
            }
        }
        "Network.requestWillBeSent" => {
            if let (Some(id), Some(request)) = (
                event.params.get("requestId").and_then(Value::as_str),
                event.params.get("request"),
            ) {
                inflight.insert(
                    id.to_string(),
                    RequestInfo {
                        url: request
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        method: request
                            .get("method")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                );
            }
        }
        "Network.loadingFinished" => {
            if let Some(id) = event.params.get("requestId").and_then(Value::as_str) {
                inflight.remove(id);
            }
        }
        "Network.loadingFailed" => {
            if let Some(error) = request_error(&event.params, inflight, now_ms()) {
                shared.push_error(error);
            }
        }
        _ => {}
    }
}

/// Map console `error` arguments: plain values become the message,
/// error objects contribute their first description line as message and
/// the full description as stack.
fn console_errors_from_args(args: &[Value], timestamp: i64) -> Vec<CapturedError> {
    args.iter()
        .filter_map(|arg| {
            if let Some(value) = arg.get("value") {
                let message = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(CapturedError::console(message, None, timestamp))
            } else if let Some(description) = arg.get("description").and_then(Value::as_str) {
                let message = description.lines().next().unwrap_or(description).to_string();
                Some(CapturedError::console(
                    message,
                    Some(description.to_string()),
                    timestamp,
                ))
            } else {
                None
            }
        })
        .collect()
}

fn exception_error(params: &Value, timestamp: i64) -> Option<CapturedError> {
    let details = params.get("exceptionDetails")?;
    let description = details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str);
    let message = description
        .map(|d| d.lines().next().unwrap_or(d).to_string())
        .or_else(|| {
            details
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
        })?;
    Some(CapturedError::console(
        message,
        description.map(str::to_string),
        timestamp,
    ))
}

fn request_error(
    params: &Value,
    inflight: &mut HashMap<String, RequestInfo>,
    timestamp: i64,
) -> Option<CapturedError> {
    let request_id = params.get("requestId").and_then(Value::as_str)?;
    let info = inflight.remove(request_id);
    let error_text = params
        .get("errorText")
        .and_then(Value::as_str)
        .unwrap_or("request failed");
    if FILTERED_REQUEST_ERRORS.contains(&error_text) {
        return None;
    }
    Some(CapturedError::request(
        error_text,
        info.as_ref().map(|i| i.url.clone()),
        info.map(|i| i.method),
        timestamp,
    ))
}

/// The tab or browser went away outside `close()` (user closed the
/// window). Mid-recording this finalizes and emits `stop`, then `close`,
/// and the machine returns to `Idle`.
async fn on_disconnected(shared: &RecorderShared, browser: &BrowserHandle) {
    let state = shared.state();
    if matches!(state, RecorderState::Closing | RecorderState::Idle) {
        return;
    }
    tracing::info!("browser disconnected while {state:?}");
    if state == RecorderState::Recording {
        shared
            .store
            .lock()
            .expect("capture store poisoned")
            .end_time = now_ms();
        let _ = shared.finalize_and_emit();
    }
    browser.close().await;
    shared
        .store
        .lock()
        .expect("capture store poisoned")
        .reset();
    shared.set_state(RecorderState::Idle);
    shared.handlers.for_each(|h| h.on_close());
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

struct RecorderSession {
    browser: Arc<BrowserHandle>,
    page: PageDriver,
    pump: tokio::task::JoinHandle<()>,
    /// One-shot per tab lifecycle: `Page.addScriptToEvaluateOnNewDocument`
    /// is only issued on the first `start_recording`.
    script_installed: bool,
}

/// Records a browser session as a canonical action stream.
pub struct Recorder {
    shared: Arc<RecorderShared>,
    session: TokioMutex<Option<RecorderSession>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("state", &self.shared.state())
            .field("url", &self.shared.options.url)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Validates `url` and the browser executable path.
    pub fn new(options: RecorderOptions) -> Result<Self, OptionsError> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(RecorderShared {
                options,
                state: StdMutex::new(RecorderState::Idle),
                store: StdMutex::new(CaptureStore::default()),
                handlers: HandlerSet::new(),
            }),
            session: TokioMutex::new(None),
        })
    }

    /// Register an event handler (channels: action, console-error, stop,
    /// close).
    pub fn subscribe(&self, handler: Arc<dyn RecorderHandler>) {
        self.shared.handlers.add(handler);
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state()
    }

    /// Start the browser, acquire a tab, and navigate to the configured
    /// URL. Valid only in `Idle`.
    pub async fn launch_page(&self) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("recorder state poisoned");
            if *state != RecorderState::Idle {
                return Envelope::failure(
                    StatusCode::AlreadyLaunched,
                    format!("launch_page is only valid in Idle (state: {:?})", *state),
                );
            }
            *state = RecorderState::Launching;
        }

        let cancelled = || self.shared.state() != RecorderState::Launching;
        let opened = open_session(
            &self.shared.options.launch_options,
            &self.shared.options.url,
            &self.shared.options.goto_options,
            &cancelled,
        )
        .await;

        match opened {
            Ok(parts) => {
                let pump = tokio::spawn(pump_events(
                    parts.events,
                    Arc::clone(&self.shared),
                    Arc::clone(&parts.browser),
                ));
                let session = RecorderSession {
                    browser: parts.browser,
                    page: parts.page,
                    pump,
                    script_installed: false,
                };
                let mut slot = self.session.lock().await;
                if cancelled() {
                    teardown(session).await;
                    return Envelope::failure(
                        StatusCode::AbortedByUser,
                        "launch aborted by close()",
                    );
                }
                *slot = Some(session);
                self.shared.set_state(RecorderState::Ready);
                tracing::info!(url = %self.shared.options.url, "recorder ready");
                Envelope::success()
            }
            Err(LaunchFailure::Aborted) => {
                Envelope::failure(StatusCode::AbortedByUser, "launch aborted by close()")
            }
            Err(LaunchFailure::Failed(reason)) => {
                // close() may have taken over the state in the meantime.
                {
                    let mut state =
                        self.shared.state.lock().expect("recorder state poisoned");
                    if *state == RecorderState::Launching {
                        *state = RecorderState::Idle;
                    }
                }
                Envelope::failure(StatusCode::LaunchFailed, reason)
            }
        }
    }

    /// Arm the capture script and begin collecting actions. Valid only in
    /// `Ready`.
    pub async fn start_recording(&self) -> Envelope {
        {
            let state = self.shared.state();
            match state {
                RecorderState::Ready => {}
                RecorderState::Recording => {
                    return Envelope::failure(
                        StatusCode::AlreadyRecording,
                        "a recording is already in progress",
                    );
                }
                other => {
                    return Envelope::failure(
                        StatusCode::NoPageFound,
                        format!("start_recording requires a launched page (state: {other:?})"),
                    );
                }
            }
        }

        let start_time = now_ms();
        {
            let mut store = self.shared.store.lock().expect("capture store poisoned");
            store.reset();
            store.start_time = start_time;
        }

        let (page, script_installed) = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => (session.page.clone(), session.script_installed),
                None => {
                    return Envelope::failure(StatusCode::NoPageFound, "no page session")
                }
            }
        };

        match self.arm_capture(&page, script_installed).await {
            Ok((width, height)) => {
                if let Some(session) = self.session.lock().await.as_mut() {
                    session.script_installed = true;
                }
                self.shared.set_state(RecorderState::Recording);
                self.shared
                    .push_action(Action::initial_resize(width, height, start_time));
                tracing::info!("recording started");
                Envelope::success()
            }
            Err(e) if e.is_target_closed() => {
                Envelope::failure(StatusCode::AbortedByUser, e.to_string())
            }
            Err(e) => Envelope::failure(
                StatusCode::RecordingStartFailed,
                format!("failed to arm capture: {e}"),
            ),
        }
    }

    /// Expose the host callback and inject the capture script, both for
    /// the current document and for every future one. Returns the outer
    /// window size for the initial resize action.
    async fn arm_capture(
        &self,
        page: &PageDriver,
        script_installed: bool,
    ) -> Result<(i64, i64), BrowserError> {
        let closing = || self.shared.state() == RecorderState::Closing;

        let size = page
            .evaluate("({ width: window.outerWidth, height: window.outerHeight })")
            .await?;
        if closing() {
            return Err(BrowserError::Disconnected);
        }
        let width = size.get("width").and_then(Value::as_i64).unwrap_or(0);
        let height = size.get("height").and_then(Value::as_i64).unwrap_or(0);

        page.expose_binding(CAPTURE_BINDING).await?;
        if closing() {
            return Err(BrowserError::Disconnected);
        }

        if !script_installed {
            page.add_script_on_new_document(CAPTURE_SCRIPT).await?;
            if closing() {
                return Err(BrowserError::Disconnected);
            }
        }

        page.evaluate(CAPTURE_SCRIPT).await?;
        if closing() {
            return Err(BrowserError::Disconnected);
        }

        Ok((width, height))
    }

    /// Finalize the current recording and emit `stop`. Valid only in
    /// `Recording`. `RDATA` carries the recording.
    pub async fn stop_recording(&self) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("recorder state poisoned");
            if *state != RecorderState::Recording {
                return Envelope::failure(
                    StatusCode::NotRecording,
                    format!("stop_recording requires Recording (state: {:?})", *state),
                );
            }
            *state = RecorderState::Ready;
        }
        self.shared
            .store
            .lock()
            .expect("capture store poisoned")
            .end_time = now_ms();

        let recording = self.shared.finalize_and_emit();
        tracing::info!(
            actions = recording.actions.len(),
            errors = recording.errors.len(),
            "recording stopped"
        );
        Envelope::success_with(serde_json::to_value(&recording).unwrap_or(Value::Null))
    }

    /// Metadata over the current or most recent session. Pure accessor.
    pub fn get_metadata(&self) -> Envelope {
        let (start, end) = {
            let store = self.shared.store.lock().expect("capture store poisoned");
            (store.start_time, store.end_time)
        };
        let (duration_ms, duration) = if start > 0 && end >= start {
            let d = end - start;
            (Some(d), Some(format_duration(d)))
        } else {
            (None, None)
        };
        let meta = RecordingMeta {
            kind: self.shared.options.label.clone(),
            url: self.shared.options.url.clone(),
            recording_start_time: start,
            recording_end_time: end,
            duration_ms,
            duration,
        };
        Envelope::success_with(serde_json::to_value(&meta).unwrap_or(Value::Null))
    }

    /// Tear everything down and return to `Idle`. Doubles as the
    /// cancellation signal for an in-flight launch or start.
    pub async fn close(&self) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("recorder state poisoned");
            match *state {
                RecorderState::Idle | RecorderState::Closing => return Envelope::success(),
                _ => *state = RecorderState::Closing,
            }
        }
        tracing::info!("closing recorder");

        if let Some(session) = self.session.lock().await.take() {
            teardown(session).await;
        }
        self.shared
            .store
            .lock()
            .expect("capture store poisoned")
            .reset();
        self.shared.set_state(RecorderState::Idle);
        self.shared.handlers.for_each(|h| h.on_close());
        Envelope::success()
    }
}

async fn teardown(session: RecorderSession) {
    session.pump.abort();
    session.browser.close_all_pages().await;
    session.page.shutdown().await;
    session.browser.close().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
