//! Replayer state machine.
//!
//! Consumes a canonical action stream and re-executes it against a freshly
//! launched browser at the original pacing. States:
//!
//! ```text
//! Idle -> Launching -> Launched <-> Playing -> Closing -> Idle
//! ```
//!
//! The replay loop checks the state at every iteration boundary, gates each
//! action on the busy-indicator barrier, dispatches through the per-action
//! executors, and sleeps out the recorded gaps (minus execution over-runs).

pub mod busy;
pub mod exec;
pub mod pacer;

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use relive_browser::{BrowserError, BrowserHandle, CdpEvent, PageDriver};
use relive_types::{CapturedError, Envelope, Recording, ReplayData, StatusCode};

use crate::events::{HandlerSet, ReplayerHandler};
use crate::options::{OptionsError, ReplayerOptions};
use crate::overlay::Overlay;
use crate::session::{open_session, LaunchFailure};
use self::pacer::ReplayPacer;

/// Replayer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayerState {
    Idle,
    Launching,
    Launched,
    Playing,
    Closing,
}

/// Internal replay failures, classified into envelope codes at the
/// operation boundary.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("busy indicator '{selector}' still visible after {timeout_ms} ms")]
    BusyTimeout { selector: String, timeout_ms: u64 },
    #[error("browser closed")]
    BrowserClosed,
    #[error("replay stopped")]
    Stopped,
    #[error(transparent)]
    Driver(#[from] BrowserError),
}

/// Screenshot request for [`Replayer::capture_screen`].
#[derive(Debug, Clone, Default)]
pub struct CaptureScreenOptions {
    /// `"png"` (default) or `"jpeg"`.
    pub format: Option<String>,
    pub full_page: bool,
    /// Write to disk and return the path instead of the binary payload.
    pub path: Option<PathBuf>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Shared state (machine + event pump)
// ---------------------------------------------------------------------------

struct ReplayShared {
    options: ReplayerOptions,
    label: StdMutex<String>,
    state: StdMutex<ReplayerState>,
    console_errors: StdMutex<Vec<CapturedError>>,
    handlers: HandlerSet<dyn ReplayerHandler>,
    overlay: Overlay,
}

impl ReplayShared {
    fn state(&self) -> ReplayerState {
        *self.state.lock().expect("replayer state poisoned")
    }

    fn set_state(&self, state: ReplayerState) {
        *self.state.lock().expect("replayer state poisoned") = state;
    }

    fn push_error(&self, error: CapturedError) {
        self.console_errors
            .lock()
            .expect("console error store poisoned")
            .push(error.clone());
        self.handlers.for_each(|h| h.on_console_error(&error));
    }

    fn console_errors(&self) -> Vec<CapturedError> {
        self.console_errors
            .lock()
            .expect("console error store poisoned")
            .clone()
    }

    fn errors_rdata(&self) -> Value {
        json!({ "consoleErrors": self.console_errors() })
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

/// Page-event loop: console/network diagnostics, overlay re-injection on
/// main-frame navigations, disconnect handling.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    shared: Arc<ReplayShared>,
    browser: Arc<BrowserHandle>,
    page: PageDriver,
) {
    let mut inflight: std::collections::HashMap<String, (String, String)> =
        std::collections::HashMap::new();
    while let Some(event) = events.recv().await {
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                if event.params.get("type").and_then(Value::as_str) != Some("error") {
                    continue;
                }
                let empty = Vec::new();
                let args = event
                    .params
                    .get("args")
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                for arg in args {
                    if let Some(value) = arg.get("value") {
                        let message = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        shared.push_error(CapturedError::console(message, None, now_ms()));
                    } else if let Some(description) =
                        arg.get("description").and_then(Value::as_str)
                    {
                        let message =
                            description.lines().next().unwrap_or(description).to_string();
                        shared.push_error(CapturedError::console(
                            message,
                            Some(description.to_string()),
                            now_ms(),
                        ));
                    }
                }
            }
            "Runtime.exceptionThrown" => {
                let Some(details) = event.params.get("exceptionDetails") else {
                    continue;
                };
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
                    });
                if let Some(message) = message {
                    shared.push_error(CapturedError::console(
                        message,
                        description.map(str::to_string),
                        now_ms(),
                    ));
                }
            }
            "Network.requestWillBeSent" => {
                if let (Some(id), Some(request)) = (
                    event.params.get("requestId").and_then(Value::as_str),
                    event.params.get("request"),
                ) {
                    inflight.insert(
                        id.to_string(),
                        (
                            request
                                .get("url")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            request
                                .get("method")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        ),
                    );
                }
            }
            "Network.loadingFinished" => {
                if let Some(id) = event.params.get("requestId").and_then(Value::as_str) {
                    inflight.remove(id);
                }
            }
            "Network.loadingFailed" => {
                let Some(id) = event.params.get("requestId").and_then(Value::as_str) else {
                    continue;
                };
                let info = inflight.remove(id);
                let error_text = event
                    .params
                    .get("errorText")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed");
                if error_text == "net::ERR_ABORTED" {
                    continue;
                }
                let (url, method) = info.map(|(u, m)| (Some(u), Some(m))).unwrap_or((None, None));
                shared.push_error(CapturedError::request(error_text, url, method, now_ms()));
            }
            "Page.frameNavigated" => {
                let is_main = event
                    .params
                    .get("frame")
                    .map(|f| f.get("parentId").is_none())
                    .unwrap_or(false);
                if !is_main {
                    continue;
                }
                shared.overlay.inject(&page).await;
                if shared.state() == ReplayerState::Playing {
                    shared.overlay.show_replay_indicator(&page).await;
                }
            }
            _ => {}
        }
    }

    // Disconnected outside close(): reset and notify.
    let state = shared.state();
    if matches!(state, ReplayerState::Closing | ReplayerState::Idle) {
        return;
    }
    tracing::info!("browser disconnected while {state:?}");
    browser.close().await;
    shared.set_state(ReplayerState::Idle);
    shared.handlers.for_each(|h| h.on_close());
}

// ---------------------------------------------------------------------------
// Replayer
// ---------------------------------------------------------------------------

struct ReplaySession {
    browser: Arc<BrowserHandle>,
    page: PageDriver,
    pump: tokio::task::JoinHandle<()>,
}

/// Re-executes recorded sessions against a live browser.
pub struct Replayer {
    shared: Arc<ReplayShared>,
    session: TokioMutex<Option<ReplaySession>>,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("state", &self.shared.state())
            .field("url", &self.shared.options.url)
            .finish_non_exhaustive()
    }
}

impl Replayer {
    /// Validates `url` and the browser executable path.
    pub fn new(options: ReplayerOptions) -> Result<Self, OptionsError> {
        options.validate()?;
        let overlay = Overlay::new(options.visual_effects);
        let label = options.label.clone();
        Ok(Self {
            shared: Arc::new(ReplayShared {
                options,
                label: StdMutex::new(label),
                state: StdMutex::new(ReplayerState::Idle),
                console_errors: StdMutex::new(Vec::new()),
                handlers: HandlerSet::new(),
                overlay,
            }),
            session: TokioMutex::new(None),
        })
    }

    /// Register an event handler (channels: action, console-error, finish,
    /// close).
    pub fn subscribe(&self, handler: Arc<dyn ReplayerHandler>) {
        self.shared.handlers.add(handler);
    }

    pub fn state(&self) -> ReplayerState {
        self.shared.state()
    }

    /// Start the browser, acquire a tab, navigate, and install the
    /// overlay. Valid only in `Idle`.
    pub async fn launch_page(&self) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("replayer state poisoned");
            if *state != ReplayerState::Idle {
                return Envelope::failure(
                    StatusCode::AlreadyLaunched,
                    format!("launch_page is only valid in Idle (state: {:?})", *state),
                );
            }
            *state = ReplayerState::Launching;
        }

        let cancelled = || self.shared.state() != ReplayerState::Launching;
        let opened = open_session(
            &self.shared.options.launch_options,
            &self.shared.options.url,
            &self.shared.options.goto_options,
            &cancelled,
        )
        .await;

        match opened {
            Ok(parts) => {
                self.shared.overlay.inject(&parts.page).await;
                let pump = tokio::spawn(pump_events(
                    parts.events,
                    Arc::clone(&self.shared),
                    Arc::clone(&parts.browser),
                    parts.page.clone(),
                ));
                let session = ReplaySession {
                    browser: parts.browser,
                    page: parts.page,
                    pump,
                };
                let mut slot = self.session.lock().await;
                if cancelled() {
                    teardown(session).await;
                    return Envelope::failure(
                        StatusCode::BrowserClosed,
                        "launch aborted by close()",
                    );
                }
                *slot = Some(session);
                self.shared.set_state(ReplayerState::Launched);
                tracing::info!(url = %self.shared.options.url, "replayer ready");
                Envelope::success()
            }
            Err(LaunchFailure::Aborted) => {
                Envelope::failure(StatusCode::BrowserClosed, "launch aborted by close()")
            }
            Err(LaunchFailure::Failed(reason)) => {
                {
                    let mut state =
                        self.shared.state.lock().expect("replayer state poisoned");
                    if *state == ReplayerState::Launching {
                        *state = ReplayerState::Idle;
                    }
                }
                Envelope::failure(StatusCode::LaunchFailed, reason)
            }
        }
    }

    /// Reload the current page and re-install the overlay.
    pub async fn reload_page(&self) -> Envelope {
        let page = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.page.clone(),
                None => return Envelope::failure(StatusCode::NoPageFound, "no page launched"),
            }
        };
        let timeout = Duration::from_millis(self.shared.options.goto_options.timeout_ms);
        if let Err(e) = page.reload(timeout).await {
            if e.is_target_closed() {
                return Envelope::failure(StatusCode::BrowserClosed, e.to_string());
            }
            return Envelope::failure(
                StatusCode::ActionFailed,
                format!("reload failed: {e}"),
            );
        }
        self.shared.overlay.inject(&page).await;
        if self.shared.state() == ReplayerState::Playing {
            self.shared.overlay.show_replay_indicator(&page).await;
        }
        Envelope::success()
    }

    /// Screenshot the current page. Defaults: PNG, viewport only, binary
    /// payload (base64) in `RDATA`; with `path` set, writes to disk and
    /// returns the path instead.
    pub async fn capture_screen(&self, options: CaptureScreenOptions) -> Envelope {
        let page = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.page.clone(),
                None => return Envelope::failure(StatusCode::NoPageFound, "no page launched"),
            }
        };
        let format = options.format.as_deref().unwrap_or("png");
        let bytes = match page.screenshot(format, options.full_page).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_target_closed() => {
                return Envelope::failure(StatusCode::BrowserClosed, e.to_string());
            }
            Err(e) => {
                return Envelope::failure(
                    StatusCode::ActionFailed,
                    format!("screenshot failed: {e}"),
                );
            }
        };

        match options.path {
            Some(path) => {
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    return Envelope::failure(
                        StatusCode::ActionFailed,
                        format!("failed to write screenshot to {}: {e}", path.display()),
                    );
                }
                Envelope::success_with(json!({ "path": path }))
            }
            None => Envelope::success_with(json!({
                "format": format,
                "data": B64.encode(&bytes),
            })),
        }
    }

    /// Replay from loose JSON. `recordData.actions` must be an array.
    pub async fn play(&self, record_data: Value) -> Envelope {
        if record_data.get("actions").and_then(Value::as_array).is_none() {
            return Envelope::failure(
                StatusCode::InvalidData,
                "recordData.actions must be an array",
            );
        }
        match serde_json::from_value::<ReplayData>(record_data) {
            Ok(data) => self.play_data(data).await,
            Err(e) => Envelope::failure(
                StatusCode::InvalidData,
                format!("invalid record data: {e}"),
            ),
        }
    }

    /// Replay a typed recording.
    pub async fn play_recording(&self, recording: &Recording) -> Envelope {
        self.play_data(ReplayData::from(recording)).await
    }

    async fn play_data(&self, data: ReplayData) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("replayer state poisoned");
            if *state != ReplayerState::Launched {
                return Envelope::failure(
                    StatusCode::NoPageFound,
                    format!("play requires a launched page (state: {:?})", *state),
                );
            }
            *state = ReplayerState::Playing;
        }

        if let Some(kind) = &data.kind {
            if !kind.is_empty() {
                *self.shared.label.lock().expect("label poisoned") = kind.clone();
            }
        }
        self.shared
            .console_errors
            .lock()
            .expect("console error store poisoned")
            .clear();

        let (page, browser) = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => (session.page.clone(), Arc::clone(&session.browser)),
                None => {
                    self.shared.set_state(ReplayerState::Idle);
                    return Envelope::failure(StatusCode::NoPageFound, "no page session");
                }
            }
        };

        self.shared.overlay.inject(&page).await;
        self.shared.overlay.show_replay_indicator(&page).await;
        let label = self.shared.label.lock().expect("label poisoned").clone();
        tracing::info!(kind = %label, actions = data.actions.len(), "replay started");

        let outcome = self.run_loop(&page, &browser, &data).await;

        self.shared.overlay.hide_replay_indicator(&page).await;
        let rdata = self.shared.errors_rdata();

        match outcome {
            Ok(()) => {
                self.back_to_launched();
                let errors = self.shared.console_errors();
                self.shared.handlers.for_each(|h| h.on_finish(&errors));
                tracing::info!("replay finished");
                Envelope::success_with(rdata)
            }
            Err((step, error)) => self.classify_failure(step, error, rdata),
        }
    }

    async fn run_loop(
        &self,
        page: &PageDriver,
        browser: &Arc<BrowserHandle>,
        data: &ReplayData,
    ) -> Result<(), (usize, ReplayError)> {
        let mut pacer = ReplayPacer::new();
        let busy_selector = self.shared.options.busy_indicator_selector.clone();
        let busy_timeout = Duration::from_millis(self.shared.options.busy_timeout);

        for (index, action) in data.actions.iter().enumerate() {
            match self.shared.state() {
                ReplayerState::Playing => {}
                ReplayerState::Closing => return Err((index, ReplayError::BrowserClosed)),
                _ => return Err((index, ReplayError::Stopped)),
            }

            if let Some(selector) = &busy_selector {
                busy::wait_until_idle(page, selector, busy_timeout)
                    .await
                    .map_err(|e| (index, e))?;
            }

            self.shared.handlers.for_each(|h| h.on_action(index, action));
            tracing::debug!(step = index, action = %action, "replaying");

            let started = tokio::time::Instant::now();
            exec::execute(page, browser.as_ref(), &self.shared.overlay, action)
                .await
                .map_err(|e| (index, e))?;
            let execution_ms = started.elapsed().as_millis() as i64;

            let gap = if let Some(next) = data.actions.get(index + 1) {
                Some(next.timestamp() - action.timestamp())
            } else {
                // Preserve the recorded tail after the last action.
                data.recording_end_time
                    .map(|end| end - action.timestamp())
            };
            if let Some(gap) = gap {
                let wait = pacer.wait_after(gap, execution_ms);
                if wait > 0 {
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
            }
        }
        Ok(())
    }

    fn classify_failure(&self, step: usize, error: ReplayError, rdata: Value) -> Envelope {
        match &error {
            ReplayError::BusyTimeout { .. } => {
                self.back_to_launched();
                Envelope::failure_with(StatusCode::BusyTimeout, error.to_string(), rdata)
            }
            ReplayError::Stopped => {
                Envelope::failure_with(StatusCode::ReplayStopped, error.to_string(), rdata)
            }
            ReplayError::BrowserClosed => {
                self.shared.set_state(ReplayerState::Idle);
                Envelope::failure_with(StatusCode::BrowserClosed, "browser closed", rdata)
            }
            ReplayError::Driver(e) if e.is_target_closed() => {
                self.shared.set_state(ReplayerState::Idle);
                Envelope::failure_with(StatusCode::BrowserClosed, error.to_string(), rdata)
            }
            ReplayError::Driver(_) => {
                self.back_to_launched();
                Envelope::failure_with(
                    StatusCode::ActionFailed,
                    format!("action {step} failed: {error}"),
                    rdata,
                )
            }
        }
    }

    /// Return to `Launched` unless close()/disconnect took the state over.
    fn back_to_launched(&self) {
        let mut state = self.shared.state.lock().expect("replayer state poisoned");
        if *state == ReplayerState::Playing {
            *state = ReplayerState::Launched;
        }
    }

    /// Terminate the replay loop at its next iteration boundary. Valid
    /// only in `Playing`.
    pub fn stop(&self) -> Envelope {
        let mut state = self.shared.state.lock().expect("replayer state poisoned");
        if *state != ReplayerState::Playing {
            return Envelope::failure(
                StatusCode::NotPlaying,
                format!("stop requires Playing (state: {:?})", *state),
            );
        }
        *state = ReplayerState::Launched;
        Envelope::success()
    }

    /// Tear everything down and return to `Idle`. Doubles as the
    /// cancellation signal for an in-flight launch or replay.
    pub async fn close(&self) -> Envelope {
        {
            let mut state = self.shared.state.lock().expect("replayer state poisoned");
            match *state {
                ReplayerState::Idle | ReplayerState::Closing => return Envelope::success(),
                _ => *state = ReplayerState::Closing,
            }
        }
        tracing::info!("closing replayer");

        if let Some(session) = self.session.lock().await.take() {
            teardown(session).await;
        }
        self.shared
            .console_errors
            .lock()
            .expect("console error store poisoned")
            .clear();
        self.shared.set_state(ReplayerState::Idle);
        self.shared.handlers.for_each(|h| h.on_close());
        Envelope::success()
    }
}

async fn teardown(session: ReplaySession) {
    session.pump.abort();
    session.browser.close_all_pages().await;
    session.page.shutdown().await;
    session.browser.close().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
