//! Result envelope, status codes, and the captured-error stream record.
//!
//! Every externally callable operation on the recorder and replayer resolves
//! to an [`Envelope`] — failures are never raised to the caller. `RETCD` is
//! `"S"` or `"E"`; success omits `STCOD`/`MSGTX`; `RDATA` carries the
//! optional payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// String status constants carried in `STCOD` and in the error stream's
/// `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    NoUrlFound,
    LaunchFailed,
    NoPageFound,
    NotRecording,
    AlreadyLaunched,
    AlreadyRecording,
    RecordingStartFailed,
    AbortedByUser,
    BrowserConsoleError,
    RequestError,
    InvalidData,
    NotPlaying,
    ReplayStopped,
    ActionFailed,
    BusyTimeout,
    BrowserClosed,
}

impl StatusCode {
    /// The wire constant for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::NoUrlFound => "NO_URL_FOUND",
            StatusCode::LaunchFailed => "LAUNCH_FAILED",
            StatusCode::NoPageFound => "NO_PAGE_FOUND",
            StatusCode::NotRecording => "NOT_RECORDING",
            StatusCode::AlreadyLaunched => "ALREADY_LAUNCHED",
            StatusCode::AlreadyRecording => "ALREADY_RECORDING",
            StatusCode::RecordingStartFailed => "RECORDING_START_FAILED",
            StatusCode::AbortedByUser => "ABORTED_BY_USER",
            StatusCode::BrowserConsoleError => "BROWSER_CONSOLE_ERROR",
            StatusCode::RequestError => "REQUEST_ERROR",
            StatusCode::InvalidData => "INVALID_DATA",
            StatusCode::NotPlaying => "NOT_PLAYING",
            StatusCode::ReplayStopped => "REPLAY_STOPPED",
            StatusCode::ActionFailed => "ACTION_FAILED",
            StatusCode::BusyTimeout => "BUSY_TIMEOUT",
            StatusCode::BrowserClosed => "BROWSER_CLOSED",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Return-code discriminator: success or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retcd {
    S,
    E,
}

/// Uniform result shape for every caller-visible operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "RETCD")]
    pub retcd: Retcd,
    #[serde(rename = "STCOD", skip_serializing_if = "Option::is_none", default)]
    pub stcod: Option<StatusCode>,
    #[serde(rename = "MSGTX", skip_serializing_if = "Option::is_none", default)]
    pub msgtx: Option<String>,
    #[serde(rename = "RDATA", skip_serializing_if = "Option::is_none", default)]
    pub rdata: Option<Value>,
}

impl Envelope {
    /// A bare success with no payload.
    pub fn success() -> Self {
        Self {
            retcd: Retcd::S,
            stcod: None,
            msgtx: None,
            rdata: None,
        }
    }

    /// A success carrying a payload in `RDATA`.
    pub fn success_with(rdata: Value) -> Self {
        Self {
            rdata: Some(rdata),
            ..Self::success()
        }
    }

    /// A failure with a status code and message.
    pub fn failure(stcod: StatusCode, msgtx: impl Into<String>) -> Self {
        Self {
            retcd: Retcd::E,
            stcod: Some(stcod),
            msgtx: Some(msgtx.into()),
            rdata: None,
        }
    }

    /// A failure that still carries a payload (e.g. collected console
    /// errors from an interrupted replay).
    pub fn failure_with(stcod: StatusCode, msgtx: impl Into<String>, rdata: Value) -> Self {
        Self {
            rdata: Some(rdata),
            ..Self::failure(stcod, msgtx)
        }
    }

    pub fn is_success(&self) -> bool {
        self.retcd == Retcd::S
    }
}

// ---------------------------------------------------------------------------
// Captured errors
// ---------------------------------------------------------------------------

/// One entry in the diagnostics stream collected alongside a session:
/// a console/page error or a failed network request.
///
/// `kind` is always [`StatusCode::BrowserConsoleError`] or
/// [`StatusCode::RequestError`]; the remaining codes never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedError {
    #[serde(rename = "type")]
    pub kind: StatusCode,
    pub message: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub method: Option<String>,
}

impl CapturedError {
    /// A console or uncaught-exception error.
    pub fn console(message: impl Into<String>, stack: Option<String>, timestamp: i64) -> Self {
        Self {
            kind: StatusCode::BrowserConsoleError,
            message: message.into(),
            timestamp,
            stack,
            url: None,
            method: None,
        }
    }

    /// A failed network request.
    pub fn request(
        message: impl Into<String>,
        url: Option<String>,
        method: Option<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            kind: StatusCode::RequestError,
            message: message.into(),
            timestamp,
            stack: None,
            url,
            method,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_codes_serialize_to_wire_constants() {
        let codes = [
            (StatusCode::NoUrlFound, "NO_URL_FOUND"),
            (StatusCode::LaunchFailed, "LAUNCH_FAILED"),
            (StatusCode::NoPageFound, "NO_PAGE_FOUND"),
            (StatusCode::NotRecording, "NOT_RECORDING"),
            (StatusCode::AlreadyLaunched, "ALREADY_LAUNCHED"),
            (StatusCode::AlreadyRecording, "ALREADY_RECORDING"),
            (StatusCode::RecordingStartFailed, "RECORDING_START_FAILED"),
            (StatusCode::AbortedByUser, "ABORTED_BY_USER"),
            (StatusCode::BrowserConsoleError, "BROWSER_CONSOLE_ERROR"),
            (StatusCode::RequestError, "REQUEST_ERROR"),
            (StatusCode::InvalidData, "INVALID_DATA"),
            (StatusCode::NotPlaying, "NOT_PLAYING"),
            (StatusCode::ReplayStopped, "REPLAY_STOPPED"),
            (StatusCode::ActionFailed, "ACTION_FAILED"),
            (StatusCode::BusyTimeout, "BUSY_TIMEOUT"),
            (StatusCode::BrowserClosed, "BROWSER_CLOSED"),
        ];
        for (code, expected) in codes {
            let serialized = serde_json::to_string(&code).unwrap();
            assert_eq!(serialized, format!("\"{expected}\""));
            assert_eq!(code.as_str(), expected);
            let back: StatusCode = serde_json::from_str(&serialized).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn success_envelope_omits_status_and_message() {
        let envelope = Envelope::success();
        let value = serde_json::to_value(&envelope).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["RETCD"], "S");
        assert!(!obj.contains_key("STCOD"));
        assert!(!obj.contains_key("MSGTX"));
        assert!(!obj.contains_key("RDATA"));
    }

    #[test]
    fn failure_envelope_carries_code_and_message() {
        let envelope = Envelope::failure(StatusCode::BusyTimeout, "busy indicator never cleared");
        assert!(!envelope.is_success());
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["RETCD"], "E");
        assert_eq!(value["STCOD"], "BUSY_TIMEOUT");
        assert_eq!(value["MSGTX"], "busy indicator never cleared");
    }

    #[test]
    fn failure_with_payload_keeps_rdata() {
        let envelope = Envelope::failure_with(
            StatusCode::BrowserClosed,
            "browser closed during replay",
            json!({ "consoleErrors": [] }),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["RDATA"]["consoleErrors"], json!([]));
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = Envelope::success_with(json!({ "path": "/tmp/shot.png" }));
        let text = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn console_error_wire_shape() {
        let err = CapturedError::console("boom", Some("Error: boom\n  at app.js:1".into()), 1000);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "BROWSER_CONSOLE_ERROR");
        assert_eq!(value["message"], "boom");
        assert_eq!(value["timestamp"], 1000);
        assert!(value.get("url").is_none());
        assert!(value.get("method").is_none());
    }

    #[test]
    fn request_error_wire_shape() {
        let err = CapturedError::request(
            "net::ERR_CONNECTION_REFUSED",
            Some("https://api.example.com/data".into()),
            Some("GET".into()),
            2000,
        );
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "REQUEST_ERROR");
        assert_eq!(value["url"], "https://api.example.com/data");
        assert_eq!(value["method"], "GET");
        assert!(value.get("stack").is_none());
    }
}
