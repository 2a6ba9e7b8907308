//! Error types for the relive-browser crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser executable could not be started or did not advertise a
    /// DevTools endpoint in time.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed { reason: String },

    /// Failed to establish a WebSocket connection to a DevTools endpoint.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    Cdp {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// The DevTools connection dropped while an operation was in flight.
    #[error("DevTools connection closed")]
    Disconnected,

    /// A protocol-level error (serialization, unexpected message shape).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// The requested DOM element was not found.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// No element matched the selector before the wait expired.
    #[error("timed out after {duration:?} waiting for selector: {selector}")]
    SelectorTimeout { selector: String, duration: Duration },

    /// Navigation failed at the protocol level (e.g. name resolution).
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// The page did not reach the load state within the expected timeout.
    #[error("page load timed out after {duration:?}")]
    PageLoadTimeout { duration: Duration },

    /// JavaScript evaluation threw in the page.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },
}

/// CDP error message fragments that indicate the target or session is gone
/// rather than a genuine command failure.
const TARGET_CLOSED_SIGNALS: &[&str] = &[
    "Session closed",
    "Target closed",
    "Inspected target navigated or closed",
    "No target with given id",
    "Cannot find context with specified id",
    "WebSocket connection closed",
];

impl BrowserError {
    /// Whether this error means the browser tab or process is gone — the
    /// state machines map these to user-closed-browser outcomes instead of
    /// operation failures.
    pub fn is_target_closed(&self) -> bool {
        match self {
            BrowserError::Disconnected => true,
            BrowserError::ConnectionFailed { .. } => true,
            BrowserError::Cdp { message, .. } => {
                TARGET_CLOSED_SIGNALS.iter().any(|s| message.contains(s))
            }
            BrowserError::Protocol { detail } => {
                TARGET_CLOSED_SIGNALS.iter().any(|s| detail.contains(s))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_counts_as_target_closed() {
        assert!(BrowserError::Disconnected.is_target_closed());
    }

    #[test]
    fn cdp_session_closed_counts_as_target_closed() {
        let err = BrowserError::Cdp {
            code: -32000,
            message: "Session closed. Most likely the page has been closed.".into(),
            data: None,
        };
        assert!(err.is_target_closed());
    }

    #[test]
    fn missing_target_counts_as_target_closed() {
        let err = BrowserError::Cdp {
            code: -32602,
            message: "No target with given id found".into(),
            data: None,
        };
        assert!(err.is_target_closed());
    }

    #[test]
    fn ordinary_failures_are_not_target_closed() {
        let err = BrowserError::ElementNotFound {
            selector: "#missing".into(),
        };
        assert!(!err.is_target_closed());

        let err = BrowserError::JsException {
            message: "ReferenceError: foo is not defined".into(),
        };
        assert!(!err.is_target_closed());

        let err = BrowserError::Cdp {
            code: -32602,
            message: "Invalid params".into(),
            data: None,
        };
        assert!(!err.is_target_closed());
    }
}
