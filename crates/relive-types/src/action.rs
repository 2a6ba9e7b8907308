//! Canonical action stream and recording container.
//!
//! An [`Action`] is one captured user gesture in canonical form. The capture
//! script emits these shapes directly; the replayer consumes them as a closed
//! match on the tag. Field names are wire-stable camelCase under a
//! snake_case `type` tag.

use serde::{Deserialize, Serialize};

use crate::envelope::CapturedError;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One captured user gesture.
///
/// Invariants across a recording:
/// - timestamps are non-decreasing,
/// - the first action is a [`Action::BrowserResize`] whose from/to
///   dimensions are equal (the initial outer window size),
/// - for [`Action::Click`], `checked` and the coordinates may both be
///   present; replay prefers `checked`,
/// - for [`Action::Input`], `selection_start <= selection_end` when both
///   are present,
/// - for [`Action::Change`], exactly one of `checked` / `value` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Action {
    Click {
        timestamp: i64,
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        x: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        y: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        checked: Option<bool>,
    },
    Input {
        timestamp: i64,
        selector: String,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        selection_start: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        selection_end: Option<i64>,
    },
    Change {
        timestamp: i64,
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        checked: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        value: Option<String>,
    },
    Keydown {
        timestamp: i64,
        selector: String,
        key: String,
    },
    Scroll {
        timestamp: i64,
        /// `"window"` or a CSS path to the scrolled element.
        selector: String,
        start_scroll_x: i64,
        start_scroll_y: i64,
        scroll_x: i64,
        scroll_y: i64,
        /// Burst duration in milliseconds, reused as the replay animation
        /// duration.
        duration: i64,
    },
    BrowserResize {
        timestamp: i64,
        from_width: i64,
        from_height: i64,
        to_width: i64,
        to_height: i64,
    },
}

impl Action {
    /// Capture timestamp in milliseconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        match self {
            Action::Click { timestamp, .. }
            | Action::Input { timestamp, .. }
            | Action::Change { timestamp, .. }
            | Action::Keydown { timestamp, .. }
            | Action::Scroll { timestamp, .. }
            | Action::BrowserResize { timestamp, .. } => *timestamp,
        }
    }

    pub fn set_timestamp(&mut self, value: i64) {
        match self {
            Action::Click { timestamp, .. }
            | Action::Input { timestamp, .. }
            | Action::Change { timestamp, .. }
            | Action::Keydown { timestamp, .. }
            | Action::Scroll { timestamp, .. }
            | Action::BrowserResize { timestamp, .. } => *timestamp = value,
        }
    }

    /// The wire tag for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Input { .. } => "input",
            Action::Change { .. } => "change",
            Action::Keydown { .. } => "keydown",
            Action::Scroll { .. } => "scroll",
            Action::BrowserResize { .. } => "browser_resize",
        }
    }

    /// The equal-from/to resize that opens every recording, capturing the
    /// initial outer window size.
    pub fn initial_resize(width: i64, height: i64, timestamp: i64) -> Self {
        Action::BrowserResize {
            timestamp,
            from_width: width,
            from_height: height,
            to_width: width,
            to_height: height,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Click {
                selector, x, y, checked, ..
            } => match (checked, x, y) {
                (Some(state), _, _) => write!(f, "click {selector} (checked={state})"),
                (None, Some(x), Some(y)) => write!(f, "click {selector} @({x},{y})"),
                _ => write!(f, "click {selector}"),
            },
            Action::Input { selector, value, .. } => {
                write!(f, "input {selector} = {value:?}")
            }
            Action::Change {
                selector, checked, value, ..
            } => match checked {
                Some(state) => write!(f, "change {selector} checked={state}"),
                None => write!(f, "change {selector} = {:?}", value.as_deref().unwrap_or("")),
            },
            Action::Keydown { selector, key, .. } => write!(f, "keydown {key} on {selector}"),
            Action::Scroll {
                selector, scroll_x, scroll_y, ..
            } => write!(f, "scroll {selector} -> ({scroll_x},{scroll_y})"),
            Action::BrowserResize {
                to_width, to_height, ..
            } => write!(f, "browser_resize -> {to_width}x{to_height}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// A completed capture session, owned by the caller once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub recording_start_time: i64,
    pub recording_end_time: i64,
    pub duration_ms: i64,
    pub duration: String,
    pub actions: Vec<Action>,
    pub errors: Vec<CapturedError>,
}

/// Metadata view over the current or most recent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub recording_start_time: i64,
    pub recording_end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<String>,
}

/// Loose replay input: only the fields `play` consumes are required, so a
/// caller may feed a full [`Recording`] or a hand-built action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayData {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recording_end_time: Option<i64>,
}

impl From<&Recording> for ReplayData {
    fn from(recording: &Recording) -> Self {
        Self {
            kind: Some(recording.kind.clone()),
            actions: recording.actions.clone(),
            recording_end_time: Some(recording.recording_end_time),
        }
    }
}

/// Format a millisecond duration as `"{h}h {m}m {s}s"`, omitting
/// higher-order units that are zero. Negative input clamps to `"0s"`.
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
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
    fn click_wire_shape() {
        let action = Action::Click {
            timestamp: 1000,
            selector: "#user".into(),
            x: Some(42),
            y: Some(17),
            checked: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "click",
                "timestamp": 1000,
                "selector": "#user",
                "x": 42,
                "y": 17,
            })
        );
    }

    #[test]
    fn checkbox_click_keeps_both_signals() {
        let action = Action::Click {
            timestamp: 1000,
            selector: "input[name=\"agree\"]".into(),
            x: Some(10),
            y: Some(20),
            checked: Some(true),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["checked"], true);
        assert_eq!(value["x"], 10);
    }

    #[test]
    fn scroll_fields_are_camel_case() {
        let action = Action::Scroll {
            timestamp: 2000,
            selector: "window".into(),
            start_scroll_x: 0,
            start_scroll_y: 0,
            scroll_x: 0,
            scroll_y: 600,
            duration: 400,
        };
        let value = serde_json::to_value(&action).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["startScrollX", "startScrollY", "scrollX", "scrollY", "duration"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn browser_resize_fields_are_camel_case() {
        let action = Action::initial_resize(1280, 720, 500);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "browser_resize");
        assert_eq!(value["fromWidth"], 1280);
        assert_eq!(value["toWidth"], 1280);
        assert_eq!(value["fromHeight"], 720);
        assert_eq!(value["toHeight"], 720);
    }

    #[test]
    fn input_selection_omitted_when_absent() {
        let action = Action::Input {
            timestamp: 100,
            selector: "#q".into(),
            value: "hello".into(),
            selection_start: None,
            selection_end: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert!(value.get("selectionStart").is_none());
        assert!(value.get("selectionEnd").is_none());
    }

    #[test]
    fn all_variants_roundtrip() {
        let actions = vec![
            Action::Click {
                timestamp: 1,
                selector: "#a".into(),
                x: Some(1),
                y: Some(2),
                checked: Some(false),
            },
            Action::Input {
                timestamp: 2,
                selector: "#b".into(),
                value: "x".into(),
                selection_start: Some(0),
                selection_end: Some(1),
            },
            Action::Change {
                timestamp: 3,
                selector: "select#c".into(),
                checked: None,
                value: Some("opt-2".into()),
            },
            Action::Keydown {
                timestamp: 4,
                selector: "#d".into(),
                key: "Enter".into(),
            },
            Action::Scroll {
                timestamp: 5,
                selector: "div.feed".into(),
                start_scroll_x: 0,
                start_scroll_y: 10,
                scroll_x: 0,
                scroll_y: 900,
                duration: 250,
            },
            Action::BrowserResize {
                timestamp: 6,
                from_width: 800,
                from_height: 600,
                to_width: 1024,
                to_height: 768,
            },
        ];
        for action in actions {
            let text = serde_json::to_string(&action).unwrap();
            let back: Action = serde_json::from_str(&text).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn deserializes_capture_script_payload() {
        let payload = r##"{"type":"keydown","timestamp":1700000000000,"selector":"#pass","key":"Space"}"##;
        let action: Action = serde_json::from_str(payload).unwrap();
        assert_eq!(action.kind(), "keydown");
        assert!(matches!(action, Action::Keydown { ref key, .. } if key == "Space"));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let payload = r##"{"type":"drag","timestamp":1,"selector":"#x"}"##;
        assert!(serde_json::from_str::<Action>(payload).is_err());
    }

    #[test]
    fn recording_wire_shape() {
        let recording = Recording {
            kind: "web".into(),
            url: "http://localhost:3000/login".into(),
            recording_start_time: 1000,
            recording_end_time: 5000,
            duration_ms: 4000,
            duration: "4s".into(),
            actions: vec![Action::initial_resize(1280, 720, 1000)],
            errors: vec![],
        };
        let value = serde_json::to_value(&recording).unwrap();
        assert_eq!(value["type"], "web");
        assert_eq!(value["recordingStartTime"], 1000);
        assert_eq!(value["recordingEndTime"], 5000);
        assert_eq!(value["durationMs"], 4000);
        assert_eq!(value["actions"][0]["type"], "browser_resize");
    }

    #[test]
    fn meta_omits_duration_when_unset() {
        let meta = RecordingMeta {
            kind: "web".into(),
            url: "http://localhost".into(),
            recording_start_time: 0,
            recording_end_time: 0,
            duration_ms: None,
            duration: None,
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("durationMs").is_none());
        assert!(value.get("duration").is_none());
    }

    #[test]
    fn duration_formatting_omits_leading_zero_units() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(45_000), "45s");
        assert_eq!(format_duration(90_000), "1m 30s");
        assert_eq!(format_duration(3_600_000), "1h 0m 0s");
        assert_eq!(format_duration(3_700_000), "1h 1m 40s");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn display_is_compact() {
        let action = Action::Keydown {
            timestamp: 1,
            selector: "#pass".into(),
            key: "Enter".into(),
        };
        assert_eq!(action.to_string(), "keydown Enter on #pass");
    }
}
