//! Option sets for the recorder and replayer.
//!
//! Plain serde structs with defaults; validation happens at state-machine
//! construction and maps onto envelope status codes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use relive_types::{Envelope, StatusCode};

/// Default navigation timeout in milliseconds.
pub const DEFAULT_GOTO_TIMEOUT_MS: u64 = 30_000;

/// Default busy-indicator timeout in milliseconds (five minutes).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 300_000;

/// Default label carried into metadata and recordings.
pub const DEFAULT_LABEL: &str = "web";

/// Browser launch configuration, forwarded to the driver.
///
/// `executable_path` is required. `args` are appended after the driver's
/// base argument set (shallow merge; later flags win in Chrome).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchOptions {
    pub executable_path: PathBuf,
    pub args: Vec<String>,
    /// Profile directory; a fresh temp profile is provisioned when unset.
    pub user_data_dir: Option<PathBuf>,
}

/// Navigation behavior for the initial `goto` and for reloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GotoOptions {
    /// Wait for the document load state before resolving.
    pub wait_until_load: bool,
    pub timeout_ms: u64,
}

impl Default for GotoOptions {
    fn default() -> Self {
        Self {
            wait_until_load: true,
            timeout_ms: DEFAULT_GOTO_TIMEOUT_MS,
        }
    }
}

/// Options for [`crate::Recorder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderOptions {
    /// Required; initial navigation target.
    pub url: String,
    /// Free-form label carried into metadata and recordings.
    #[serde(rename = "type")]
    pub label: String,
    /// `true`: emit each action/error as captured; `false`: buffer and emit
    /// the full arrays once on finalize.
    pub stream: bool,
    pub launch_options: LaunchOptions,
    pub goto_options: GotoOptions,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            label: DEFAULT_LABEL.to_string(),
            stream: true,
            launch_options: LaunchOptions::default(),
            goto_options: GotoOptions::default(),
        }
    }
}

impl RecorderOptions {
    pub fn new(url: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            launch_options: LaunchOptions {
                executable_path: executable_path.into(),
                ..LaunchOptions::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        validate_common(&self.url, &self.launch_options)
    }
}

/// Options for [`crate::Replayer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayerOptions {
    /// Required; initial navigation target.
    pub url: String,
    #[serde(rename = "type")]
    pub label: String,
    pub launch_options: LaunchOptions,
    pub goto_options: GotoOptions,
    /// Comma-separated selector list gating replay between actions.
    pub busy_indicator_selector: Option<String>,
    /// Milliseconds to wait for the busy indicator to clear.
    pub busy_timeout: u64,
    /// Enables the in-page overlay hints.
    pub visual_effects: bool,
}

impl Default for ReplayerOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            label: DEFAULT_LABEL.to_string(),
            launch_options: LaunchOptions::default(),
            goto_options: GotoOptions::default(),
            busy_indicator_selector: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT_MS,
            visual_effects: true,
        }
    }
}

impl ReplayerOptions {
    pub fn new(url: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            launch_options: LaunchOptions {
                executable_path: executable_path.into(),
                ..LaunchOptions::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        validate_common(&self.url, &self.launch_options)
    }
}

fn validate_common(url: &str, launch: &LaunchOptions) -> Result<(), OptionsError> {
    if url.trim().is_empty() {
        return Err(OptionsError::MissingUrl);
    }
    if launch.executable_path.as_os_str().is_empty() {
        return Err(OptionsError::MissingExecutable);
    }
    Ok(())
}

/// Construction-time validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("no url configured")]
    MissingUrl,
    #[error("launchOptions.executablePath is not set")]
    MissingExecutable,
}

impl OptionsError {
    pub fn status(&self) -> StatusCode {
        match self {
            OptionsError::MissingUrl => StatusCode::NoUrlFound,
            OptionsError::MissingExecutable => StatusCode::LaunchFailed,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::failure(self.status(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = ReplayerOptions::default();
        assert_eq!(options.label, "web");
        assert_eq!(options.busy_timeout, 300_000);
        assert!(options.visual_effects);
        assert!(options.busy_indicator_selector.is_none());
        assert_eq!(options.goto_options.timeout_ms, 30_000);
        assert!(options.goto_options.wait_until_load);

        let options = RecorderOptions::default();
        assert!(options.stream);
        assert_eq!(options.label, "web");
    }

    #[test]
    fn missing_url_is_rejected() {
        let options = RecorderOptions::new("  ", "/usr/bin/chromium");
        assert_eq!(options.validate(), Err(OptionsError::MissingUrl));
        assert_eq!(
            OptionsError::MissingUrl.status(),
            StatusCode::NoUrlFound
        );
    }

    #[test]
    fn missing_executable_is_rejected() {
        let options = RecorderOptions {
            url: "http://localhost:3000".into(),
            ..RecorderOptions::default()
        };
        assert_eq!(options.validate(), Err(OptionsError::MissingExecutable));
        assert_eq!(
            OptionsError::MissingExecutable.status(),
            StatusCode::LaunchFailed
        );
    }

    #[test]
    fn valid_options_pass() {
        let options = ReplayerOptions::new("http://localhost:3000", "/usr/bin/chromium");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn options_deserialize_from_loose_json() {
        let options: ReplayerOptions = serde_json::from_value(serde_json::json!({
            "url": "http://localhost:8080",
            "type": "acceptance",
            "launchOptions": { "executablePath": "/usr/bin/google-chrome" },
            "busyIndicatorSelector": ".spinner, #busy",
            "busyTimeout": 60000,
            "visualEffects": false,
        }))
        .unwrap();
        assert_eq!(options.label, "acceptance");
        assert_eq!(options.busy_timeout, 60_000);
        assert!(!options.visual_effects);
        assert_eq!(
            options.busy_indicator_selector.as_deref(),
            Some(".spinner, #busy")
        );
    }

    #[test]
    fn envelope_mapping_carries_message() {
        let envelope = OptionsError::MissingUrl.to_envelope();
        assert!(!envelope.is_success());
        assert_eq!(envelope.stcod, Some(StatusCode::NoUrlFound));
    }
}
