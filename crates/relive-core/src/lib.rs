//! Recorder and replayer state machines for the relive record & replay
//! toolkit.
//!
//! Two entry points, mirroring each other's lifecycle:
//!
//! - [`Recorder`] — drives a headful browser tab, injects the capture
//!   script into every document, and turns raw DOM events into a canonical,
//!   timestamped action stream plus a parallel error stream.
//! - [`Replayer`] — consumes that action stream and reconstructs the
//!   session at the original pacing, gating on application busy indicators
//!   and showing visual progress through the in-page overlay.
//!
//! Every caller-visible operation returns the uniform
//! [`Envelope`] (`RETCD`/`STCOD`/`MSGTX`/`RDATA`); failures are never
//! raised. Callers observe progress through the fixed event channels of
//! [`RecorderHandler`] and [`ReplayerHandler`].
//!
//! # Example (conceptual)
//!
//! ```ignore
//! use relive_core::{Recorder, RecorderOptions};
//!
//! let recorder = Recorder::new(RecorderOptions::new(
//!     "http://localhost:3000/login",
//!     "/usr/bin/chromium",
//! ))?;
//! recorder.launch_page().await;
//! recorder.start_recording().await;
//! // ... the user drives the page ...
//! let stopped = recorder.stop_recording().await; // RDATA carries the recording
//! recorder.close().await;
//! ```

pub mod capture;
pub mod events;
pub mod options;
pub mod overlay;
pub mod recorder;
pub mod replayer;
mod session;

pub use events::{RecorderHandler, ReplayerHandler};
pub use options::{
    GotoOptions, LaunchOptions, OptionsError, RecorderOptions, ReplayerOptions,
};
pub use overlay::Overlay;
pub use recorder::{Recorder, RecorderState};
pub use replayer::{CaptureScreenOptions, ReplayError, Replayer, ReplayerState};

// Wire types, re-exported so most callers only depend on this crate.
pub use relive_types::{
    format_duration, Action, CapturedError, Envelope, Recording, RecordingMeta, ReplayData,
    Retcd, StatusCode,
};
