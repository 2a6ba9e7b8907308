//! Wire-level data model for the relive record & replay toolkit.
//!
//! Everything that crosses a boundary lives here: the canonical [`Action`]
//! stream captured from a page, the [`Recording`] container, the
//! [`CapturedError`] diagnostics stream, and the uniform [`Envelope`] that
//! every externally callable operation returns.
//!
//! The shapes are wire-stable: actions serialize with a `type` tag and
//! camelCase fields, status codes serialize as SCREAMING_SNAKE_CASE string
//! constants, and the envelope uses the fixed `RETCD`/`STCOD`/`MSGTX`/`RDATA`
//! keys.

pub mod action;
pub mod envelope;

pub use action::{format_duration, Action, Recording, RecordingMeta, ReplayData};
pub use envelope::{CapturedError, Envelope, Retcd, StatusCode};
