//! State-machine behavior that holds without a live browser: operation
//! gating, envelope codes, and launch failure handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use relive_core::{
    Recorder, RecorderHandler, RecorderOptions, RecorderState, Replayer, ReplayerOptions,
    ReplayerState, Retcd, StatusCode,
};

fn recorder() -> Recorder {
    Recorder::new(RecorderOptions::new(
        "http://localhost:3000",
        "/usr/bin/chromium",
    ))
    .expect("valid options")
}

fn replayer() -> Replayer {
    Replayer::new(ReplayerOptions::new(
        "http://localhost:3000",
        "/usr/bin/chromium",
    ))
    .expect("valid options")
}

#[test]
fn recorder_construction_validates_options() {
    let err = Recorder::new(RecorderOptions::default()).unwrap_err();
    assert_eq!(err.status(), StatusCode::NoUrlFound);

    let err = Recorder::new(RecorderOptions {
        url: "http://localhost".into(),
        ..RecorderOptions::default()
    })
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::LaunchFailed);

    let envelope = err.to_envelope();
    assert_eq!(envelope.retcd, Retcd::E);
}

#[tokio::test]
async fn start_recording_requires_a_launched_page() {
    let recorder = recorder();
    let envelope = recorder.start_recording().await;
    assert_eq!(envelope.stcod, Some(StatusCode::NoPageFound));
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[tokio::test]
async fn stop_recording_requires_an_active_recording() {
    let recorder = recorder();
    let envelope = recorder.stop_recording().await;
    assert_eq!(envelope.stcod, Some(StatusCode::NotRecording));
}

#[test]
fn metadata_is_available_in_any_state() {
    let recorder = recorder();
    let envelope = recorder.get_metadata();
    assert!(envelope.is_success());
    let rdata = envelope.rdata.expect("metadata payload");
    assert_eq!(rdata["type"], "web");
    assert_eq!(rdata["url"], "http://localhost:3000");
    // No recording yet: duration fields are omitted.
    assert!(rdata.get("durationMs").is_none());
    assert!(rdata.get("duration").is_none());
}

#[tokio::test]
async fn close_in_idle_is_a_success_no_op() {
    let recorder = recorder();
    assert!(recorder.close().await.is_success());
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[tokio::test]
async fn failed_launch_returns_launch_failed_and_stays_reusable() {
    let recorder = Recorder::new(RecorderOptions::new(
        "http://localhost:3000",
        "/nonexistent/chromium-binary",
    ))
    .expect("valid options");

    let envelope = recorder.launch_page().await;
    assert_eq!(envelope.stcod, Some(StatusCode::LaunchFailed));
    assert_eq!(recorder.state(), RecorderState::Idle);

    // Not ALREADY_LAUNCHED: the machine went back to Idle.
    let envelope = recorder.launch_page().await;
    assert_eq!(envelope.stcod, Some(StatusCode::LaunchFailed));
}

#[tokio::test]
async fn replayer_failed_launch_returns_launch_failed() {
    let replayer = Replayer::new(ReplayerOptions::new(
        "http://localhost:3000",
        "/nonexistent/chromium-binary",
    ))
    .expect("valid options");

    let envelope = replayer.launch_page().await;
    assert_eq!(envelope.stcod, Some(StatusCode::LaunchFailed));
    assert_eq!(replayer.state(), ReplayerState::Idle);
}

#[tokio::test]
async fn replay_operations_gate_on_state() {
    let replayer = replayer();

    let envelope = replayer.play(json!({ "actions": [] })).await;
    assert_eq!(envelope.stcod, Some(StatusCode::NoPageFound));

    let envelope = replayer.stop();
    assert_eq!(envelope.stcod, Some(StatusCode::NotPlaying));

    let envelope = replayer.reload_page().await;
    assert_eq!(envelope.stcod, Some(StatusCode::NoPageFound));
}

#[tokio::test]
async fn idle_close_does_not_emit_the_close_channel() {
    struct Closes(AtomicUsize);
    impl RecorderHandler for Closes {
        fn on_close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let recorder = recorder();
    let closes = Arc::new(Closes(AtomicUsize::new(0)));
    recorder.subscribe(closes.clone());

    // Idle close is a no-op and must not emit.
    recorder.close().await;
    assert_eq!(closes.0.load(Ordering::SeqCst), 0);
}

#[test]
fn envelope_uses_wire_field_names() {
    let recorder = recorder();
    let value = serde_json::to_value(recorder.get_metadata()).expect("serializable");
    assert_eq!(value["RETCD"], "S");
    assert!(value.get("STCOD").is_none());
    assert!(value.get("RDATA").is_some());
}
