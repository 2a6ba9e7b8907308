//! End-to-end smoke tests against a real Chrome.
//!
//! Ignored by default: they need a local browser. Run with
//!
//! ```sh
//! RELIVE_CHROME=/usr/bin/chromium cargo test -p relive-core -- --ignored
//! ```

use serde_json::Value;

use relive_core::{
    Action, Recorder, RecorderOptions, RecorderState, Recording, Replayer, ReplayerOptions,
    StatusCode,
};

const FIXTURE_URL: &str = "data:text/html,<html><head><title>relive-fixture</title></head>\
<body><input id=%22user%22 type=%22text%22><button id=%22go%22>Go</button></body></html>";

fn chrome_path() -> String {
    std::env::var("RELIVE_CHROME").unwrap_or_else(|_| "/usr/bin/chromium".to_string())
}

#[tokio::test]
#[ignore = "requires a local Chrome (set RELIVE_CHROME)"]
async fn record_stop_close_roundtrip() {
    let recorder = Recorder::new(RecorderOptions::new(FIXTURE_URL, chrome_path()))
        .expect("valid options");

    let envelope = recorder.launch_page().await;
    assert!(envelope.is_success(), "launch failed: {envelope:?}");
    assert_eq!(recorder.state(), RecorderState::Ready);

    let envelope = recorder.start_recording().await;
    assert!(envelope.is_success(), "start failed: {envelope:?}");

    // A second start without an intervening stop is rejected.
    let envelope = recorder.start_recording().await;
    assert_eq!(envelope.stcod, Some(StatusCode::AlreadyRecording));

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let envelope = recorder.stop_recording().await;
    assert!(envelope.is_success(), "stop failed: {envelope:?}");
    let recording: Recording =
        serde_json::from_value(envelope.rdata.expect("recording payload")).expect("recording");

    // Every recording opens with the equal-from/to resize.
    match &recording.actions[0] {
        Action::BrowserResize {
            from_width,
            from_height,
            to_width,
            to_height,
            ..
        } => {
            assert_eq!(from_width, to_width);
            assert_eq!(from_height, to_height);
        }
        other => panic!("expected initial browser_resize, got {other:?}"),
    }
    // Timestamps are sorted.
    for pair in recording.actions.windows(2) {
        assert!(pair[0].timestamp() <= pair[1].timestamp());
    }
    assert!(recording.recording_end_time >= recording.recording_start_time);

    assert!(recorder.close().await.is_success());
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[tokio::test]
#[ignore = "requires a local Chrome (set RELIVE_CHROME)"]
async fn replay_a_minimal_recording() {
    let replayer = Replayer::new(ReplayerOptions::new(FIXTURE_URL, chrome_path()))
        .expect("valid options");

    let envelope = replayer.launch_page().await;
    assert!(envelope.is_success(), "launch failed: {envelope:?}");

    let record_data = serde_json::json!({
        "type": "web",
        "actions": [
            { "type": "browser_resize", "timestamp": 1000,
              "fromWidth": 1024, "fromHeight": 720,
              "toWidth": 1024, "toHeight": 720 },
            { "type": "click", "timestamp": 1200, "selector": "#user", "x": 60, "y": 30 },
            { "type": "input", "timestamp": 1400, "selector": "#user", "value": "alice" },
            { "type": "keydown", "timestamp": 1600, "selector": "#user", "key": "Enter" },
        ],
        "recordingEndTime": 1700,
    });

    let envelope = replayer.play(record_data).await;
    assert!(envelope.is_success(), "play failed: {envelope:?}");
    let rdata = envelope.rdata.expect("console errors payload");
    assert!(matches!(rdata.get("consoleErrors"), Some(Value::Array(_))));

    let envelope = replayer
        .capture_screen(relive_core::CaptureScreenOptions::default())
        .await;
    assert!(envelope.is_success(), "screenshot failed: {envelope:?}");
    assert!(envelope.rdata.expect("payload").get("data").is_some());

    assert!(replayer.close().await.is_success());
}
