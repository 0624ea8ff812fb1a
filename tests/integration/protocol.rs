//! End-to-end protocol scenarios over the loopback harness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::helpers::*;
use patchbay::prelude::*;
use patchbay::InMemoryContent;

#[test]
fn test_parameter_gesture_reaches_engine_in_order() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine.clone());
    assert!(harness.host.player_mut().load_patch("test.patch"));

    let connection = harness.session.create_connection();
    connection.send_gesture_start("gain");
    connection.send_event_or_value("gain", json!(0.25), None, None);
    connection.send_event_or_value("gain", json!(0.5), None, None);
    connection.send_gesture_end("gain");
    harness.pump();

    let calls: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| !c.is_chunk())
        .collect();
    assert_eq!(
        calls,
        vec![
            EngineCall::GestureStart("gain".into()),
            EngineCall::Value("gain".into(), json!(0.25)),
            EngineCall::Value("gain".into(), json!(0.5)),
            EngineCall::GestureEnd("gain".into()),
        ]
    );

    // A subsequent query returns the last written value, on both the
    // per-parameter and the global key.
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();
    connection.add_parameter_listener("gain", move |m| v.lock().push(m["value"].clone()));
    let v = values.clone();
    connection.add_all_parameter_listener(move |m| v.lock().push(m["value"].clone()));

    connection.request_parameter_value("gain");
    harness.pump();

    assert_eq!(*values.lock(), vec![json!(0.5), json!(0.5)]);
}

#[test]
fn test_stale_endpoint_writes_are_dropped() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine.clone());
    assert!(harness.host.player_mut().load_patch("test.patch"));

    let connection = harness.session.create_connection();
    connection.send_event_or_value("removed_knob", json!(1.0), None, None);
    harness.pump();

    assert!(engine.calls().iter().all(|c| !matches!(
        c,
        EngineCall::Value(id, _) if id == "removed_knob"
    )));
}

#[test]
fn test_audio_endpoint_listener_summary() {
    // 10240 frames of a 0.7-amplitude sine at granularity 1024: exactly 10
    // updates, each spanning the full wave.
    let engine = Arc::new(ScriptedEngine::with_amplitude(0.7));
    let mut harness = Harness::new(engine);
    let io = ManualAudioPlayer::with_options(AudioIoOptions {
        sample_rate: TEST_SAMPLE_RATE,
        block_size: TEST_BLOCK_SIZE,
        input_channels: 2,
        output_channels: 2,
    });
    harness
        .host
        .player_mut()
        .set_audio_io(Some(io.clone() as Arc<dyn AudioMidiPlayer>));
    assert!(harness.host.player_mut().load_patch("sine.patch"));
    harness.host.player_mut().start();

    let updates = Arc::new(Mutex::new(Vec::new()));
    let u = updates.clone();
    let connection = harness.session.create_connection();
    connection.add_endpoint_listener("out", Some(1024), false, move |m| {
        u.lock().push(m.clone());
    });
    harness.pump();

    io.render(10_240);
    harness.service();

    let updates = updates.lock();
    assert_eq!(updates.len(), 10);
    for update in updates.iter() {
        let min = update["min"][0].as_f64().unwrap();
        let max = update["max"][0].as_f64().unwrap();
        assert!((min + 0.7).abs() < 0.01, "min was {min}");
        assert!((max - 0.7).abs() < 0.01, "max was {max}");
    }
}

#[test]
fn test_event_endpoint_listener_receives_values() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine.clone());
    let io = ManualAudioPlayer::new();
    harness
        .host
        .player_mut()
        .set_audio_io(Some(io.clone() as Arc<dyn AudioMidiPlayer>));
    assert!(harness.host.player_mut().load_patch("test.patch"));
    harness.host.player_mut().start();

    let updates = Arc::new(Mutex::new(Vec::new()));
    let u = updates.clone();
    let connection = harness.session.create_connection();
    let token = connection.add_endpoint_listener("envelope", None, false, move |m| {
        u.lock().push(m["value"].clone());
    });
    harness.pump();

    engine.push_output_event(3, "envelope", json!(0.8));
    io.render_block(128);
    harness.service();
    assert_eq!(*updates.lock(), vec![json!(0.8)]);

    // After removal the subscription is gone on both sides.
    connection.remove_endpoint_listener(&token);
    harness.pump();
    engine.push_output_event(9, "envelope", json!(0.1));
    io.render_block(128);
    harness.service();
    assert_eq!(updates.lock().len(), 1);
}

#[test]
fn test_virtual_file_read_round_trip() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine);

    let pattern: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();
    harness
        .session
        .register_file("sample.wav", Arc::new(InMemoryContent::new(pattern.clone())));
    harness.pump();

    let received = Arc::new(Mutex::new(None));
    let r = received.clone();
    harness
        .host
        .request_file_read("sample.wav", 100, 50, move |start, bytes| {
            *r.lock() = Some((start, bytes));
        });
    harness.pump();

    let received = received.lock();
    let (start, bytes) = received.as_ref().expect("file content arrived");
    assert_eq!(*start, 100);
    assert_eq!(bytes, &pattern[100..150]);
}

#[test]
fn test_full_stored_state_round_trip() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine);
    assert!(harness.host.player_mut().load_patch("test.patch"));
    let connection = harness.session.create_connection();

    let state = json!({ "preset": "warm", "mix": 0.3, "tags": ["a", "b"] });
    connection.send_full_stored_state(state.clone());

    let received = Arc::new(Mutex::new(None));
    let r = received.clone();
    connection.request_full_stored_state(move |v| *r.lock() = Some(v));
    harness.pump();

    assert_eq!(received.lock().clone().unwrap(), state);
}

#[test]
fn test_stored_state_single_key() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine);
    let connection = harness.session.create_connection();

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    connection.add_event_listener("state_key_value", move |m| r.lock().push(m.clone()));

    connection.send_stored_state_value("window", json!({ "w": 640 }));
    connection.request_stored_state_value("window");
    harness.pump();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["key"], "window");
    assert_eq!(received[0]["value"]["w"], 640);
}

#[test]
fn test_reset_keeps_stored_state() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine.clone());
    assert!(harness.host.player_mut().load_patch("test.patch"));
    let connection = harness.session.create_connection();

    connection.send_stored_state_value("k", json!(1));
    connection.send_event_or_value("gain", json!(0.9), None, None);
    connection.reset();
    harness.pump();

    assert!(engine.calls().contains(&EngineCall::Reset));
    assert_eq!(engine.state_value("k"), Some(json!(1)));
    assert_eq!(engine.parameter_value("gain"), None, "engine state cleared");
}

#[test]
fn test_status_request_reflects_loaded_patch() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine);
    assert!(harness.host.player_mut().load_patch("reverb.patch"));

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = statuses.clone();
    let connection = harness.session.create_connection();
    connection.add_status_listener(move |m| s.lock().push(m.clone()));

    connection.request_status();
    harness.pump();

    let statuses = statuses.lock();
    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert_eq!(status["loaded"], true);
    assert_eq!(status["manifest"]["name"], "reverb.patch");
    let inputs = status["details"]["inputs"].as_array().unwrap();
    assert!(inputs.iter().any(|e| e["endpointID"] == "gain"));
    let outputs = status["details"]["outputs"].as_array().unwrap();
    assert!(outputs.iter().any(|e| e["endpointID"] == "out"));

    assert_eq!(connection.cached_manifest().unwrap()["name"], "reverb.patch");
}

#[test]
fn test_watchdog_reports_lost_transport_once() {
    let engine = Arc::new(ScriptedEngine::new());
    let harness = Harness::new(engine);

    let fired = Arc::new(Mutex::new(Vec::<Value>::new()));
    let f = fired.clone();
    harness.session.add_status_listener(move |m| f.lock().push(m.clone()));

    let start = Instant::now();
    harness
        .session
        .check_liveness_at(start + Duration::from_secs(9));
    assert!(fired.lock().is_empty());

    for secs in [11, 13, 15, 17] {
        harness
            .session
            .check_liveness_at(start + Duration::from_secs(secs));
    }

    let fired = fired.lock();
    assert_eq!(fired.len(), 1, "one report per disconnection interval");
    assert_eq!(fired[0]["connected"], false);
    assert_eq!(fired[0]["loaded"], false);
    assert_eq!(fired[0]["status"], "Cannot connect");
}

#[test]
fn test_cpu_info_flows_at_configured_rate() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut harness = Harness::new(engine);
    let io = ManualAudioPlayer::new();
    harness
        .host
        .player_mut()
        .set_audio_io(Some(io.clone() as Arc<dyn AudioMidiPlayer>));
    assert!(harness.host.player_mut().load_patch("test.patch"));
    harness.host.player_mut().start();

    let infos = Arc::new(Mutex::new(Vec::new()));
    let i = infos.clone();
    harness
        .session
        .add_event_listener("cpu_info", move |m| i.lock().push(m.clone()));
    harness.session.set_cpu_info_rate(1024);
    harness.pump();

    io.render(4096);
    harness.service();

    let infos = infos.lock();
    assert_eq!(infos.len(), 1, "one cpu_info per service pass past the cadence");
    assert!(infos[0]["cpu"].is_number());
}
