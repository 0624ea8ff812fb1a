//! Player lifecycle and render-path scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::helpers::*;
use patchbay::prelude::*;

fn bound_player(engine: Arc<ScriptedEngine>) -> (Arc<ManualAudioPlayer>, PatchPlayer) {
    let io = ManualAudioPlayer::with_options(AudioIoOptions {
        sample_rate: TEST_SAMPLE_RATE,
        block_size: TEST_BLOCK_SIZE,
        input_channels: 2,
        output_channels: 2,
    });
    let mut player = PatchPlayer::new(engine);
    player.set_audio_io(Some(io.clone() as Arc<dyn AudioMidiPlayer>));
    (io, player)
}

#[test]
fn test_load_and_render_idle() {
    // A 440 Hz sine patch at 48 kHz / 128-frame blocks, 480000 frames with
    // no MIDI: all frames rendered, one load notification, loaded status.
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = bound_player(engine.clone());

    let loads = Arc::new(AtomicUsize::new(0));
    let l = loads.clone();
    player.set_on_patch_loaded(move || {
        l.fetch_add(1, Ordering::SeqCst);
    });

    player.start();
    assert!(player.load_patch("sine.patch"));

    let output = io.render(480_000);
    assert_eq!(output.len(), 480_000 * 2);
    assert_eq!(player.total_frames_rendered(), 480_000);

    let peak = output.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    assert!((peak - 0.7).abs() < 0.01, "sine peak was {peak}");

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(player.status().loaded);
    assert!(player.status().error.is_none());
}

#[test]
fn test_midi_events_split_the_block() {
    // Events at offsets 0 and 64 inside a 128-frame block: the engine sees
    // contiguous event-aligned chunks covering the block exactly once, and
    // each event rides the chunk starting at its own offset.
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = bound_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));

    let callback = player.render_callback().expect("callback exists");
    callback.add_incoming_midi_event(&[0x90, 60, 100]);
    callback.add_incoming_midi_event_at(64, &[0x80, 60, 0]);

    engine.clear_calls();
    io.render_block(128);

    let chunks: Vec<_> = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Chunk {
                start,
                frames,
                midi,
            } => Some((start, frames, midi.len())),
            _ => None,
        })
        .collect();

    assert_eq!(chunks, vec![(0, 64, 1), (64, 64, 1)]);
}

#[test]
fn test_midi_beyond_block_is_deferred() {
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = bound_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));

    let callback = player.render_callback().expect("callback exists");
    callback.add_incoming_midi_event_at(130, &[0x90, 60, 100]);

    engine.clear_calls();
    io.render_block(128);
    let first: Vec<_> = engine.calls().into_iter().filter(|c| c.is_chunk()).collect();
    assert_eq!(
        first,
        vec![EngineCall::Chunk {
            start: 0,
            frames: 128,
            midi: vec![],
        }]
    );

    engine.clear_calls();
    io.render_block(128);
    let second: Vec<_> = engine.calls().into_iter().filter(|c| c.is_chunk()).collect();
    // Rebased to offset 2 in the following block.
    assert_eq!(second.len(), 2);
    assert!(matches!(
        second[1],
        EngineCall::Chunk { start: 2, .. }
    ));
}

#[test]
fn test_render_failure_detaches_and_reports() {
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = bound_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));
    assert_eq!(io.callback_count(), 1);

    engine.fail_next_render();
    let output = io.render_block(128);
    assert!(output.iter().all(|&s| s == 0.0), "failed block must be silent");

    player.service(|_, _| {});
    assert_eq!(io.callback_count(), 0, "callback must detach after failure");

    let status = player.status();
    assert!(status.loaded, "patch stays loaded pending reset");
    assert!(status.error.is_some());
}

#[test]
fn test_output_events_reach_the_control_thread() {
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = bound_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();
    player.set_on_output_event(move |frame, endpoint, value| {
        s.lock().push((frame, endpoint.to_string(), value.clone()));
    });

    engine.push_output_event(7, "envelope", serde_json::json!(0.25));
    io.render_block(128);
    player.service(|_, _| {});

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, "envelope");
    assert_eq!(seen[0].2, serde_json::json!(0.25));
}

#[test]
fn test_unbinding_audio_io_installs_safe_defaults() {
    let engine = Arc::new(ScriptedEngine::new());
    let (_, mut player) = bound_player(engine);
    player.set_audio_io(None);

    let options = player.options();
    assert_eq!(options.sample_rate, 44100.0);
    assert_eq!(options.block_size, 256);
    assert_eq!(options.input_channels, 2);
    assert_eq!(options.output_channels, 2);

    // Patches stay loadable without a device.
    assert!(player.load_patch("sine.patch"));
}
