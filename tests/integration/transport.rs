//! Timecode delivery scenarios.

use std::sync::Arc;

use approx::assert_relative_eq;

use crate::helpers::*;
use patchbay::prelude::*;

fn timecode_player(engine: Arc<ScriptedEngine>) -> (Arc<ManualAudioPlayer>, PatchPlayer) {
    let io = ManualAudioPlayer::with_options(AudioIoOptions {
        sample_rate: 48000.0,
        block_size: 128,
        input_channels: 2,
        output_channels: 2,
    });
    let mut player = PatchPlayer::new(engine);
    player.set_audio_io(Some(io.clone() as Arc<dyn AudioMidiPlayer>));
    (io, player)
}

fn positions(engine: &ScriptedEngine) -> Vec<(u64, f64, f64)> {
    engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Position {
                frame,
                quarter_note,
                bar_start_quarter_note,
            } => Some((frame, quarter_note, bar_start_quarter_note)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_transport_deltas_and_position() {
    // bpm=120, 3/4, playing: the first block carries exactly one transport
    // state, one bpm, one time signature and a zero position; 24000 frames
    // later the position reads one quarter note.
    let engine = Arc::new(ScriptedEngine::with_timecode());
    let (io, mut player) = timecode_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));

    player.set_tempo(120.0);
    player.set_time_sig(3, 4);
    player.set_transport(true, false);

    engine.clear_calls();
    io.render_block(128);

    let calls: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| !c.is_chunk())
        .collect();
    assert_eq!(
        calls,
        vec![
            EngineCall::TransportState {
                playing: true,
                recording: false,
                looping: false,
            },
            EngineCall::Bpm(120.0),
            EngineCall::TimeSig(3, 4),
            EngineCall::Position {
                frame: 0,
                quarter_note: 0.0,
                bar_start_quarter_note: 0.0,
            },
        ]
    );

    // Render up to 24000 total frames, then look at the next block.
    io.render(24_000 - 128);
    assert_eq!(player.total_frames_rendered(), 24_000);

    engine.clear_calls();
    io.render_block(128);

    let positions = positions(&engine);
    assert_eq!(positions.len(), 1);
    let (frame, quarter_note, bar_start) = positions[0];
    assert_eq!(frame, 24_000);
    assert_relative_eq!(quarter_note, 1.0, epsilon = 1e-9);
    assert_relative_eq!(bar_start, 0.0, epsilon = 1e-9);

    // No deltas were re-sent: transport hints were unchanged.
    let non_position: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| {
            !c.is_chunk() && !matches!(c, EngineCall::Position { .. })
        })
        .collect();
    assert!(non_position.is_empty(), "unexpected deltas: {non_position:?}");
}

#[test]
fn test_tempo_change_mid_session_emits_one_delta() {
    let engine = Arc::new(ScriptedEngine::with_timecode());
    let (io, mut player) = timecode_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));
    io.render_block(128);

    engine.clear_calls();
    player.set_tempo(90.0);
    io.render_block(128);
    io.render_block(128);

    let bpm_calls: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::Bpm(_)))
        .collect();
    assert_eq!(bpm_calls, vec![EngineCall::Bpm(90.0)]);
}

#[test]
fn test_position_follows_the_frame_counter() {
    // 48000 frames at 120 BPM / 48 kHz is two quarter notes (4/4: bar one).
    let engine = Arc::new(ScriptedEngine::with_timecode());
    let (io, mut player) = timecode_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));
    player.set_tempo(120.0);
    player.set_time_sig(4, 4);

    io.render(48_000);
    engine.clear_calls();
    io.render_block(128);

    let positions = positions(&engine);
    assert_eq!(positions.len(), 1);
    assert_relative_eq!(positions[0].1, 2.0, epsilon = 1e-9);
    assert_relative_eq!(positions[0].2, 0.0, epsilon = 1e-9);
}

#[test]
fn test_engine_without_timecode_gets_nothing() {
    let engine = Arc::new(ScriptedEngine::new());
    let (io, mut player) = timecode_player(engine.clone());
    player.start();
    assert!(player.load_patch("sine.patch"));
    player.set_tempo(120.0);
    player.set_transport(true, false);

    io.render(1024);
    assert!(engine.calls().iter().all(EngineCall::is_chunk));
}
