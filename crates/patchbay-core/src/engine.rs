//! The consumed engine interface and the records exchanged with it.
//!
//! The engine owns the compiled DSP program; the player drives it. All
//! `send_*` calls are writes into the engine's lock-free mailboxes and are
//! callable from the control thread (or, for timecode, the audio thread)
//! without blocking. `begin_chunked_process`, `process_chunk`,
//! `end_chunked_process` and `drain_output_events` are audio-thread only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::EndpointDescriptor;
use crate::error::Result;
use crate::midi::MidiEvent;

/// Compile-time settings handed to the engine before a load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    pub frequency: f64,
    pub max_frames_per_block: u32,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            frequency: 44100.0,
            max_frames_per_block: 512,
        }
    }
}

/// Playback parameters republished whenever the audio device changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackParams {
    pub sample_rate: f64,
    pub block_size: u32,
    pub input_channels: u32,
    pub output_channels: u32,
}

/// Musical playhead position, derived once per render block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub frame: u64,
    pub quarter_note: f64,
    pub bar_start_quarter_note: f64,
}

/// One event-aligned sub-block of a render window.
///
/// Audio is interleaved; `input` holds `frames * input_channels` samples and
/// `output` holds `frames * output_channels`. The MIDI events all sit at the
/// sub-block's first frame.
pub struct AudioChunk<'a> {
    /// Offset of this sub-block within the parent render block.
    pub start_frame: u32,
    pub frames: u32,
    pub input_channels: u32,
    pub output_channels: u32,
    pub input: &'a [f32],
    pub output: &'a mut [f32],
    pub midi: &'a [MidiEvent],
}

/// Input/output halves of the endpoint table, as published in a status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    pub inputs: Vec<EndpointDescriptor>,
    pub outputs: Vec<EndpointDescriptor>,
}

/// Snapshot of the patch/session state published to clients.
///
/// Immutable once published; a new status always replaces the previous one
/// wholesale rather than mutating it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchStatus {
    pub connected: bool,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "httpRootURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub http_root_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_gen_targets: Option<Vec<String>>,
    /// Human-readable state, e.g. "Cannot connect" from the watchdog.
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A compiled-patch engine, as consumed by the player.
///
/// Implementations synchronise internally: the control thread issues loads,
/// parameter writes and state access while the audio thread renders. The
/// `send_*` mailbox writes must never block.
pub trait Engine: Send + Sync {
    fn set_build_settings(&self, settings: BuildSettings);

    /// Republish device parameters. Called on audio I/O bind/unbind and
    /// before each load so patches compile against the active rates.
    fn set_playback_params(&self, params: PlaybackParams);

    /// Build the patch at `path`, returning its manifest.
    fn load(&self, path: &str) -> Result<Value>;

    /// The endpoint table of the loaded patch; empty before a load.
    fn endpoints(&self) -> Vec<EndpointDescriptor>;

    fn wants_timecode_events(&self) -> bool {
        false
    }

    /// Write to a value endpoint. Returns false for unknown endpoints.
    /// `timeout` is engine-defined (typically how long the engine may wait
    /// for a quiescent point mid-render).
    fn send_value(
        &self,
        endpoint_id: &str,
        value: &Value,
        ramp_frames: Option<u32>,
        timeout: Option<u32>,
    ) -> bool;

    /// Post to an event endpoint. Returns false for unknown endpoints.
    fn send_event(&self, endpoint_id: &str, value: &Value, timeout: Option<u32>) -> bool;

    fn begin_parameter_gesture(&self, endpoint_id: &str);
    fn end_parameter_gesture(&self, endpoint_id: &str);

    /// Current value of a parameter endpoint.
    fn parameter_value(&self, endpoint_id: &str) -> Option<Value>;

    // Stored state is owned by the patch; the core is a pass-through.
    fn state_value(&self, key: &str) -> Option<Value>;
    fn set_state_value(&self, key: &str, value: Value);
    fn full_state(&self) -> Value;
    fn set_full_state(&self, value: Value);

    /// Reset to the post-load state. Stored state survives.
    fn reset(&self);

    /// Lock a per-render view of the parameter values.
    fn begin_chunked_process(&self);

    /// Render one sub-block. `replace_output` asks the engine to overwrite
    /// rather than mix into the output buffer.
    fn process_chunk(&self, chunk: &mut AudioChunk<'_>, replace_output: bool) -> Result<()>;

    fn end_chunked_process(&self);

    /// Pull pending output events as `(frame, endpoint_id, value)` tuples.
    fn drain_output_events(&self, sink: &mut dyn FnMut(u64, &str, Value));

    // Timecode, delivered only when wants_timecode_events() is true.
    fn send_bpm(&self, bpm: f32);
    fn send_time_sig(&self, numerator: u16, denominator: u16);
    fn send_transport_state(&self, playing: bool, recording: bool, looping: bool);
    fn send_position(&self, position: Position);
}
