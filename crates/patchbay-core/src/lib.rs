//! Patch player runtime kernel.
//!
//! Hosts a compiled audio patch behind the [`Engine`] trait, drives it from
//! a real-time audio/MIDI callback with event-aligned sub-block dispatch
//! and sample-accurate timecode, and surfaces endpoint telemetry to the
//! control thread.
//!
//! ```ignore
//! let mut player = PatchPlayer::new(engine);
//! player.set_audio_io(Some(device));
//! player.start();
//! player.load_patch("reverb.patch");
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod audio_io;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod midi;
pub mod telemetry;
pub mod timecode;

pub(crate) mod lockfree;
mod player;

pub use audio_io::{AudioIoOptions, AudioMidiPlayer, AudioProcessorCallback};
pub use dispatch::split_into_chunks;
pub use endpoint::{Annotation, EndpointDescriptor, EndpointPurpose};
pub use engine::{
    AudioChunk, BuildSettings, Engine, PatchStatus, PlaybackParams, Position, StatusDetails,
};
pub use lockfree::{RtSlot, RtValue};
pub use midi::{MidiEvent, ShortMessage};
pub use player::{PatchPlayer, RenderCallback};
pub use telemetry::{
    EndpointMonitor, EndpointUpdate, MonitorSet, RenderLoadMeter, DEFAULT_GRANULARITY,
};
pub use timecode::{position_at, TimecodeGenerator, TransportSlots};
