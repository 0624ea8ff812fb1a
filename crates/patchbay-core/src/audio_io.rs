//! The consumed audio/MIDI device layer.
//!
//! The OS device layer is out of scope; the player talks to it through
//! these traits. A player implementation invokes each registered callback
//! from its device thread, handing it interleaved buffers.

use std::sync::Arc;

/// Device configuration read from a bound audio player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioIoOptions {
    pub sample_rate: f64,
    pub block_size: u32,
    pub input_channels: u32,
    pub output_channels: u32,
}

impl Default for AudioIoOptions {
    /// Safe defaults installed when no device is bound, so patches remain
    /// loadable without audio I/O.
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 256,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

/// A render client registered with an audio/MIDI player.
///
/// Methods take `&self`: the device layer may invoke them from its own
/// thread, and implementations keep their audio-thread state behind
/// interior mutability.
pub trait AudioProcessorCallback: Send + Sync {
    /// Called once before the first `process`, with the device sample rate.
    fn prepare_to_start(&self, sample_rate: f64);

    /// Queue an incoming MIDI message for the next render block.
    fn add_incoming_midi_event(&self, bytes: &[u8]);

    /// Render one block of interleaved audio.
    fn process(&self, input: &[f32], output: &mut [f32], replace_output: bool);
}

/// A multi-client audio/MIDI player (the OS device wrapper).
pub trait AudioMidiPlayer: Send + Sync {
    fn options(&self) -> AudioIoOptions;

    fn add_callback(&self, callback: Arc<dyn AudioProcessorCallback>);

    /// Remove a previously added callback, matched by pointer identity.
    fn remove_callback(&self, callback: &Arc<dyn AudioProcessorCallback>);
}
