//! Transport slots and the per-block timecode generator.
//!
//! Host transport hints are written from any thread into atomic slots and
//! read once per render block on the audio thread. The generator compares
//! against the values last sent to the patch and emits deltas, plus one
//! position event per block.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::{Engine, Position};
use crate::lockfree::RtSlot;

const FLAG_PLAYING: u32 = 1 << 0;
const FLAG_RECORDING: u32 = 1 << 1;
const FLAG_LOOPING: u32 = 1 << 2;

/// Lock-free transport hint slots shared with the audio thread.
///
/// The time signature is packed as `(numerator << 16) | denominator` so
/// both halves are always read together.
#[derive(Debug)]
pub struct TransportSlots {
    bpm: RtSlot<f32>,
    time_sig: AtomicU32,
    flags: AtomicU32,
}

impl Default for TransportSlots {
    fn default() -> Self {
        Self {
            bpm: RtSlot::new(120.0),
            time_sig: AtomicU32::new((4 << 16) | 4),
            flags: AtomicU32::new(0),
        }
    }
}

impl TransportSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tempo(&self, bpm: f32) {
        self.bpm.set(bpm);
    }

    pub fn set_time_sig(&self, numerator: u16, denominator: u16) {
        self.time_sig.store(
            (u32::from(numerator) << 16) | u32::from(denominator),
            Ordering::Release,
        );
    }

    /// Update the play/record flags, leaving the loop flag untouched.
    pub fn set_transport(&self, playing: bool, recording: bool) {
        let mut bits = 0;
        if playing {
            bits |= FLAG_PLAYING;
        }
        if recording {
            bits |= FLAG_RECORDING;
        }
        let _ = self
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                Some((f & FLAG_LOOPING) | bits)
            });
    }

    pub fn set_looping(&self, looping: bool) {
        if looping {
            self.flags.fetch_or(FLAG_LOOPING, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!FLAG_LOOPING, Ordering::AcqRel);
        }
    }

    pub fn tempo(&self) -> f32 {
        self.bpm.get()
    }

    pub fn time_sig(&self) -> (u16, u16) {
        let packed = self.time_sig.load(Ordering::Acquire);
        ((packed >> 16) as u16, (packed & 0xffff) as u16)
    }

    pub fn is_playing(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_PLAYING != 0
    }

    pub fn is_recording(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_RECORDING != 0
    }

    pub fn is_looping(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_LOOPING != 0
    }

    fn raw(&self) -> (f32, u32, u32) {
        (
            self.bpm.get(),
            self.time_sig.load(Ordering::Acquire),
            self.flags.load(Ordering::Acquire),
        )
    }
}

/// Per-block timecode emitter. Audio-thread state; one per render callback.
pub struct TimecodeGenerator {
    last_bpm: Option<f32>,
    last_time_sig: Option<u32>,
    last_flags: Option<u32>,
}

impl Default for TimecodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimecodeGenerator {
    pub fn new() -> Self {
        Self {
            last_bpm: None,
            last_time_sig: None,
            last_flags: None,
        }
    }

    /// Forget the last-sent values, so the next block re-announces
    /// everything. Called after a patch load.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Emit transport deltas and the per-block position event at the top of
    /// a render block. No-op unless the patch asked for timecode.
    pub fn emit_for_block(
        &mut self,
        engine: &dyn Engine,
        slots: &TransportSlots,
        total_frames_rendered: u64,
        sample_rate: f64,
    ) {
        if !engine.wants_timecode_events() {
            return;
        }

        let (bpm, time_sig, flags) = slots.raw();

        if self.last_flags != Some(flags) {
            engine.send_transport_state(
                flags & FLAG_PLAYING != 0,
                flags & FLAG_RECORDING != 0,
                flags & FLAG_LOOPING != 0,
            );
            self.last_flags = Some(flags);
        }

        if self.last_bpm.map(f32::to_bits) != Some(bpm.to_bits()) {
            engine.send_bpm(bpm);
            self.last_bpm = Some(bpm);
        }

        if self.last_time_sig != Some(time_sig) {
            engine.send_time_sig((time_sig >> 16) as u16, (time_sig & 0xffff) as u16);
            self.last_time_sig = Some(time_sig);
        }

        engine.send_position(position_at(
            total_frames_rendered,
            sample_rate,
            bpm,
            (time_sig >> 16) as u16,
            (time_sig & 0xffff) as u16,
        ));
    }
}

/// Musical position for a frame counter at the given tempo and meter.
///
/// Degenerate transport values (zero tempo, numerator or denominator)
/// report zeroed positional fields.
pub fn position_at(frame: u64, sample_rate: f64, bpm: f32, num: u16, den: u16) -> Position {
    if bpm == 0.0 || num == 0 || den == 0 {
        return Position {
            frame,
            quarter_note: 0.0,
            bar_start_quarter_note: 0.0,
        };
    }

    let samples_per_quarter = sample_rate / (f64::from(bpm) / 60.0);
    let quarter_note = frame as f64 / samples_per_quarter;
    let quarters_per_bar = 4.0 * f64::from(num) / f64::from(den);
    let bar_start_quarter_note = (quarter_note / quarters_per_bar).floor() * quarters_per_bar;

    Position {
        frame,
        quarter_note,
        bar_start_quarter_note,
    }
}
