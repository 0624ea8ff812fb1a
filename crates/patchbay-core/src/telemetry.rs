//! Endpoint telemetry: per-subscription monitors and the render-load meter.
//!
//! Each endpoint listener subscription becomes one monitor, keyed by its
//! reply type. Audio monitors accumulate per-channel min/max over a
//! granularity window (or raw frames when full audio data was requested)
//! on the audio thread; event monitors fan engine output events out on the
//! control thread.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use smallvec::SmallVec;

use crate::lockfree::RtSlot;

/// Default telemetry window when a subscription names no granularity.
pub const DEFAULT_GRANULARITY: u32 = 1024;

/// One coalesced update for an endpoint listener.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointUpdate {
    /// Per-channel extrema over one granularity window.
    Levels { min: Vec<f32>, max: Vec<f32> },
    /// Raw frames, one row of per-channel samples per frame.
    Frames { data: Vec<Vec<f32>> },
    /// A single value from an event endpoint.
    Event { value: Value },
}

impl EndpointUpdate {
    /// Render as a wire message tagged with the subscription's reply type.
    pub fn into_message(self, reply_type: &str) -> Value {
        match self {
            Self::Levels { min, max } => json!({ "type": reply_type, "min": min, "max": max }),
            Self::Frames { data } => json!({ "type": reply_type, "data": data }),
            Self::Event { value } => json!({ "type": reply_type, "value": value }),
        }
    }
}

struct SummariserState {
    frames: u32,
    min: SmallVec<[f32; 2]>,
    max: SmallVec<[f32; 2]>,
    data: Vec<Vec<f32>>,
}

/// One endpoint listener subscription.
///
/// `feed` runs on the audio thread; everything else is immutable after
/// construction.
pub struct EndpointMonitor {
    pub reply_type: String,
    pub endpoint_id: String,
    pub granularity: u32,
    pub full_audio_data: bool,
    /// Channel count summarised for audio endpoints; 0 for event endpoints.
    pub channels: u32,
    state: UnsafeCell<SummariserState>,
}

// SAFETY: `state` is only touched by `feed`, which runs on the audio thread;
// the monitor set snapshot hands the audio thread exclusive access to it.
unsafe impl Send for EndpointMonitor {}
unsafe impl Sync for EndpointMonitor {}

impl EndpointMonitor {
    pub fn new(
        reply_type: impl Into<String>,
        endpoint_id: impl Into<String>,
        granularity: u32,
        full_audio_data: bool,
        channels: u32,
    ) -> Self {
        let granularity = granularity.max(1);
        let ch = channels as usize;
        Self {
            reply_type: reply_type.into(),
            endpoint_id: endpoint_id.into(),
            granularity,
            full_audio_data,
            channels,
            state: UnsafeCell::new(SummariserState {
                frames: 0,
                min: SmallVec::from_elem(f32::MAX, ch),
                max: SmallVec::from_elem(f32::MIN, ch),
                data: Vec::new(),
            }),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.channels > 0
    }

    /// Accumulate one block of interleaved audio, emitting an update for
    /// every completed granularity window. Audio thread only.
    pub fn feed(&self, interleaved: &[f32], stride: u32, mut emit: impl FnMut(EndpointUpdate)) {
        if self.channels == 0 || stride == 0 {
            return;
        }
        let state = unsafe { &mut *self.state.get() };
        let channels = self.channels.min(stride) as usize;
        let frames = interleaved.len() / stride as usize;

        for frame in 0..frames {
            let row = &interleaved[frame * stride as usize..];
            if self.full_audio_data {
                state.data.push(row[..channels].to_vec());
            } else {
                for ch in 0..channels {
                    let s = row[ch];
                    if s < state.min[ch] {
                        state.min[ch] = s;
                    }
                    if s > state.max[ch] {
                        state.max[ch] = s;
                    }
                }
            }

            state.frames += 1;
            if state.frames >= self.granularity {
                emit(Self::take_update(state, channels));
            }
        }
    }

    fn take_update(state: &mut SummariserState, channels: usize) -> EndpointUpdate {
        state.frames = 0;
        if state.data.is_empty() {
            let update = EndpointUpdate::Levels {
                min: state.min[..channels].to_vec(),
                max: state.max[..channels].to_vec(),
            };
            state.min.iter_mut().for_each(|v| *v = f32::MAX);
            state.max.iter_mut().for_each(|v| *v = f32::MIN);
            update
        } else {
            EndpointUpdate::Frames {
                data: std::mem::take(&mut state.data),
            }
        }
    }
}

/// The live monitor set, snapshot-published to the audio thread.
pub type MonitorSet = Vec<Arc<EndpointMonitor>>;

/// Render-load tracking for the audio callback, feeding `cpu_info`.
pub struct RenderLoadMeter {
    current: RtSlot<f32>,
    average: RtSlot<f32>,
}

impl Default for RenderLoadMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderLoadMeter {
    pub fn new() -> Self {
        Self {
            current: RtSlot::new(0.0),
            average: RtSlot::new(0.0),
        }
    }

    /// Record one callback's elapsed time against its real-time budget.
    pub fn record(&self, frames: usize, elapsed: Duration, sample_rate: f64) {
        if frames == 0 || sample_rate <= 0.0 {
            return;
        }
        let budget = frames as f64 / sample_rate;
        let load = (elapsed.as_secs_f64() / budget) as f32;
        self.current.set(load);

        // Exponential moving average; stable after ~16 callbacks.
        let avg = self.average.get();
        self.average.set(avg * 0.9375 + load * 0.0625);
    }

    pub fn current(&self) -> f32 {
        self.current.get()
    }

    pub fn average(&self) -> f32 {
        self.average.get()
    }

    pub fn reset(&self) {
        self.current.set(0.0);
        self.average.set(0.0);
    }
}
