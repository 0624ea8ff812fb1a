//! Shared test doubles for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use patchbay_core::engine::{AudioChunk, BuildSettings, Position};
use patchbay_core::{EndpointDescriptor, Engine, PlaybackParams, Result};

/// An engine with no endpoints that renders silence.
#[derive(Default)]
pub struct NullEngine {
    state: Mutex<serde_json::Map<String, Value>>,
}

impl NullEngine {
    pub fn shared() -> Arc<dyn Engine> {
        Arc::new(Self::default())
    }
}

impl Engine for NullEngine {
    fn set_build_settings(&self, _settings: BuildSettings) {}
    fn set_playback_params(&self, _params: PlaybackParams) {}

    fn load(&self, _path: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        Vec::new()
    }

    fn send_value(
        &self,
        _endpoint_id: &str,
        _value: &Value,
        _ramp_frames: Option<u32>,
        _timeout: Option<u32>,
    ) -> bool {
        false
    }

    fn send_event(&self, _endpoint_id: &str, _value: &Value, _timeout: Option<u32>) -> bool {
        false
    }

    fn begin_parameter_gesture(&self, _endpoint_id: &str) {}
    fn end_parameter_gesture(&self, _endpoint_id: &str) {}

    fn parameter_value(&self, _endpoint_id: &str) -> Option<Value> {
        None
    }

    fn state_value(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    fn set_state_value(&self, key: &str, value: Value) {
        self.state.lock().insert(key.to_string(), value);
    }

    fn full_state(&self) -> Value {
        Value::Object(self.state.lock().clone())
    }

    fn set_full_state(&self, value: Value) {
        *self.state.lock() = value.as_object().cloned().unwrap_or_default();
    }

    fn reset(&self) {}

    fn begin_chunked_process(&self) {}

    fn process_chunk(&self, chunk: &mut AudioChunk<'_>, replace_output: bool) -> Result<()> {
        if replace_output {
            chunk.output.fill(0.0);
        }
        Ok(())
    }

    fn end_chunked_process(&self) {}

    fn drain_output_events(&self, _sink: &mut dyn FnMut(u64, &str, Value)) {}

    fn send_bpm(&self, _bpm: f32) {}
    fn send_time_sig(&self, _numerator: u16, _denominator: u16) {}
    fn send_transport_state(&self, _playing: bool, _recording: bool, _looping: bool) {}
    fn send_position(&self, _position: Position) {}
}
