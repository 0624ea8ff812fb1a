//! Endpoint descriptors and duck-typed annotations.
//!
//! Endpoints are the named I/O points a loaded patch declares: parameters,
//! audio and event streams, MIDI and console output. Their metadata is a
//! deliberately open mapping; consumers probe for well-known keys and
//! degrade gracefully when a key is absent or of the wrong type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum knob rotation from centre, in degrees.
const KNOB_ROTATION_RANGE: f64 = 132.0;

/// What an endpoint is for, as declared by the engine at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointPurpose {
    Parameter,
    AudioIn,
    AudioOut,
    EventIn,
    EventOut,
    MidiIn,
    MidiOut,
    Console,
}

impl EndpointPurpose {
    /// Whether this endpoint feeds data into the patch.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::Parameter | Self::AudioIn | Self::EventIn | Self::MidiIn
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::AudioIn | Self::AudioOut)
    }
}

/// Free-form endpoint metadata.
///
/// Known keys: `min`, `max`, `step`, `init`, `unit`, `name`,
/// `text` ("|"-separated option labels), `boolean`, `discrete`, `hidden`.
/// The mapping is open; unknown keys are preserved and passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotation(pub Map<String, Value>);

impl Annotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mainly for tests and synthetic endpoints.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    fn truthy(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => false,
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.number("min")
    }

    pub fn max(&self) -> Option<f64> {
        self.number("max")
    }

    pub fn step(&self) -> Option<f64> {
        self.number("step")
    }

    pub fn init(&self) -> Option<f64> {
        self.number("init")
    }

    pub fn unit(&self) -> Option<&str> {
        self.0.get("unit").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// "|"-separated option labels from the `text` key.
    pub fn text_options(&self) -> Option<Vec<&str>> {
        let text = self.0.get("text").and_then(Value::as_str)?;
        if text.is_empty() {
            return None;
        }
        Some(text.split('|').collect())
    }

    pub fn is_boolean(&self) -> bool {
        self.truthy("boolean")
    }

    pub fn is_discrete(&self) -> bool {
        self.truthy("discrete")
    }

    pub fn is_hidden(&self) -> bool {
        self.truthy("hidden")
    }
}

/// Immutable description of one endpoint, produced by the engine at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    #[serde(rename = "endpointID")]
    pub id: String,
    pub purpose: EndpointPurpose,
    #[serde(default, skip_serializing_if = "Annotation::is_empty")]
    pub annotation: Annotation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Channel count for audio endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u32>,
}

impl EndpointDescriptor {
    pub fn new(id: impl Into<String>, purpose: EndpointPurpose) -> Self {
        Self {
            id: id.into(),
            purpose,
            annotation: Annotation::default(),
            default_value: None,
            num_channels: None,
        }
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotation = annotation;
        self
    }

    pub fn with_channels(mut self, num_channels: u32) -> Self {
        self.num_channels = Some(num_channels);
        self
    }

    /// Coerce a raw scalar to what the engine should see for this endpoint.
    ///
    /// Booleans map values above 0.5 to true; numeric values are clamped
    /// into the declared `[min, max]` range when one is present. Values are
    /// clamped silently so stale UI writes never become errors.
    pub fn coerce_value(&self, value: &Value) -> Value {
        let raw = match value {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => {
                // Match a text option label to its value, if declared.
                if let Some(v) = self.value_for_option_label(s) {
                    v
                } else {
                    return value.clone();
                }
            }
            _ => return value.clone(),
        };

        if self.annotation.is_boolean() {
            return Value::Bool(raw > 0.5);
        }

        let mut v = raw;
        if let Some(min) = self.annotation.min() {
            v = v.max(min);
        }
        if let Some(max) = self.annotation.max() {
            v = v.min(max);
        }
        Value::from(v)
    }

    fn value_for_option_label(&self, label: &str) -> Option<f64> {
        let labels = self.annotation.text_options()?;
        let index = labels.iter().position(|l| *l == label)?;
        let values = self.option_values()?;
        values.get(index).copied()
    }

    /// The discrete values this endpoint can take, when it declares them.
    ///
    /// A `step` annotation enumerates `min, min+step, ..., max`; `text`
    /// labels without a step spread evenly over `[min, max]` (defaulting
    /// to `0..n-1` when no range is declared).
    pub fn option_values(&self) -> Option<Vec<f64>> {
        let min = self.annotation.min().unwrap_or(0.0);

        if let Some(step) = self.annotation.step() {
            let max = self.annotation.max()?;
            if step <= 0.0 || max < min {
                return None;
            }
            let count = ((max - min) / step).floor() as usize + 1;
            return Some((0..count).map(|i| min + i as f64 * step).collect());
        }

        let labels = self.annotation.text_options()?;
        let n = labels.len();
        if n < 2 {
            return Some(vec![min]);
        }
        let max = self.annotation.max().unwrap_or((n - 1) as f64);
        let span = max - min;
        Some(
            (0..n)
                .map(|i| min + span * i as f64 / (n - 1) as f64)
                .collect(),
        )
    }

    /// Map a value in the declared range to a knob rotation in degrees.
    ///
    /// The range maps linearly onto [-132, +132], so a bipolar [-1, 1]
    /// endpoint puts 0 at twelve o'clock.
    pub fn rotation_degrees(&self, value: f64) -> f64 {
        let min = self.annotation.min().unwrap_or(0.0);
        let max = self.annotation.max().unwrap_or(1.0);
        if max <= min {
            return 0.0;
        }
        let normalised = ((value - min) / (max - min)).clamp(0.0, 1.0);
        -KNOB_ROTATION_RANGE + 2.0 * KNOB_ROTATION_RANGE * normalised
    }
}
