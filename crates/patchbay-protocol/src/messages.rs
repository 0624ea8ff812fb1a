//! The wire vocabulary.
//!
//! Every message is a self-contained JSON object with a `type` field.
//! Client → server traffic is a closed, typed vocabulary; server → client
//! traffic is carried as raw values because reply types (`reply_*`,
//! `event_*`, `fullstate_response_*`) are minted at runtime and cannot
//! form a closed enum. Binary payloads travel base64-encoded inside the
//! JSON envelope.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client → server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "req_status")]
    ReqStatus,

    #[serde(rename = "req_reset")]
    ReqReset,

    #[serde(rename = "send_value")]
    SendValue {
        id: String,
        #[serde(default)]
        value: Value,
        #[serde(
            rename = "rampFrames",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        ramp_frames: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u32>,
    },

    #[serde(rename = "send_gesture_start")]
    SendGestureStart { id: String },

    #[serde(rename = "send_gesture_end")]
    SendGestureEnd { id: String },

    #[serde(rename = "req_state_value")]
    ReqStateValue { key: String },

    #[serde(rename = "send_state_value")]
    SendStateValue {
        key: String,
        #[serde(default)]
        value: Value,
    },

    #[serde(rename = "req_full_state")]
    ReqFullState {
        #[serde(rename = "replyType")]
        reply_type: String,
    },

    #[serde(rename = "send_full_state")]
    SendFullState {
        #[serde(default)]
        value: Value,
    },

    #[serde(rename = "add_endpoint_listener")]
    AddEndpointListener {
        endpoint: String,
        #[serde(rename = "replyType")]
        reply_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        granularity: Option<u32>,
        #[serde(
            rename = "fullAudioData",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        full_audio_data: Option<bool>,
    },

    #[serde(rename = "remove_endpoint_listener")]
    RemoveEndpointListener {
        endpoint: String,
        #[serde(rename = "replyType")]
        reply_type: String,
    },

    #[serde(rename = "req_param_value")]
    ReqParamValue { id: String },

    #[serde(rename = "load_patch")]
    LoadPatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },

    #[serde(rename = "req_patchlist")]
    ReqPatchList {
        #[serde(rename = "replyType")]
        reply_type: String,
    },

    #[serde(rename = "set_custom_audio_input")]
    SetCustomAudioInput {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mute: Option<bool>,
    },

    #[serde(rename = "req_audio_input_mode")]
    ReqAudioInputMode { endpoint: String },

    #[serde(rename = "set_audio_playback_active")]
    SetAudioPlaybackActive { active: bool },

    #[serde(rename = "set_audio_device_props")]
    SetAudioDeviceProps { properties: Value },

    #[serde(rename = "req_audio_device_props")]
    ReqAudioDeviceProps,

    #[serde(rename = "req_codegen")]
    ReqCodegen {
        target: String,
        #[serde(rename = "replyType")]
        reply_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Value>,
    },

    #[serde(rename = "set_cpu_info_rate")]
    SetCpuInfoRate {
        #[serde(rename = "framesPerCallback")]
        frames_per_callback: u32,
    },

    #[serde(rename = "register_file")]
    RegisterFile { file: String, size: u64 },

    #[serde(rename = "remove_file")]
    RemoveFile { file: String },

    #[serde(rename = "file_content")]
    FileContent {
        file: String,
        start: u64,
        /// Base64-encoded chunk.
        data: String,
    },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Render as the JSON envelope sent over the transport.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("client messages serialise infallibly")
    }
}

/// The `type` tag of an inbound envelope, if it has one.
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

/// Mint a request/response reply type: `reply_<stem><decimal-random>`.
pub fn make_reply_type(stem: &str) -> String {
    format!("reply_{stem}{}", random_suffix())
}

/// Mint an endpoint subscription key: `event_<endpoint>_<decimal-random>`.
pub fn make_endpoint_reply_type(endpoint: &str) -> String {
    format!("event_{endpoint}_{}", random_suffix())
}

/// Mint a full-state reply type: `fullstate_response_<decimal-random>`.
pub fn make_full_state_reply_type() -> String {
    format!("fullstate_response_{}", random_suffix())
}

// Collisions within a session must be vanishingly unlikely; u64 gives
// comfortably more than the recommended 32 bits.
fn random_suffix() -> u64 {
    rand::thread_rng().gen()
}
