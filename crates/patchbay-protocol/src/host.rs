//! The server side of the wire: routes client messages into the player.
//!
//! A `PatchHost` owns a [`PatchPlayer`] and the outbound half of a
//! transport. Inbound client messages are parsed against the typed
//! vocabulary; malformed ones are logged and dropped with the connection
//! left up. `service` pumps the player's telemetry into reply-type-tagged
//! messages and emits `cpu_info` at the configured cadence.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::messages::ClientMessage;
use crate::transport::SessionTransport;
use patchbay_core::{PatchPlayer, PatchStatus, DEFAULT_GRANULARITY};

/// Callback resolved when a requested virtual-file chunk arrives.
type FileReadCallback = Box<dyn FnOnce(u64, Vec<u8>) + Send>;

/// Hosts one patch player behind the message protocol.
pub struct PatchHost {
    player: PatchPlayer,
    transport: Arc<dyn SessionTransport>,
    cpu_rate_frames: u32,
    cpu_frames_at_last_send: u64,
    /// Name → size of every virtual file the client has registered.
    registered_files: Mutex<HashMap<String, u64>>,
    pending_file_reads: Mutex<HashMap<String, Vec<FileReadCallback>>>,
    /// Per-endpoint audio input mode, mirrored back on request.
    input_modes: HashMap<String, Value>,
}

impl PatchHost {
    pub fn new(player: PatchPlayer, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            player,
            transport,
            cpu_rate_frames: 0,
            cpu_frames_at_last_send: 0,
            registered_files: Mutex::new(HashMap::new()),
            pending_file_reads: Mutex::new(HashMap::new()),
            input_modes: HashMap::new(),
        }
    }

    pub fn player(&self) -> &PatchPlayer {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut PatchPlayer {
        &mut self.player
    }

    fn send(&self, message: Value) {
        if let Err(e) = self.transport.send_message(message) {
            tracing::warn!(error = %e, "failed to send message to client");
        }
    }

    fn send_status(&self) {
        self.send(status_message(&self.player.status()));
    }

    /// Handle one client → server message.
    ///
    /// Unknown endpoint IDs are dropped silently (UIs send stale IDs around
    /// reloads); malformed messages are logged and dropped.
    pub fn handle_client_message(&mut self, message: Value) {
        let parsed: ClientMessage = match serde_json::from_value(message) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed client message");
                return;
            }
        };

        match parsed {
            ClientMessage::ReqStatus => self.send_status(),

            ClientMessage::ReqReset => self.player.reset_patch(),

            ClientMessage::SendValue {
                id,
                value,
                ramp_frames,
                timeout,
            } => {
                self.player
                    .send_endpoint_value(&id, &value, ramp_frames, timeout);
            }

            ClientMessage::SendGestureStart { id } => self.player.begin_gesture(&id),
            ClientMessage::SendGestureEnd { id } => self.player.end_gesture(&id),

            ClientMessage::ReqParamValue { id } => {
                if let Some(value) = self.player.engine().parameter_value(&id) {
                    self.send(json!({ "type": "param_value", "id": id, "value": value }));
                }
            }

            ClientMessage::ReqStateValue { key } => {
                let value = self
                    .player
                    .engine()
                    .state_value(&key)
                    .unwrap_or(Value::Null);
                self.send(json!({ "type": "state_key_value", "key": key, "value": value }));
            }

            ClientMessage::SendStateValue { key, value } => {
                self.player.engine().set_state_value(&key, value);
            }

            ClientMessage::ReqFullState { reply_type } => {
                let value = self.player.engine().full_state();
                self.send(json!({ "type": reply_type, "value": value }));
            }

            ClientMessage::SendFullState { value } => {
                self.player.engine().set_full_state(value);
            }

            ClientMessage::AddEndpointListener {
                endpoint,
                reply_type,
                granularity,
                full_audio_data,
            } => {
                self.player.add_endpoint_monitor(
                    &reply_type,
                    &endpoint,
                    granularity.unwrap_or(DEFAULT_GRANULARITY),
                    full_audio_data.unwrap_or(false),
                );
            }

            ClientMessage::RemoveEndpointListener { reply_type, .. } => {
                self.player.remove_endpoint_monitor(&reply_type);
            }

            ClientMessage::LoadPatch { file } => {
                match file {
                    Some(path) => {
                        self.player.load_patch(&path);
                    }
                    None => self.player.unload_patch(),
                }
                self.send_status();
            }

            ClientMessage::SetAudioPlaybackActive { active } => {
                if active {
                    self.player.start();
                } else {
                    self.player.stop();
                }
            }

            ClientMessage::SetCpuInfoRate {
                frames_per_callback,
            } => {
                self.cpu_rate_frames = frames_per_callback;
                self.cpu_frames_at_last_send = self.player.total_frames_rendered();
            }

            ClientMessage::Ping => self.send(json!({ "type": "ping" })),

            ClientMessage::FileContent { file, start, data } => {
                let bytes = match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(file, error = %e, "undecodable file content");
                        return;
                    }
                };
                let callback = {
                    let mut pending = self.pending_file_reads.lock();
                    let cb = pending
                        .get_mut(&file)
                        .filter(|queue| !queue.is_empty())
                        .map(|queue| queue.remove(0));
                    if pending.get(&file).is_some_and(Vec::is_empty) {
                        pending.remove(&file);
                    }
                    cb
                };
                match callback {
                    Some(cb) => cb(start, bytes),
                    None => tracing::warn!(file, "unsolicited file content dropped"),
                }
            }

            ClientMessage::RegisterFile { file, size } => {
                tracing::debug!(file, size, "client registered virtual file");
                self.registered_files.lock().insert(file, size);
            }

            ClientMessage::RemoveFile { file } => {
                self.registered_files.lock().remove(&file);
                self.pending_file_reads.lock().remove(&file);
            }

            ClientMessage::SetCustomAudioInput {
                endpoint,
                file,
                mute,
            } => {
                let mode = match file {
                    Some(file) => json!({ "file": file }),
                    None => json!({ "mute": mute.unwrap_or(false) }),
                };
                self.input_modes.insert(endpoint.clone(), mode.clone());
                self.send_input_mode(&endpoint, &mode);
            }

            ClientMessage::ReqAudioInputMode { endpoint } => {
                let mode = self
                    .input_modes
                    .get(&endpoint)
                    .cloned()
                    .unwrap_or_else(|| json!({ "mute": false }));
                self.send_input_mode(&endpoint, &mode);
            }

            ClientMessage::SetAudioDeviceProps { properties } => {
                tracing::debug!(%properties, "audio device property change requested");
                self.send_audio_device_properties();
            }

            ClientMessage::ReqAudioDeviceProps => self.send_audio_device_properties(),

            ClientMessage::ReqPatchList { reply_type } => {
                // A single-patch host has nothing to enumerate; honour the
                // reply channel with an empty list.
                self.send(json!({ "type": reply_type, "patches": [] }));
            }

            ClientMessage::ReqCodegen { reply_type, target, .. } => {
                self.send(json!({ "type": reply_type, "target": target, "code": "" }));
            }
        }
    }

    fn send_input_mode(&self, endpoint: &str, mode: &Value) {
        let mut message = mode.clone();
        message["type"] = json!(format!("audio_input_mode_{endpoint}"));
        self.send(message);
    }

    fn send_audio_device_properties(&self) {
        let options = self.player.options();
        self.send(json!({
            "type": "audio_device_properties",
            "sampleRate": options.sample_rate,
            "blockSize": options.block_size,
            "inputChannelCount": options.input_channels,
            "outputChannelCount": options.output_channels,
        }));
    }

    /// The announced size of a registered virtual file, if any.
    pub fn registered_file_size(&self, file: &str) -> Option<u64> {
        self.registered_files.lock().get(file).copied()
    }

    /// Read a chunk of a client-registered virtual file.
    ///
    /// Sends `req_file_read`; the callback resolves when the matching
    /// `file_content` arrives. Requests per file resolve in order. Reads
    /// of unregistered files or past the announced size are dropped, and
    /// reads crossing the end are clamped to it.
    pub fn request_file_read(
        &self,
        file: &str,
        offset: u64,
        size: u64,
        callback: impl FnOnce(u64, Vec<u8>) + Send + 'static,
    ) {
        let size = match self.registered_file_size(file) {
            None => {
                tracing::warn!(file, "read of unregistered file dropped");
                return;
            }
            Some(total) if offset >= total => {
                tracing::warn!(file, offset, total, "read past end of file dropped");
                return;
            }
            Some(total) => size.min(total - offset),
        };
        if size == 0 {
            return;
        }
        self.pending_file_reads
            .lock()
            .entry(file.to_string())
            .or_default()
            .push(Box::new(callback));
        self.send(json!({
            "type": "req_file_read", "file": file, "offset": offset, "size": size,
        }));
    }

    /// Pump player telemetry out to the client: endpoint updates, status
    /// changes from render failures, and `cpu_info` at the set cadence.
    pub fn service(&mut self) {
        let transport = self.transport.clone();
        let status_before = self.player.status();
        self.player.service(|reply_type, update| {
            let message = update.into_message(reply_type);
            if let Err(e) = transport.send_message(message) {
                tracing::warn!(error = %e, "failed to send endpoint update");
            }
        });
        let status_after = self.player.status();
        if !Arc::ptr_eq(&status_before, &status_after) {
            self.send(status_message(&status_after));
        }

        if self.cpu_rate_frames > 0 {
            let rendered = self.player.total_frames_rendered();
            if rendered.saturating_sub(self.cpu_frames_at_last_send)
                >= u64::from(self.cpu_rate_frames)
            {
                self.cpu_frames_at_last_send = rendered;
                let meter = self.player.load_meter();
                self.send(json!({
                    "type": "cpu_info",
                    "cpu": meter.average(),
                    "current": meter.current(),
                }));
            }
        }
    }
}

/// Render a status snapshot as its wire message.
fn status_message(status: &PatchStatus) -> Value {
    let mut message = serde_json::to_value(status).expect("status serialises");
    message["type"] = json!("status");
    message
}
