//! The per-patch client facade.
//!
//! A `PatchConnection` owns one listener registry and speaks the typed
//! outbound vocabulary through its session's transport. Inbound messages
//! reach it via `deliver_message`, dispatched by their `type` string.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::listeners::{EventListenerList, ListenerHandle};
use crate::messages::{
    make_endpoint_reply_type, make_full_state_reply_type, message_type, ClientMessage,
};
use crate::transport::SessionTransport;
use patchbay_core::DEFAULT_GRANULARITY;

/// An active endpoint subscription; needed to remove it again.
#[derive(Debug, Clone)]
pub struct EndpointListenerToken {
    pub endpoint: String,
    pub reply_type: String,
    handle: ListenerHandle,
}

/// Typed message API to one patch instance.
pub struct PatchConnection {
    id: u64,
    transport: Arc<dyn SessionTransport>,
    listeners: EventListenerList,
    manifest: Mutex<Option<Value>>,
    open_gestures: Mutex<HashSet<String>>,
}

impl PatchConnection {
    pub(crate) fn new(id: u64, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            id,
            transport,
            listeners: EventListenerList::new(),
            manifest: Mutex::new(None),
            open_gestures: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, message: &ClientMessage) {
        if let Err(e) = self.transport.send_message(message.to_value()) {
            tracing::warn!(error = %e, "failed to send message to server");
        }
    }

    /// Ask the server to push a fresh `status`.
    pub fn request_status(&self) {
        self.send(&ClientMessage::ReqStatus);
    }

    /// Reset the patch to its post-load state.
    pub fn reset(&self) {
        self.send(&ClientMessage::ReqReset);
    }

    /// Write to a value or event endpoint.
    pub fn send_event_or_value(
        &self,
        endpoint_id: &str,
        value: Value,
        ramp_frames: Option<u32>,
        timeout: Option<u32>,
    ) {
        self.send(&ClientMessage::SendValue {
            id: endpoint_id.to_string(),
            value,
            ramp_frames,
            timeout,
        });
    }

    /// Open a gesture on a parameter. At most one gesture may be open per
    /// endpoint on a connection; a second start is dropped.
    pub fn send_gesture_start(&self, endpoint_id: &str) {
        if !self.open_gestures.lock().insert(endpoint_id.to_string()) {
            tracing::warn!(endpoint_id, "gesture already open; start dropped");
            return;
        }
        self.send(&ClientMessage::SendGestureStart {
            id: endpoint_id.to_string(),
        });
    }

    /// Close a gesture. An end without a matching start is dropped.
    pub fn send_gesture_end(&self, endpoint_id: &str) {
        if !self.open_gestures.lock().remove(endpoint_id) {
            tracing::warn!(endpoint_id, "no open gesture; end dropped");
            return;
        }
        self.send(&ClientMessage::SendGestureEnd {
            id: endpoint_id.to_string(),
        });
    }

    /// Ask for one stored-state value; the reply arrives as a
    /// `state_key_value` event.
    pub fn request_stored_state_value(&self, key: &str) {
        self.send(&ClientMessage::ReqStateValue {
            key: key.to_string(),
        });
    }

    pub fn send_stored_state_value(&self, key: &str, value: Value) {
        self.send(&ClientMessage::SendStateValue {
            key: key.to_string(),
            value,
        });
    }

    /// Fetch the full stored state through a single-use reply channel.
    pub fn request_full_stored_state(&self, callback: impl FnOnce(Value) + Send + 'static) {
        let reply_type = make_full_state_reply_type();
        self.listeners.add_single_use(&reply_type, move |message| {
            callback(message.get("value").cloned().unwrap_or(Value::Null));
        });
        self.send(&ClientMessage::ReqFullState { reply_type });
    }

    /// Replace the stored state wholesale.
    pub fn send_full_stored_state(&self, value: Value) {
        self.send(&ClientMessage::SendFullState { value });
    }

    /// Subscribe to an endpoint's data stream.
    ///
    /// Audio endpoints deliver `{min, max}` summaries per granularity
    /// window, or raw `{data}` frames when `full_audio_data` is set; event
    /// endpoints deliver each value. The callback receives the whole update
    /// message.
    pub fn add_endpoint_listener(
        &self,
        endpoint_id: &str,
        granularity: Option<u32>,
        full_audio_data: bool,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> EndpointListenerToken {
        let reply_type = make_endpoint_reply_type(endpoint_id);
        let handle = self.listeners.add(&reply_type, callback);
        self.send(&ClientMessage::AddEndpointListener {
            endpoint: endpoint_id.to_string(),
            reply_type: reply_type.clone(),
            granularity: Some(granularity.unwrap_or(DEFAULT_GRANULARITY)),
            full_audio_data: Some(full_audio_data),
        });
        EndpointListenerToken {
            endpoint: endpoint_id.to_string(),
            reply_type,
            handle,
        }
    }

    pub fn remove_endpoint_listener(&self, token: &EndpointListenerToken) {
        self.listeners.remove(&token.reply_type, token.handle);
        self.send(&ClientMessage::RemoveEndpointListener {
            endpoint: token.endpoint.clone(),
            reply_type: token.reply_type.clone(),
        });
    }

    /// Ask for a parameter's current value; the reply arrives as
    /// `param_value` (also re-dispatched per-parameter).
    pub fn request_parameter_value(&self, endpoint_id: &str) {
        self.send(&ClientMessage::ReqParamValue {
            id: endpoint_id.to_string(),
        });
    }

    /// Listen for one parameter's value pushes.
    pub fn add_parameter_listener(
        &self,
        endpoint_id: &str,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners
            .add(&format!("param_value_{endpoint_id}"), callback)
    }

    /// Listen for every parameter value push.
    pub fn add_all_parameter_listener(
        &self,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners.add("param_value", callback)
    }

    pub fn add_status_listener(
        &self,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners.add("status", callback)
    }

    pub fn add_event_listener(
        &self,
        event_type: &str,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners.add(event_type, callback)
    }

    pub fn add_single_use_listener(
        &self,
        event_type: &str,
        callback: impl FnOnce(Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners
            .add_single_use(event_type, move |v| callback(v.clone()))
    }

    pub fn remove_event_listener(&self, event_type: &str, handle: ListenerHandle) -> bool {
        self.listeners.remove(event_type, handle)
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.count_for(event_type)
    }

    /// Manifest from the most recent `status` message, if any.
    pub fn cached_manifest(&self) -> Option<Value> {
        self.manifest.lock().clone()
    }

    /// Dispatch one server → client message into this connection.
    ///
    /// `status` messages refresh the manifest cache; `param_value` is
    /// re-dispatched under both the global and the per-parameter key.
    pub fn deliver_message(&self, message: &Value) {
        let Some(message_type) = message_type(message) else {
            return;
        };

        match message_type {
            "status" => {
                *self.manifest.lock() = message.get("manifest").cloned();
                self.listeners.dispatch("status", message);
            }
            "param_value" => {
                self.listeners.dispatch("param_value", message);
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    self.listeners
                        .dispatch(&format!("param_value_{id}"), message);
                }
            }
            other => self.listeners.dispatch(other, message),
        }
    }

    /// Tear down, clearing every listener so connection/listener reference
    /// cycles are severed.
    pub fn dispose(&self) {
        self.listeners.clear();
        self.open_gestures.lock().clear();
    }
}
