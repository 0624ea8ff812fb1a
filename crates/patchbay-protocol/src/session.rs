//! The server session: multiplexes patch connections over one transport.
//!
//! One session serves any number of `PatchConnection`s. It owns the status
//! cache, the virtual file registry, the liveness watchdog and the CPU-info
//! rate policy; inbound messages it does not recognise are broadcast to
//! every active connection, which cherry-pick by reply type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::connection::PatchConnection;
use crate::files::{ContentProvider, InMemoryContent, VirtualFileRegistry};
use crate::listeners::{EventListenerList, ListenerHandle};
use crate::messages::{make_reply_type, message_type, ClientMessage};
use crate::transport::SessionTransport;
use patchbay_core::PatchStatus;

/// Watchdog tick interval.
const WATCHDOG_TICK: Duration = Duration::from_secs(2);

/// Silence threshold after which the session reports a lost transport.
const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default CPU-info cadence when a listener attaches without one.
const DEFAULT_CPU_RATE: u32 = 15000;

struct CpuRatePolicy {
    listener_count: usize,
    requested_rate: u32,
    last_sent: Option<u32>,
}

/// Multiplexes N patch connections onto one full-duplex transport.
pub struct ServerSession {
    transport: Arc<dyn SessionTransport>,
    listeners: EventListenerList,
    connections: Mutex<HashMap<u64, Arc<PatchConnection>>>,
    next_connection_id: AtomicU64,
    files: VirtualFileRegistry,
    status: Mutex<Arc<PatchStatus>>,
    last_server_message_time: Mutex<Instant>,
    reported_disconnect: AtomicBool,
    cpu_rate: Mutex<CpuRatePolicy>,
    watchdog_running: AtomicBool,
}

impl ServerSession {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            listeners: EventListenerList::new(),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            files: VirtualFileRegistry::new(),
            status: Mutex::new(Arc::new(PatchStatus::default())),
            last_server_message_time: Mutex::new(Instant::now()),
            reported_disconnect: AtomicBool::new(false),
            cpu_rate: Mutex::new(CpuRatePolicy {
                listener_count: 0,
                requested_rate: DEFAULT_CPU_RATE,
                last_sent: None,
            }),
            watchdog_running: AtomicBool::new(false),
        })
    }

    fn send(&self, message: Value) {
        if let Err(e) = self.transport.send_message(message) {
            tracing::warn!(error = %e, "failed to send session message");
        }
    }

    fn send_client(&self, message: &ClientMessage) {
        self.send(message.to_value());
    }

    /// Open a new patch connection multiplexed onto this session.
    pub fn create_connection(&self) -> Arc<PatchConnection> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(PatchConnection::new(id, self.transport.clone()));
        self.connections.lock().insert(id, connection.clone());
        connection
    }

    /// Dispose a connection and stop broadcasting to it.
    pub fn close_connection(&self, connection: &Arc<PatchConnection>) {
        self.connections.lock().remove(&connection.id());
        connection.dispose();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Latest session status snapshot.
    pub fn status(&self) -> Arc<PatchStatus> {
        self.status.lock().clone()
    }

    pub fn virtual_files(&self) -> &VirtualFileRegistry {
        &self.files
    }

    /// Handle one inbound message from the patch host.
    pub fn handle_message_from_server(&self, message: Value) {
        *self.last_server_message_time.lock() = Instant::now();
        self.reported_disconnect.store(false, Ordering::Release);

        let Some(message_type) = message_type(&message) else {
            tracing::warn!("dropping inbound message without a type field");
            return;
        };

        match message_type {
            "session_status" => {
                let status: PatchStatus =
                    serde_json::from_value(message.clone()).unwrap_or_default();
                *self.status.lock() = Arc::new(status);
                self.listeners.dispatch("session_status", &message);
            }
            "cpu_info"
            | "audio_device_properties"
            | "patch_source_changed"
            | "infinite_loop_detected" => {
                self.listeners.dispatch(message_type, &message);
            }
            "req_file_read" => self.handle_file_read_request(&message),
            "ping" => self.send_client(&ClientMessage::Ping),
            t if t.starts_with("audio_input_mode_") => {
                self.listeners.dispatch(t, &message);
            }
            t if t.starts_with("reply_") => {
                self.listeners.dispatch(t, &message);
            }
            _ => {
                // Unrecognised: every active connection cherry-picks.
                let connections: Vec<_> = self.connections.lock().values().cloned().collect();
                for connection in connections {
                    connection.deliver_message(&message);
                }
            }
        }
    }

    fn handle_file_read_request(&self, message: &Value) {
        let Some(name) = message.get("file").and_then(Value::as_str) else {
            return;
        };
        let offset = message.get("offset").and_then(Value::as_u64).unwrap_or(0);
        let size = message.get("size").and_then(Value::as_u64).unwrap_or(0);
        if size == 0 {
            return;
        }
        let Some(provider) = self.files.lookup(name) else {
            tracing::warn!(file = name, "read request for unregistered file");
            return;
        };
        let chunk = match provider.read(offset, size as usize) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(file = name, error = %e, "virtual file read failed");
                return;
            }
        };
        self.send_client(&ClientMessage::FileContent {
            file: name.to_string(),
            start: offset,
            data: BASE64.encode(chunk),
        });
    }

    // Listener registration. Adding or removing a `cpu_info` listener also
    // recomputes the server-side telemetry rate.
    pub fn add_event_listener(
        &self,
        event_type: &str,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        let handle = self.listeners.add(event_type, callback);
        if event_type == "cpu_info" {
            self.cpu_listener_delta(1);
        }
        handle
    }

    pub fn remove_event_listener(&self, event_type: &str, handle: ListenerHandle) -> bool {
        let removed = self.listeners.remove(event_type, handle);
        if removed && event_type == "cpu_info" {
            self.cpu_listener_delta(-1);
        }
        removed
    }

    pub fn add_status_listener(
        &self,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> ListenerHandle {
        self.listeners.add("session_status", callback)
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.count_for(event_type)
    }

    /// Choose the CPU-info cadence used while any listener is attached.
    pub fn set_cpu_info_rate(&self, frames_per_callback: u32) {
        let mut policy = self.cpu_rate.lock();
        policy.requested_rate = frames_per_callback;
        self.apply_cpu_rate(&mut policy);
    }

    fn cpu_listener_delta(&self, delta: isize) {
        let mut policy = self.cpu_rate.lock();
        policy.listener_count = policy.listener_count.saturating_add_signed(delta);
        self.apply_cpu_rate(&mut policy);
    }

    fn apply_cpu_rate(&self, policy: &mut CpuRatePolicy) {
        let effective = if policy.listener_count > 0 {
            policy.requested_rate
        } else {
            0
        };
        if policy.last_sent != Some(effective) {
            policy.last_sent = Some(effective);
            self.send_client(&ClientMessage::SetCpuInfoRate {
                frames_per_callback: effective,
            });
        }
    }

    // Outbound control wrappers.

    pub fn load_patch(&self, path: Option<&str>) {
        self.send_client(&ClientMessage::LoadPatch {
            file: path.map(str::to_string),
        });
    }

    /// Request the list of loadable patches through a reply channel.
    pub fn request_patch_list(&self, callback: impl FnOnce(Value) + Send + 'static) {
        let reply_type = make_reply_type("patchlist_");
        self.listeners
            .add_single_use(&reply_type, move |m| callback(m.clone()));
        self.send_client(&ClientMessage::ReqPatchList { reply_type });
    }

    /// Request generated code for a target through a reply channel.
    pub fn request_generated_code(
        &self,
        target: &str,
        options: Option<Value>,
        callback: impl FnOnce(Value) + Send + 'static,
    ) {
        let reply_type = make_reply_type("codegen_");
        self.listeners
            .add_single_use(&reply_type, move |m| callback(m.clone()));
        self.send_client(&ClientMessage::ReqCodegen {
            target: target.to_string(),
            reply_type,
            options,
        });
    }

    pub fn set_audio_playback_active(&self, active: bool) {
        self.send_client(&ClientMessage::SetAudioPlaybackActive { active });
    }

    pub fn set_audio_device_properties(&self, properties: Value) {
        self.send_client(&ClientMessage::SetAudioDeviceProps { properties });
    }

    pub fn request_audio_device_properties(&self) {
        self.send_client(&ClientMessage::ReqAudioDeviceProps);
    }

    pub fn request_audio_input_mode(&self, endpoint_id: &str) {
        self.send_client(&ClientMessage::ReqAudioInputMode {
            endpoint: endpoint_id.to_string(),
        });
    }

    /// Register a virtual file and announce it to the server.
    pub fn register_file(&self, name: &str, provider: Arc<dyn ContentProvider>) {
        let size = provider.size();
        self.files.register(name, provider);
        self.send_client(&ClientMessage::RegisterFile {
            file: name.to_string(),
            size,
        });
    }

    pub fn remove_file(&self, name: &str) {
        if self.files.remove(name) {
            self.send_client(&ClientMessage::RemoveFile {
                file: name.to_string(),
            });
        }
    }

    /// Route an audio input endpoint to custom content or mute it.
    ///
    /// With bytes, a synthetic virtual file backs the endpoint; without,
    /// the synthetic file is dropped and the mute flag forwarded.
    pub fn set_audio_input_source(&self, endpoint_id: &str, mute: bool, bytes: Option<Vec<u8>>) {
        let file_name = format!("_audio_source_{endpoint_id}");
        match bytes {
            Some(bytes) => {
                self.register_file(&file_name, Arc::new(InMemoryContent::new(bytes)));
                self.send_client(&ClientMessage::SetCustomAudioInput {
                    endpoint: endpoint_id.to_string(),
                    file: Some(file_name),
                    mute: None,
                });
            }
            None => {
                self.remove_file(&file_name);
                self.send_client(&ClientMessage::SetCustomAudioInput {
                    endpoint: endpoint_id.to_string(),
                    file: None,
                    mute: Some(mute),
                });
            }
        }
    }

    // Liveness.

    /// Spawn the 2 s watchdog ticker. Idempotent; the thread exits when the
    /// session is dropped.
    pub fn start_watchdog(self: &Arc<Self>) {
        if self.watchdog_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("session-watchdog".into())
            .spawn(move || loop {
                std::thread::sleep(WATCHDOG_TICK);
                match weak.upgrade() {
                    Some(session) => session.check_liveness(),
                    None => break,
                }
            })
            .expect("failed to spawn watchdog thread");
    }

    pub fn check_liveness(&self) {
        self.check_liveness_at(Instant::now());
    }

    /// Watchdog tick against an injected clock.
    ///
    /// Publishes a disconnected `session_status` exactly once per interval
    /// of server silence longer than the timeout, then keeps watching.
    pub fn check_liveness_at(&self, now: Instant) {
        let last = *self.last_server_message_time.lock();
        let silent = now.duration_since(last) > SERVER_TIMEOUT;
        if !silent {
            return;
        }
        if self.reported_disconnect.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::warn!("no server message for {SERVER_TIMEOUT:?}; reporting disconnect");
        let status = PatchStatus {
            connected: false,
            loaded: false,
            description: Some("Cannot connect".to_string()),
            ..Default::default()
        };
        let mut message = serde_json::to_value(&status).expect("status serialises");
        message["type"] = json!("session_status");
        *self.status.lock() = Arc::new(status);
        self.listeners.dispatch("session_status", &message);
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.files.clear();
        self.listeners.clear();
    }
}
