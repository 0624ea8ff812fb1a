//! The patch player: owns the engine, the audio callback, and the routing
//! between them.
//!
//! The player is a control-thread object. Its render callback is handed to
//! the audio/MIDI player and keeps all of its mutable state behind
//! `UnsafeCell`, touched only from the audio thread; everything crossing
//! between the two sides goes through atomics, snapshot swaps, a bounded
//! channel or the MIDI-out ring.

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde_json::Value;
use smallvec::SmallVec;

use crate::audio_io::{AudioIoOptions, AudioMidiPlayer, AudioProcessorCallback};
use crate::dispatch::split_into_chunks;
use crate::endpoint::{EndpointDescriptor, EndpointPurpose};
use crate::engine::{AudioChunk, Engine, PatchStatus, PlaybackParams, StatusDetails};
use crate::lockfree::RtSlot;
use crate::midi::{MidiEvent, ShortMessage};
use crate::telemetry::{EndpointMonitor, EndpointUpdate, MonitorSet, RenderLoadMeter};
use crate::timecode::{TimecodeGenerator, TransportSlots};

/// Capacity of the RT → control event channel.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the MIDI-out ring.
const MIDI_OUT_CAPACITY: usize = 512;

/// Per-block MIDI accumulation before spilling to the heap.
const INLINE_MIDI_EVENTS: usize = 64;

/// Items crossing from the render callback to the control thread.
enum PlayerEvent {
    OutputEvent {
        frame: u64,
        endpoint: String,
        value: Value,
    },
    Monitor {
        reply_type: String,
        update: EndpointUpdate,
    },
    RenderFailed {
        error: String,
    },
}

/// The audio-thread half of the player.
///
/// Created fresh on every load or device change so channel counts and the
/// endpoint table are fixed for its lifetime.
pub struct RenderCallback {
    engine: Arc<dyn Engine>,
    transport: Arc<TransportSlots>,
    monitors: Arc<ArcSwap<MonitorSet>>,
    events_tx: Sender<PlayerEvent>,
    total_frames: Arc<AtomicU64>,
    load_meter: Arc<RenderLoadMeter>,
    sample_rate: RtSlot<f64>,
    input_channels: u32,
    output_channels: u32,
    midi_out_ids: HashSet<String>,
    failed: RtSlot<bool>,
    timecode: UnsafeCell<TimecodeGenerator>,
    pending_midi: UnsafeCell<SmallVec<[MidiEvent; INLINE_MIDI_EVENTS]>>,
    midi_out: UnsafeCell<HeapProd<(u64, ShortMessage)>>,
}

// SAFETY: the UnsafeCell fields (timecode generator, pending MIDI, MIDI-out
// producer) are only touched from the device thread that owns `process` and
// `add_incoming_midi_event`; all other fields are atomics, Arcs or
// snapshot-swapped containers.
unsafe impl Send for RenderCallback {}
unsafe impl Sync for RenderCallback {}

impl RenderCallback {
    fn new(
        engine: Arc<dyn Engine>,
        transport: Arc<TransportSlots>,
        monitors: Arc<ArcSwap<MonitorSet>>,
        events_tx: Sender<PlayerEvent>,
        total_frames: Arc<AtomicU64>,
        load_meter: Arc<RenderLoadMeter>,
        options: AudioIoOptions,
        midi_out_ids: HashSet<String>,
        midi_out: HeapProd<(u64, ShortMessage)>,
    ) -> Self {
        Self {
            engine,
            transport,
            monitors,
            events_tx,
            total_frames,
            load_meter,
            sample_rate: RtSlot::new(options.sample_rate),
            input_channels: options.input_channels,
            output_channels: options.output_channels.max(1),
            midi_out_ids,
            failed: RtSlot::new(false),
            timecode: UnsafeCell::new(TimecodeGenerator::new()),
            pending_midi: UnsafeCell::new(SmallVec::new()),
            midi_out: UnsafeCell::new(midi_out),
        }
    }

    /// Queue a timestamped MIDI message for the next render block.
    ///
    /// Device-thread only, like `add_incoming_midi_event`.
    pub fn add_incoming_midi_event_at(&self, frame_offset: u32, bytes: &[u8]) {
        if let Some(message) = ShortMessage::from_bytes(bytes) {
            let pending = unsafe { &mut *self.pending_midi.get() };
            pending.push(MidiEvent::new(frame_offset, message));
        }
    }

}

impl AudioProcessorCallback for RenderCallback {
    fn prepare_to_start(&self, sample_rate: f64) {
        self.sample_rate.set(sample_rate);
    }

    fn add_incoming_midi_event(&self, bytes: &[u8]) {
        self.add_incoming_midi_event_at(0, bytes);
    }

    fn process(&self, input: &[f32], output: &mut [f32], replace_output: bool) {
        let started = Instant::now();

        if self.failed.get() {
            if replace_output {
                output.fill(0.0);
            }
            return;
        }

        let out_ch = self.output_channels as usize;
        let in_ch = self.input_channels as usize;
        let frames = (output.len() / out_ch) as u32;
        if frames == 0 {
            return;
        }

        let pending = unsafe { &mut *self.pending_midi.get() };
        pending.sort_by_key(|e| e.frame_offset);
        // Events beyond this block are deferred, rebased into the next one.
        let in_range = pending.partition_point(|e| e.frame_offset < frames);

        self.engine.begin_chunked_process();

        let timecode = unsafe { &mut *self.timecode.get() };
        let base_frame = self.total_frames.load(Ordering::Acquire);
        timecode.emit_for_block(
            &*self.engine,
            &self.transport,
            base_frame,
            self.sample_rate.get(),
        );

        let mut render_error = None;
        split_into_chunks(frames, &pending[..in_range], |start, len, midi| {
            if render_error.is_some() {
                return;
            }
            let in_end = ((start + len) as usize * in_ch).min(input.len());
            let mut chunk = AudioChunk {
                start_frame: start,
                frames: len,
                input_channels: self.input_channels,
                output_channels: self.output_channels,
                input: &input[(start as usize * in_ch).min(in_end)..in_end],
                output: &mut output[start as usize * out_ch..(start + len) as usize * out_ch],
                midi,
            };
            if let Err(e) = self.engine.process_chunk(&mut chunk, replace_output) {
                render_error = Some(e);
            }
        });

        self.engine.end_chunked_process();

        let deferred: SmallVec<[MidiEvent; INLINE_MIDI_EVENTS]> = pending[in_range..]
            .iter()
            .map(|e| MidiEvent::new(e.frame_offset - frames, e.message))
            .collect();
        *pending = deferred;

        if let Some(e) = render_error {
            output.fill(0.0);
            self.failed.set(true);
            let _ = self.events_tx.try_send(PlayerEvent::RenderFailed {
                error: e.to_string(),
            });
            return;
        }

        let midi_out = unsafe { &mut *self.midi_out.get() };
        self.engine.drain_output_events(&mut |frame, endpoint, value| {
            if self.midi_out_ids.contains(endpoint) {
                if let Some(packed) = value.as_u64() {
                    let _ = midi_out.try_push((frame, ShortMessage(packed as u32)));
                }
                return;
            }
            let _ = self.events_tx.try_send(PlayerEvent::OutputEvent {
                frame,
                endpoint: endpoint.to_string(),
                value,
            });
        });

        let monitors = self.monitors.load();
        for monitor in monitors.iter().filter(|m| m.is_audio()) {
            monitor.feed(output, self.output_channels, |update| {
                let _ = self.events_tx.try_send(PlayerEvent::Monitor {
                    reply_type: monitor.reply_type.clone(),
                    update,
                });
            });
        }

        self.total_frames
            .fetch_add(u64::from(frames), Ordering::AcqRel);
        self.load_meter
            .record(frames as usize, started.elapsed(), self.sample_rate.get());
    }
}

/// Hosts one engine and bridges it to an audio/MIDI player and to the
/// control surface.
pub struct PatchPlayer {
    engine: Arc<dyn Engine>,
    audio_io: Option<Arc<dyn AudioMidiPlayer>>,
    callback: Option<Arc<RenderCallback>>,
    registered: bool,
    desired_playing: bool,
    patch_ready: bool,
    options: AudioIoOptions,
    transport: Arc<TransportSlots>,
    monitors: Arc<ArcSwap<MonitorSet>>,
    status: ArcSwap<PatchStatus>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    midi_out_rx: Option<HeapCons<(u64, ShortMessage)>>,
    total_frames: Arc<AtomicU64>,
    load_meter: Arc<RenderLoadMeter>,
    endpoints: Vec<EndpointDescriptor>,
    on_patch_loaded: Option<Box<dyn FnMut() + Send>>,
    on_patch_unloaded: Option<Box<dyn FnMut() + Send>>,
    on_status_change: Option<Box<dyn FnMut(&PatchStatus) + Send>>,
    on_output_event: Option<Box<dyn FnMut(u64, &str, &Value) + Send>>,
    on_midi_out: Option<Box<dyn FnMut(u64, ShortMessage) + Send>>,
}

impl PatchPlayer {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let options = AudioIoOptions::default();
        engine.set_playback_params(playback_params(&options));
        Self {
            engine,
            audio_io: None,
            callback: None,
            registered: false,
            desired_playing: false,
            patch_ready: false,
            options,
            transport: Arc::new(TransportSlots::new()),
            monitors: Arc::new(ArcSwap::from_pointee(MonitorSet::new())),
            status: ArcSwap::from_pointee(PatchStatus::default()),
            events_tx,
            events_rx,
            midi_out_rx: None,
            total_frames: Arc::new(AtomicU64::new(0)),
            load_meter: Arc::new(RenderLoadMeter::new()),
            endpoints: Vec::new(),
            on_patch_loaded: None,
            on_patch_unloaded: None,
            on_status_change: None,
            on_output_event: None,
            on_midi_out: None,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Bind or unbind the audio/MIDI source.
    ///
    /// On bind the device options are read and republished to the patch; on
    /// unbind safe defaults keep patches loadable.
    pub fn set_audio_io(&mut self, player: Option<Arc<dyn AudioMidiPlayer>>) {
        self.detach_callback();
        self.options = player
            .as_ref()
            .map(|p| p.options())
            .unwrap_or_default();
        self.audio_io = player;
        self.engine.set_playback_params(playback_params(&self.options));
        self.rebuild_callback();
        self.update_registration();
    }

    pub fn options(&self) -> AudioIoOptions {
        self.options
    }

    /// Load a patch, publishing a new status either way.
    pub fn load_patch(&mut self, path: &str) -> bool {
        self.engine.set_playback_params(playback_params(&self.options));
        match self.engine.load(path) {
            Ok(manifest) => {
                tracing::debug!(path, "patch loaded");
                self.endpoints = self.engine.endpoints();
                let details = partition_endpoints(&self.endpoints);
                let previous = self.status.load_full();
                self.publish_status(PatchStatus {
                    connected: previous.connected,
                    loaded: true,
                    manifest: Some(manifest),
                    details: Some(details),
                    ..Default::default()
                });
                if let Some(cb) = &mut self.on_patch_loaded {
                    cb();
                }
                self.rebuild_callback();
                self.start_playback();
                true
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "patch load failed");
                self.endpoints.clear();
                self.stop_playback();
                let previous = self.status.load_full();
                self.publish_status(PatchStatus {
                    connected: previous.connected,
                    loaded: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                });
                false
            }
        }
    }

    /// Drop the loaded patch and return to the unloaded state.
    pub fn unload_patch(&mut self) {
        let was_loaded = self.status.load().loaded;
        self.stop_playback();
        self.engine.reset();
        self.endpoints.clear();
        self.callback = None;
        self.midi_out_rx = None;
        let previous = self.status.load_full();
        self.publish_status(PatchStatus {
            connected: previous.connected,
            ..Default::default()
        });
        if was_loaded {
            if let Some(cb) = &mut self.on_patch_unloaded {
                cb();
            }
        }
    }

    /// Ask for playback. The callback attaches once the patch is ready too.
    pub fn start(&mut self) {
        self.desired_playing = true;
        self.update_registration();
    }

    pub fn stop(&mut self) {
        self.desired_playing = false;
        self.update_registration();
    }

    /// Readiness hook, normally driven by a successful load.
    pub fn start_playback(&mut self) {
        self.patch_ready = true;
        self.update_registration();
    }

    pub fn stop_playback(&mut self) {
        self.patch_ready = false;
        self.update_registration();
    }

    pub fn is_rendering(&self) -> bool {
        self.registered
    }

    // Transport setters only write atomics; callable from any thread via
    // the shared slots.
    pub fn set_tempo(&self, bpm: f32) {
        self.transport.set_tempo(bpm);
    }

    pub fn set_time_sig(&self, numerator: u16, denominator: u16) {
        self.transport.set_time_sig(numerator, denominator);
    }

    pub fn set_transport(&self, playing: bool, recording: bool) {
        self.transport.set_transport(playing, recording);
    }

    pub fn set_looping(&self, looping: bool) {
        self.transport.set_looping(looping);
    }

    pub fn transport(&self) -> &Arc<TransportSlots> {
        &self.transport
    }

    pub fn status(&self) -> Arc<PatchStatus> {
        self.status.load_full()
    }

    pub fn total_frames_rendered(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn load_meter(&self) -> &Arc<RenderLoadMeter> {
        &self.load_meter
    }

    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    pub fn find_endpoint(&self, id: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// The live render callback, for drivers that feed it directly.
    pub fn render_callback(&self) -> Option<Arc<RenderCallback>> {
        self.callback.clone()
    }

    pub fn set_on_patch_loaded(&mut self, cb: impl FnMut() + Send + 'static) {
        self.on_patch_loaded = Some(Box::new(cb));
    }

    pub fn set_on_patch_unloaded(&mut self, cb: impl FnMut() + Send + 'static) {
        self.on_patch_unloaded = Some(Box::new(cb));
    }

    pub fn set_on_status_change(&mut self, cb: impl FnMut(&PatchStatus) + Send + 'static) {
        self.on_status_change = Some(Box::new(cb));
    }

    pub fn set_on_output_event(&mut self, cb: impl FnMut(u64, &str, &Value) + Send + 'static) {
        self.on_output_event = Some(Box::new(cb));
    }

    pub fn set_on_midi_out(&mut self, cb: impl FnMut(u64, ShortMessage) + Send + 'static) {
        self.on_midi_out = Some(Box::new(cb));
    }

    /// Write to a value or event endpoint, coerced through its annotation.
    ///
    /// Unknown endpoint IDs return false so stale UI writes around a reload
    /// stay harmless.
    pub fn send_endpoint_value(
        &self,
        endpoint_id: &str,
        value: &Value,
        ramp_frames: Option<u32>,
        timeout: Option<u32>,
    ) -> bool {
        let Some(ep) = self.find_endpoint(endpoint_id) else {
            return false;
        };
        match ep.purpose {
            EndpointPurpose::Parameter => {
                let coerced = ep.coerce_value(value);
                self.engine.send_value(&ep.id, &coerced, ramp_frames, timeout)
            }
            EndpointPurpose::EventIn | EndpointPurpose::MidiIn => {
                self.engine.send_event(&ep.id, value, timeout)
            }
            _ => false,
        }
    }

    pub fn begin_gesture(&self, endpoint_id: &str) {
        if self.find_endpoint(endpoint_id).is_some() {
            self.engine.begin_parameter_gesture(endpoint_id);
        }
    }

    pub fn end_gesture(&self, endpoint_id: &str) {
        if self.find_endpoint(endpoint_id).is_some() {
            self.engine.end_parameter_gesture(endpoint_id);
        }
    }

    /// Reset the patch to its post-load state.
    pub fn reset_patch(&self) {
        self.engine.reset();
    }

    /// Subscribe a reply-type-keyed monitor to an endpoint.
    ///
    /// Returns false (and subscribes nothing) for unknown endpoints.
    pub fn add_endpoint_monitor(
        &self,
        reply_type: &str,
        endpoint_id: &str,
        granularity: u32,
        full_audio_data: bool,
    ) -> bool {
        let Some(ep) = self.find_endpoint(endpoint_id) else {
            return false;
        };
        let channels = if ep.purpose.is_audio() {
            ep.num_channels
                .unwrap_or(self.options.output_channels)
                .min(self.options.output_channels)
                .max(1)
        } else {
            0
        };
        let monitor = Arc::new(EndpointMonitor::new(
            reply_type,
            endpoint_id,
            granularity,
            full_audio_data,
            channels,
        ));

        let mut set: MonitorSet = self.monitors.load().as_ref().clone();
        set.push(monitor);
        self.monitors.store(Arc::new(set));
        true
    }

    pub fn remove_endpoint_monitor(&self, reply_type: &str) {
        let set: MonitorSet = self
            .monitors
            .load()
            .iter()
            .filter(|m| m.reply_type != reply_type)
            .cloned()
            .collect();
        self.monitors.store(Arc::new(set));
    }

    /// Pump events produced by the render side: monitor updates, engine
    /// output events, MIDI-out and render failures. Control thread only.
    pub fn service(&mut self, mut on_monitor: impl FnMut(&str, EndpointUpdate)) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                PlayerEvent::RenderFailed { error } => {
                    tracing::error!(error, "render failed; detaching audio callback");
                    self.detach_callback();
                    let previous = self.status.load_full();
                    self.publish_status(PatchStatus {
                        connected: previous.connected,
                        loaded: previous.loaded,
                        manifest: previous.manifest.clone(),
                        details: previous.details.clone(),
                        error: Some(error),
                        ..Default::default()
                    });
                }
                PlayerEvent::OutputEvent {
                    frame,
                    endpoint,
                    value,
                } => {
                    if self.is_console(&endpoint) {
                        tracing::info!(target: "patch_console", endpoint, %value);
                        continue;
                    }
                    let monitors = self.monitors.load();
                    for m in monitors
                        .iter()
                        .filter(|m| !m.is_audio() && m.endpoint_id == endpoint)
                    {
                        on_monitor(
                            &m.reply_type,
                            EndpointUpdate::Event {
                                value: value.clone(),
                            },
                        );
                    }
                    if let Some(cb) = &mut self.on_output_event {
                        cb(frame, &endpoint, &value);
                    }
                }
                PlayerEvent::Monitor { reply_type, update } => on_monitor(&reply_type, update),
            }
        }

        if let Some(rx) = &mut self.midi_out_rx {
            while let Some((frame, message)) = rx.try_pop() {
                if let Some(cb) = &mut self.on_midi_out {
                    cb(frame, message);
                }
            }
        }
    }

    fn is_console(&self, endpoint_id: &str) -> bool {
        self.find_endpoint(endpoint_id)
            .is_some_and(|e| e.purpose == EndpointPurpose::Console)
    }

    fn publish_status(&mut self, status: PatchStatus) {
        let status = Arc::new(status);
        self.status.store(status.clone());
        if let Some(cb) = &mut self.on_status_change {
            cb(&status);
        }
    }

    fn rebuild_callback(&mut self) {
        let was_registered = self.registered;
        self.detach_callback();

        let midi_out_ids: HashSet<String> = self
            .endpoints
            .iter()
            .filter(|e| e.purpose == EndpointPurpose::MidiOut)
            .map(|e| e.id.clone())
            .collect();
        let (midi_prod, midi_cons) = HeapRb::<(u64, ShortMessage)>::new(MIDI_OUT_CAPACITY).split();
        self.midi_out_rx = Some(midi_cons);
        self.callback = Some(Arc::new(RenderCallback::new(
            self.engine.clone(),
            self.transport.clone(),
            self.monitors.clone(),
            self.events_tx.clone(),
            self.total_frames.clone(),
            self.load_meter.clone(),
            self.options,
            midi_out_ids,
            midi_prod,
        )));

        if was_registered {
            self.update_registration();
        }
    }

    fn update_registration(&mut self) {
        let want = self.desired_playing && self.patch_ready;
        if want && !self.registered {
            if let (Some(io), Some(cb)) = (&self.audio_io, &self.callback) {
                let dyn_cb: Arc<dyn AudioProcessorCallback> = cb.clone();
                dyn_cb.prepare_to_start(io.options().sample_rate);
                io.add_callback(dyn_cb);
                self.registered = true;
            }
        } else if !want && self.registered {
            self.detach_callback();
        }
    }

    fn detach_callback(&mut self) {
        if self.registered {
            if let (Some(io), Some(cb)) = (&self.audio_io, &self.callback) {
                let dyn_cb: Arc<dyn AudioProcessorCallback> = cb.clone();
                io.remove_callback(&dyn_cb);
            }
            self.registered = false;
        }
    }
}

impl Drop for PatchPlayer {
    fn drop(&mut self) {
        self.detach_callback();
    }
}

fn playback_params(options: &AudioIoOptions) -> PlaybackParams {
    PlaybackParams {
        sample_rate: options.sample_rate,
        block_size: options.block_size,
        input_channels: options.input_channels,
        output_channels: options.output_channels,
    }
}

fn partition_endpoints(endpoints: &[EndpointDescriptor]) -> StatusDetails {
    let (inputs, outputs): (Vec<_>, Vec<_>) = endpoints
        .iter()
        .cloned()
        .partition(|e| e.purpose.is_input());
    StatusDetails { inputs, outputs }
}
