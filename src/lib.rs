//! # Patchbay - Patch Player + Connection Protocol
//!
//! Umbrella crate coordinating the runtime nucleus that hosts a compiled
//! audio patch and bridges it to a real-time audio/MIDI callback and to a
//! message-based control surface.
//!
//! ## Architecture
//!
//! - **patchbay-core** - Patch player kernel (engine hosting, event-aligned
//!   block dispatch, timecode generation, endpoint telemetry)
//! - **patchbay-protocol** - Connection protocol (listener registry, patch
//!   connections, server sessions, virtual files, the host-side router)
//!
//! ## Quick Start
//!
//! ```ignore
//! use patchbay::prelude::*;
//!
//! let mut player = PatchPlayer::new(engine);
//! player.set_audio_io(Some(device));
//! player.start();
//! player.load_patch("reverb.patch");
//!
//! let session = ServerSession::new(transport);
//! let connection = session.create_connection();
//! connection.send_event_or_value("gain", 0.5.into(), None, None);
//! ```

/// Re-export of patchbay-core for direct access
pub use patchbay_core as core;

/// Re-export of patchbay-protocol for direct access
pub use patchbay_protocol as protocol;

// Player kernel
pub use patchbay_core::{
    // Player + engine contract
    AudioChunk, BuildSettings, Engine, PatchPlayer, PatchStatus, PlaybackParams, Position,
    RenderCallback, StatusDetails,

    // Audio device layer
    AudioIoOptions, AudioMidiPlayer, AudioProcessorCallback,

    // Endpoint model
    Annotation, EndpointDescriptor, EndpointPurpose,

    // Block dispatch + MIDI
    split_into_chunks, MidiEvent, ShortMessage,

    // Timecode
    position_at, TimecodeGenerator, TransportSlots,

    // Telemetry
    EndpointMonitor, EndpointUpdate, RenderLoadMeter, DEFAULT_GRANULARITY,

    // Lock-free primitives
    RtSlot, RtValue,

    // Error
    Error, Result,
};

// Protocol surface
pub use patchbay_protocol::{
    ClientMessage, ContentProvider, EndpointListenerToken, EventListenerList, InMemoryContent,
    ListenerHandle, PatchConnection, PatchHost, ServerSession, SessionTransport,
    VirtualFileRegistry,
};

/// Convenience prelude.
pub mod prelude {
    pub use patchbay_core::{
        AudioIoOptions, AudioMidiPlayer, AudioProcessorCallback, Engine, EndpointDescriptor,
        EndpointPurpose, PatchPlayer, PatchStatus, PlaybackParams,
    };
    pub use patchbay_protocol::{
        ContentProvider, InMemoryContent, PatchConnection, PatchHost, ServerSession,
        SessionTransport,
    };
}
