//! Packed MIDI short messages for patch MIDI endpoints.
//!
//! MIDI endpoints exchange short messages as a single integer,
//! `(byte0 << 16) | (byte1 << 8) | byte2`, with the message length derived
//! from the status byte. Sysex is not representable in this form.

use serde::{Deserialize, Serialize};

/// A MIDI short message packed as `(byte0 << 16) | (byte1 << 8) | byte2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortMessage(pub u32);

impl ShortMessage {
    /// Pack up to three bytes into a short message.
    ///
    /// Returns `None` for empty input or a leading data byte.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status < 0x80 {
            return None;
        }

        let len = Self::length_for_status(status).min(bytes.len());
        let b1 = if len > 1 { bytes[1] } else { 0 };
        let b2 = if len > 2 { bytes[2] } else { 0 };
        Some(Self(
            (u32::from(status) << 16) | (u32::from(b1) << 8) | u32::from(b2),
        ))
    }

    #[inline]
    pub fn status(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[inline]
    pub fn data1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub fn data2(&self) -> u8 {
        self.0 as u8
    }

    /// Number of meaningful bytes, per the status nibble.
    #[inline]
    pub fn len(&self) -> usize {
        Self::length_for_status(self.status())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Unpack into a byte array plus length.
    pub fn bytes(&self) -> ([u8; 3], usize) {
        ([self.status(), self.data1(), self.data2()], self.len())
    }

    /// Message length implied by a status byte.
    ///
    /// Program change and channel pressure carry one data byte; of the
    /// system messages, quarter-frame and song select carry one, song
    /// position carries two, and the rest (including all real-time status
    /// bytes 0xF8-0xFF) carry none. Sysex (0xF0) is treated as status-only
    /// here since it cannot be packed into a short message.
    pub fn length_for_status(status: u8) -> usize {
        match status & 0xf0 {
            0xc0 | 0xd0 => 2,
            0xf0 => match status {
                0xf1 | 0xf3 => 2,
                0xf2 => 3,
                _ => 1,
            },
            _ => 3,
        }
    }
}

/// A MIDI short message tagged with a sample offset inside a render block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Sample offset in `[0, block frames)`.
    #[serde(rename = "frameOffset")]
    pub frame_offset: u32,
    pub message: ShortMessage,
}

impl MidiEvent {
    pub fn new(frame_offset: u32, message: ShortMessage) -> Self {
        Self {
            frame_offset,
            message,
        }
    }
}
