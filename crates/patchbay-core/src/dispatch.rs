//! Sub-block dispatch aligned on MIDI event boundaries.
//!
//! A render block is split so that every MIDI event lands exactly at the
//! start of the sub-block it belongs to: boundaries are the union of event
//! offsets and the block end. The engine then sees each event before any
//! sample at or after its offset, and every output sample exactly once.

use crate::midi::MidiEvent;

/// Split `num_frames` into event-aligned sub-blocks.
///
/// `events` must be sorted by `frame_offset`. For each sub-block the sink
/// receives `(start, frames, events_at_start)`; the event slice holds the
/// events whose offset equals the sub-block start. Events with offsets at
/// or beyond the block end are out of range and are skipped. A block with
/// no events is delivered as a single sub-block, and an event at offset 0
/// never produces a zero-length leading sub-block.
pub fn split_into_chunks<F>(num_frames: u32, events: &[MidiEvent], mut sink: F)
where
    F: FnMut(u32, u32, &[MidiEvent]),
{
    if num_frames == 0 {
        return;
    }

    debug_assert!(
        events.windows(2).all(|w| w[0].frame_offset <= w[1].frame_offset),
        "dispatch events must be sorted by frame offset"
    );

    // Out-of-range events would imply a boundary past the block end.
    let in_range = events.partition_point(|e| e.frame_offset < num_frames);
    debug_assert_eq!(in_range, events.len(), "MIDI event offset beyond block end");
    let events = &events[..in_range];

    let mut pos = 0;
    let mut next_event = 0;

    while pos < num_frames {
        let first = next_event;
        while next_event < events.len() && events[next_event].frame_offset == pos {
            next_event += 1;
        }

        let chunk_end = events
            .get(next_event)
            .map_or(num_frames, |e| e.frame_offset);

        sink(pos, chunk_end - pos, &events[first..next_event]);
        pos = chunk_end;
    }
}
