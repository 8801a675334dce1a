// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Spill segmentation and validation.
//!
//! A spill is one drain of every module FIFO, serialized per module as
//! `[spillSizeIncludingHeader, moduleIndex, payload...]`. The parser walks a
//! module payload event by event, validating each header word against the
//! expected slot, and classifies the tail: fully consumed, a trailing
//! partial event to carry into the next spill, or corrupt data.

use std::error::Error;
use std::fmt::{self, Display, Write as _};

use daq_common::event::{decode_event_word, EventHeader};

/// Words of context shown around a corrupt event in the diagnostic dump.
const DUMP_EVENT_WORDS: usize = 50;
const DUMP_WORDS_PER_LINE: usize = 8;

/// One fully parsed event, reduced to what statistics need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub channel: u8,
    pub size_words: u32,
    pub virtual_channel: bool,
}

/// How a module payload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillOutcome {
    /// The cursor landed exactly on the end of the payload.
    Clean,
    /// The last event ran past the end of the payload; its first `words`
    /// words were read and must be carried into the next spill.
    TrailingFragment { words: usize },
}

/// Why an event header failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    ZeroSize,
    SlotMismatch { expected: u8, read: u8 },
    BadChannel { read: u8 },
}

/// Corrupt data in a module payload. Offsets are word indices into the
/// payload handed to [`parse_module_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptData {
    pub kind: CorruptKind,
    pub offset: usize,
    pub prev_offset: Option<usize>,
    pub header: EventHeader,
}

impl Display for CorruptData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CorruptKind::ZeroSize => {
                write!(f, "event of size 0 at word {}", self.offset)
            }
            CorruptKind::SlotMismatch { expected, read } => write!(
                f,
                "slot mismatch at word {}: expected {}, read {}",
                self.offset, expected, read
            ),
            CorruptKind::BadChannel { read } => {
                write!(f, "channel {} out of range at word {}", read, self.offset)
            }
        }
    }
}

impl Error for CorruptData {}

/// Result of walking one module payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleParse {
    pub events: Vec<EventRecord>,
    pub outcome: SpillOutcome,
}

/// Walk `payload` event by event.
///
/// Every header word must carry the expected slot, a channel at most
/// `max_channel`, and a size of at least one word. A last event whose size
/// runs past the payload end is reported as a trailing fragment, not an
/// error; it is not included in `events` since only the next spill completes
/// it.
pub fn parse_module_payload(
    payload: &[u32],
    expected_slot: u8,
    max_channel: u8,
) -> Result<ModuleParse, CorruptData> {
    let mut events = Vec::new();
    let mut cursor = 0usize;
    let mut prev_offset = None;

    while cursor < payload.len() {
        let header = decode_event_word(payload[cursor]);
        let fail = |kind| CorruptData {
            kind,
            offset: cursor,
            prev_offset,
            header,
        };
        if header.size_words < 1 {
            return Err(fail(CorruptKind::ZeroSize));
        }
        if header.slot != expected_slot {
            return Err(fail(CorruptKind::SlotMismatch {
                expected: expected_slot,
                read: header.slot,
            }));
        }
        if header.channel > max_channel {
            return Err(fail(CorruptKind::BadChannel {
                read: header.channel,
            }));
        }

        let end = cursor + header.size_words as usize;
        if end > payload.len() {
            return Ok(ModuleParse {
                events,
                outcome: SpillOutcome::TrailingFragment {
                    words: payload.len() - cursor,
                },
            });
        }

        events.push(EventRecord {
            channel: header.channel,
            size_words: header.size_words,
            virtual_channel: header.virtual_channel,
        });
        prev_offset = Some(cursor);
        cursor = end;
    }

    Ok(ModuleParse {
        events,
        outcome: SpillOutcome::Clean,
    })
}

fn dump_words(out: &mut String, label: &str, words: &[u32], truncated: bool) {
    let _ = writeln!(out, "  {} ({} words{}):", label, words.len(), if truncated { ", truncated" } else { "" });
    for line in words.chunks(DUMP_WORDS_PER_LINE) {
        out.push_str("   ");
        for word in line {
            let _ = write!(out, " {:08x}", word);
        }
        out.push('\n');
    }
}

/// Render the diagnostic block logged when a payload fails to parse: the
/// event preceding the bad one, the bad event itself, and whatever follows
/// it, the latter two capped at 50 words each.
pub fn format_corruption_dump(payload: &[u32], err: &CorruptData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "corrupt module payload: {}", err);

    if let Some(prev) = err.prev_offset {
        dump_words(&mut out, "preceding event", &payload[prev..err.offset], false);
    } else {
        out.push_str("  no preceding event\n");
    }

    let claimed = (err.header.size_words as usize).max(1);
    let bad_end = (err.offset + claimed.min(DUMP_EVENT_WORDS)).min(payload.len());
    dump_words(
        &mut out,
        "offending event",
        &payload[err.offset..bad_end],
        claimed > DUMP_EVENT_WORDS,
    );

    let next_start = (err.offset + claimed).min(payload.len());
    let next_end = (next_start + DUMP_EVENT_WORDS).min(payload.len());
    if next_start < next_end {
        dump_words(
            &mut out,
            "following event",
            &payload[next_start..next_end],
            payload.len() - next_start > DUMP_EVENT_WORDS,
        );
    } else {
        out.push_str("  no following data\n");
    }
    out
}

/// Per-module fragment carry between spills.
///
/// Each module owns one contiguous word buffer holding the head of an event
/// whose tail had not reached the FIFO when the previous spill was read.
/// `take` empties it; the drain prepends the taken words before the fresh
/// read so the concatenation of emitted spills reproduces the hardware
/// stream exactly.
#[derive(Debug)]
pub struct PartialEventStore {
    fragments: Vec<Vec<u32>>,
}

impl PartialEventStore {
    pub fn new(modules: usize) -> Self {
        Self {
            fragments: (0..modules).map(|_| Vec::new()).collect(),
        }
    }

    pub fn take(&mut self, module: usize) -> Vec<u32> {
        std::mem::take(&mut self.fragments[module])
    }

    /// Store a fresh fragment. The slot must be empty: a fragment is either
    /// consumed by the next drain or reported and cleared at run end.
    pub fn put(&mut self, module: usize, words: &[u32]) {
        debug_assert!(self.fragments[module].is_empty());
        self.fragments[module] = words.to_vec();
    }

    pub fn len(&self, module: usize) -> usize {
        self.fragments[module].len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(Vec::is_empty)
    }

    /// Modules still holding a fragment, with the word count.
    pub fn outstanding(&self) -> Vec<(usize, usize)> {
        self.fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_empty())
            .map(|(m, f)| (m, f.len()))
            .collect()
    }

    pub fn clear_all(&mut self) {
        for fragment in &mut self.fragments {
            fragment.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_common::event::encode_event_word;

    const SLOT: u8 = 2;

    fn event(channel: u8, size: u32) -> Vec<u32> {
        let mut words = vec![encode_event_word(SLOT, channel, size, false)];
        for i in 1..size {
            words.push(0xBEEF_0000 | i);
        }
        words
    }

    #[test]
    fn clean_payload() {
        let mut payload = event(0, 4);
        payload.extend(event(3, 10));
        payload.extend(event(15, 1));

        let parsed = parse_module_payload(&payload, SLOT, 15).unwrap();
        assert_eq!(parsed.outcome, SpillOutcome::Clean);
        assert_eq!(parsed.events.len(), 3);
        assert_eq!(parsed.events[1].channel, 3);
        assert_eq!(parsed.events[1].size_words, 10);
    }

    #[test]
    fn trailing_fragment_three_words_short() {
        let mut payload = event(0, 6);
        let full = event(1, 8);
        payload.extend_from_slice(&full[..5]); // 3 words missing

        let parsed = parse_module_payload(&payload, SLOT, 15).unwrap();
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.outcome, SpillOutcome::TrailingFragment { words: 5 });
    }

    #[test]
    fn fragment_of_one_header_word() {
        let mut payload = event(0, 2);
        payload.push(encode_event_word(SLOT, 4, 100, false));

        let parsed = parse_module_payload(&payload, SLOT, 15).unwrap();
        assert_eq!(parsed.outcome, SpillOutcome::TrailingFragment { words: 1 });
    }

    #[test]
    fn zero_size_is_corrupt() {
        let mut payload = event(0, 3);
        payload.push(encode_event_word(SLOT, 1, 0, false));
        payload.extend(event(2, 2));

        let err = parse_module_payload(&payload, SLOT, 15).unwrap_err();
        assert_eq!(err.kind, CorruptKind::ZeroSize);
        assert_eq!(err.offset, 3);
        assert_eq!(err.prev_offset, Some(0));
    }

    #[test]
    fn slot_mismatch_is_corrupt() {
        let payload = vec![encode_event_word(9, 0, 2, false), 0];
        let err = parse_module_payload(&payload, SLOT, 15).unwrap_err();
        assert_eq!(
            err.kind,
            CorruptKind::SlotMismatch {
                expected: SLOT,
                read: 9
            }
        );
    }

    #[test]
    fn virtual_channel_flag_survives() {
        // Bit 29 doubles as bit 12 of the size field; a virtual event's
        // size therefore carries the 4096-word bump.
        let size = 4096 + 3;
        let mut payload = vec![encode_event_word(SLOT, 5, size, true)];
        payload.resize(size as usize, 0);

        let parsed = parse_module_payload(&payload, SLOT, 15).unwrap();
        assert_eq!(parsed.events.len(), 1);
        assert!(parsed.events[0].virtual_channel);
        assert_eq!(parsed.outcome, SpillOutcome::Clean);
    }

    #[test]
    fn corruption_dump_shows_three_sections() {
        let mut payload = event(0, 3);
        payload.push(encode_event_word(SLOT, 1, 0, false));
        payload.extend(event(2, 2));

        let err = parse_module_payload(&payload, SLOT, 15).unwrap_err();
        let dump = format_corruption_dump(&payload, &err);
        assert!(dump.contains("event of size 0"));
        assert!(dump.contains("preceding event"));
        assert!(dump.contains("offending event"));
        assert!(dump.contains("following event"));
    }

    #[test]
    fn partial_store_take_empties() {
        let mut store = PartialEventStore::new(2);
        store.put(1, &[1, 2, 3]);
        assert_eq!(store.len(1), 3);
        assert_eq!(store.outstanding(), vec![(1, 3)]);
        assert_eq!(store.take(1), vec![1, 2, 3]);
        assert!(store.is_empty());
    }
}
