//! QPACK encoder
//!
//! Encodes header lists into field sections and produces the matching
//! encoder-stream instructions. Inserts only ever go into free space, so no
//! entry a section might still reference is ever evicted.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::trace;

use super::static_table::{self, StaticMatch};
use super::table::{entry_size, DynamicTable};
use super::{decode_int, encode_int, encode_string, WireError};
use crate::constants::qpack::{decoder_instruction, encoder_instruction, field_line, ENTRY_OVERHEAD};
use crate::error::{QpackError, Result};
use crate::types::{Nv, NvFlags, Settings, StreamId};

/// Representation chosen for a single field line
enum Line<'a> {
    IndexedStatic(usize),
    IndexedDynamic(u64),
    NameRefStatic(usize, &'a Nv<'a>),
    NameRefDynamic(u64, &'a Nv<'a>),
    Literal(&'a Nv<'a>),
}

/// QPACK encoder
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Local upper bound on the table capacity
    max_capacity: u64,
    /// Capacity the peer's decoder advertised (drives MaxEntries)
    peer_max_capacity: u64,
    /// Streams the peer allows to be blocked at once
    peer_blocked_streams: u64,
    /// Largest field section the peer accepts
    peer_max_field_section_size: u64,
    /// Inserts the decoder is known to have received
    known_received_count: u64,
    /// Required insert count of every unacknowledged section, per stream
    unacked: HashMap<StreamId, VecDeque<u64>>,
    /// Pending encoder stream bytes
    instructions: Vec<u8>,
    /// Partial decoder stream instruction
    pending_input: Vec<u8>,
}

impl Encoder {
    /// Create an encoder bounded by the local encoder capacity
    pub fn new(max_capacity: u64) -> Self {
        let peer = Settings::peer_defaults();
        Self {
            table: DynamicTable::new(),
            max_capacity,
            peer_max_capacity: peer.qpack_max_dtable_capacity,
            peer_blocked_streams: peer.qpack_blocked_streams,
            peer_max_field_section_size: peer.max_field_section_size,
            known_received_count: 0,
            unacked: HashMap::new(),
            instructions: Vec::new(),
            pending_input: Vec::new(),
        }
    }

    /// Apply the peer's SETTINGS
    ///
    /// Enables the dynamic table at `min(local, peer)` capacity and emits the
    /// Set Dynamic Table Capacity instruction.
    pub fn apply_peer_settings(&mut self, peer: &Settings) {
        self.peer_max_capacity = peer.qpack_max_dtable_capacity;
        self.peer_blocked_streams = peer.qpack_blocked_streams;
        self.peer_max_field_section_size = peer.max_field_section_size;

        let capacity = self.max_capacity.min(peer.qpack_max_dtable_capacity);
        if capacity > 0 {
            encode_int(
                &mut self.instructions,
                capacity,
                5,
                encoder_instruction::SET_DYNAMIC_TABLE_CAPACITY,
            );
            self.table.set_capacity(capacity as usize);
        }
    }

    /// Dynamic table capacity in use
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of inserts made
    pub fn insert_count(&self) -> u64 {
        self.table.insert_count()
    }

    /// Inserts the peer has acknowledged
    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    /// Take the pending encoder stream bytes
    pub fn take_instructions(&mut self) -> Option<Bytes> {
        if self.instructions.is_empty() {
            return None;
        }
        Some(Bytes::from(std::mem::take(&mut self.instructions)))
    }

    /// Whether encoder stream bytes are pending
    pub fn has_instructions(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Number of streams with sections the decoder may be blocked on
    pub fn blocked_streams(&self) -> usize {
        self.unacked
            .values()
            .filter(|sections| sections.iter().any(|&ric| ric > self.known_received_count))
            .count()
    }

    fn is_blocking(&self, stream_id: StreamId) -> bool {
        self.unacked.get(&stream_id).is_some_and(|sections| {
            sections.iter().any(|&ric| ric > self.known_received_count)
        })
    }

    // ========================================================================
    // Field Sections
    // ========================================================================

    /// Encode a header list into a field section
    ///
    /// Fails with `QpackHeaderTooLarge`, leaving no state behind, if the list
    /// exceeds the peer's `max_field_section_size`.
    pub fn encode(&mut self, stream_id: StreamId, headers: &[Nv<'_>]) -> Result<Bytes> {
        let total: u64 = headers.iter().map(Nv::size).sum();
        if total > self.peer_max_field_section_size {
            return Err(QpackError::HeaderTooLarge.into());
        }

        let can_block = self.is_blocking(stream_id)
            || (self.blocked_streams() as u64) < self.peer_blocked_streams;
        let usable = if can_block {
            u64::MAX
        } else {
            self.known_received_count
        };

        let mut lines = Vec::with_capacity(headers.len());
        let mut required = 0u64;

        for nv in headers {
            let line = self.choose_line(nv, usable, can_block);
            match line {
                Line::IndexedDynamic(abs) | Line::NameRefDynamic(abs, _) => {
                    required = required.max(abs + 1);
                }
                _ => {}
            }
            lines.push(line);
        }

        let mut buf = Vec::with_capacity(total as usize / 2 + 2);
        self.encode_prefix(&mut buf, required);
        // Base equals the required insert count, so every reference is pre-base
        for line in &lines {
            encode_line(&mut buf, line, required);
        }

        if required > 0 {
            self.unacked.entry(stream_id).or_default().push_back(required);
        }
        trace!(stream_id, required_insert_count = required, len = buf.len(), "encoded field section");
        Ok(Bytes::from(buf))
    }

    fn choose_line<'a>(&mut self, nv: &'a Nv<'a>, usable: u64, can_block: bool) -> Line<'a> {
        let never_index = nv.flags.contains(NvFlags::NEVER_INDEX);
        let static_match = static_table::find(nv.name, nv.value);

        if let Some(StaticMatch::Exact(index)) = static_match {
            if !never_index {
                return Line::IndexedStatic(index);
            }
        }

        let dynamic_match = self.table.find(nv.name, nv.value, usable);
        if let Some((abs, true)) = dynamic_match {
            if !never_index {
                return Line::IndexedDynamic(abs);
            }
        }

        if !never_index && can_block && nv.name != b":path" {
            let static_name = match static_match {
                Some(StaticMatch::Name(index)) | Some(StaticMatch::Exact(index)) => Some(index),
                None => None,
            };
            if let Some(abs) = self.insert(nv, static_name) {
                return Line::IndexedDynamic(abs);
            }
        }

        match (static_match, dynamic_match) {
            (Some(StaticMatch::Exact(index) | StaticMatch::Name(index)), _) => {
                Line::NameRefStatic(index, nv)
            }
            (None, Some((abs, _))) => Line::NameRefDynamic(abs, nv),
            (None, None) => Line::Literal(nv),
        }
    }

    /// Insert a field into the dynamic table if it fits in free space
    fn insert(&mut self, nv: &Nv<'_>, static_name: Option<usize>) -> Option<u64> {
        let size = entry_size(nv.name, nv.value);
        if self.table.capacity() == 0 || size > self.table.free_space() {
            return None;
        }

        match static_name {
            Some(index) => {
                encode_int(
                    &mut self.instructions,
                    index as u64,
                    6,
                    encoder_instruction::INSERT_WITH_NAME_REF | 0x40,
                );
            }
            None => {
                encode_string(
                    &mut self.instructions,
                    nv.name,
                    5,
                    encoder_instruction::INSERT_LITERAL_NAME,
                );
            }
        }
        encode_string(&mut self.instructions, nv.value, 7, 0);

        let abs = self.table.insert_count();
        self.table
            .insert(Bytes::copy_from_slice(nv.name), Bytes::copy_from_slice(nv.value));
        trace!(absolute_index = abs, size, "dynamic table insert");
        Some(abs)
    }

    fn encode_prefix(&self, buf: &mut Vec<u8>, required: u64) {
        let encoded = if required == 0 {
            0
        } else {
            let max_entries = self.peer_max_capacity / ENTRY_OVERHEAD as u64;
            required % (2 * max_entries) + 1
        };
        encode_int(buf, encoded, 8, 0);
        // Delta Base of zero with a positive sign
        encode_int(buf, 0, 7, 0);
    }

    // ========================================================================
    // Decoder Stream
    // ========================================================================

    /// Process bytes received on the peer's decoder stream
    ///
    /// Incomplete trailing instructions are kept until more bytes arrive.
    pub fn recv_decoder_stream(&mut self, data: &[u8]) -> Result<()> {
        self.pending_input.extend_from_slice(data);
        let input = std::mem::take(&mut self.pending_input);

        let mut pos = 0;
        let result = loop {
            if pos >= input.len() {
                break Ok(());
            }
            match self.decoder_instruction(&input[pos..]) {
                Ok(consumed) => pos += consumed,
                Err(WireError::Incomplete) => break Ok(()),
                Err(WireError::Invalid) => break Err(QpackError::DecoderStreamError.into()),
            }
        };

        self.pending_input = input[pos..].to_vec();
        result
    }

    fn decoder_instruction(&mut self, data: &[u8]) -> std::result::Result<usize, WireError> {
        let first = data[0];

        if first & decoder_instruction::SECTION_ACK != 0 {
            let (stream_id, consumed) = decode_int(data, 7)?;
            let stream_id = stream_id as StreamId;
            let sections = self.unacked.get_mut(&stream_id).ok_or(WireError::Invalid)?;
            let required = sections.pop_front().ok_or(WireError::Invalid)?;
            if sections.is_empty() {
                self.unacked.remove(&stream_id);
            }
            self.known_received_count = self.known_received_count.max(required);
            trace!(stream_id, required_insert_count = required, "section acknowledged");
            Ok(consumed)
        } else if first & decoder_instruction::STREAM_CANCEL != 0 {
            let (stream_id, consumed) = decode_int(data, 6)?;
            self.unacked.remove(&(stream_id as StreamId));
            trace!(stream_id, "stream cancelled by decoder");
            Ok(consumed)
        } else {
            let (increment, consumed) = decode_int(data, 6)?;
            let known = self.known_received_count + increment;
            if increment == 0 || known > self.table.insert_count() {
                return Err(WireError::Invalid);
            }
            self.known_received_count = known;
            Ok(consumed)
        }
    }
}

fn encode_line(buf: &mut Vec<u8>, line: &Line<'_>, base: u64) {
    match *line {
        Line::IndexedStatic(index) => {
            encode_int(buf, index as u64, 6, field_line::INDEXED | 0x40);
        }
        Line::IndexedDynamic(abs) => {
            encode_int(buf, base - 1 - abs, 6, field_line::INDEXED);
        }
        Line::NameRefStatic(index, nv) => {
            encode_int(buf, index as u64, 4, field_line::LITERAL_NAME_REF | never_bit(nv, 0x20) | 0x10);
            encode_string(buf, nv.value, 7, 0);
        }
        Line::NameRefDynamic(abs, nv) => {
            encode_int(buf, base - 1 - abs, 4, field_line::LITERAL_NAME_REF | never_bit(nv, 0x20));
            encode_string(buf, nv.value, 7, 0);
        }
        Line::Literal(nv) => {
            encode_string(buf, nv.name, 3, field_line::LITERAL_NAME | never_bit(nv, 0x10));
            encode_string(buf, nv.value, 7, 0);
        }
    }
}

fn never_bit(nv: &Nv<'_>, bit: u8) -> u8 {
    if nv.flags.contains(NvFlags::NEVER_INDEX) {
        bit
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn peer(capacity: u64, blocked: u64) -> Settings {
        Settings::peer_defaults()
            .with_qpack_max_dtable_capacity(capacity)
            .with_qpack_blocked_streams(blocked)
    }

    #[test]
    fn test_static_only_encoding() {
        let mut encoder = Encoder::new(4096);
        let headers = [Nv::from((":method", "GET")), Nv::from((":path", "/"))];
        let block = encoder.encode(0, &headers).unwrap();
        // RIC 0, base 0, indexed static 17, indexed static 1
        assert_eq!(&block[..], &[0x00, 0x00, 0xd1, 0xc1]);
        assert!(!encoder.has_instructions());
    }

    #[test]
    fn test_dynamic_insert_after_settings() {
        let mut encoder = Encoder::new(4096);
        encoder.apply_peer_settings(&peer(220, 1));
        assert_eq!(encoder.capacity(), 220);

        let headers = [Nv::from(("x-trace", "abc"))];
        let block = encoder.encode(0, &headers).unwrap();
        assert_eq!(encoder.insert_count(), 1);
        // MaxEntries = 6, so RIC 1 encodes as 2; indexed dynamic relative 0
        assert_eq!(&block[..], &[0x02, 0x00, 0x80]);
        assert_eq!(encoder.blocked_streams(), 1);

        let instructions = encoder.take_instructions().unwrap();
        // Set Dynamic Table Capacity 220 comes first
        assert_eq!(&instructions[..2], &[0x3f, 0xbd]);
    }

    #[test]
    fn test_blocked_budget_forces_literals() {
        let mut encoder = Encoder::new(4096);
        encoder.apply_peer_settings(&peer(4096, 0));

        let block = encoder.encode(0, &[Nv::from(("x-trace", "abc"))]).unwrap();
        assert_eq!(encoder.insert_count(), 0);
        assert_eq!(block[0], 0x00);
    }

    #[test]
    fn test_never_index_is_literal() {
        let mut encoder = Encoder::new(4096);
        encoder.apply_peer_settings(&peer(4096, 10));

        let nv = Nv::sensitive(b"authorization", b"secret");
        let block = encoder.encode(0, &[nv]).unwrap();
        assert_eq!(encoder.insert_count(), 0);
        // Literal with static name ref 84, N bit set
        assert_eq!(block[2] & 0xf0, 0x70);
    }

    #[test]
    fn test_header_too_large() {
        let mut encoder = Encoder::new(4096);
        let mut settings = peer(4096, 10);
        settings.max_field_section_size = 40;
        encoder.apply_peer_settings(&settings);
        let _ = encoder.take_instructions();

        let err = encoder.encode(0, &[Nv::from(("x-long-name", "value"))]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::QpackHeaderTooLarge);
        assert_eq!(encoder.insert_count(), 0);
        assert!(!encoder.has_instructions());
    }

    #[test]
    fn test_decoder_stream_acks() {
        let mut encoder = Encoder::new(4096);
        encoder.apply_peer_settings(&peer(4096, 10));
        encoder.encode(4, &[Nv::from(("x-a", "1"))]).unwrap();
        assert_eq!(encoder.blocked_streams(), 1);

        // Section Acknowledgement for stream 4, split across two reads
        encoder.recv_decoder_stream(&[]).unwrap();
        encoder.recv_decoder_stream(&[0x84]).unwrap();
        assert_eq!(encoder.known_received_count(), 1);
        assert_eq!(encoder.blocked_streams(), 0);

        // Unknown stream acknowledgement
        assert!(encoder.recv_decoder_stream(&[0x88]).is_err());
    }

    #[test]
    fn test_insert_count_increment_overflow() {
        let mut encoder = Encoder::new(4096);
        encoder.apply_peer_settings(&peer(4096, 10));
        let err = encoder.recv_decoder_stream(&[0x01]).unwrap_err();
        assert_eq!(err.app_error_code(), 0x202);
    }
}
