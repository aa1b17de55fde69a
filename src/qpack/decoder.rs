//! QPACK decoder
//!
//! Applies encoder-stream instructions to the dynamic table, decodes field
//! sections, and produces decoder-stream instructions. A section whose
//! Required Insert Count is ahead of the table is reported as blocked; the
//! caller keeps the bytes and retries after [`Decoder::take_unblocked`]
//! names the stream.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace};

use super::static_table;
use super::table::DynamicTable;
use super::{decode_int, decode_string, encode_int, WireError, WireResult};
use crate::constants::qpack::{decoder_instruction, encoder_instruction, field_line, ENTRY_OVERHEAD};
use crate::error::{QpackError, Result};
use crate::rcbuf::RcBuf;
use crate::types::{HeaderField, NvFlags, StreamId};

/// Outcome of decoding a field section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The section decoded completely, in encoded order
    Fields(Vec<HeaderField>),
    /// The section references inserts that have not arrived yet
    Blocked,
}

/// QPACK decoder
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Capacity we advertised; the peer may not exceed it
    max_capacity: u64,
    /// Streams we allow to be blocked at once
    max_blocked: usize,
    /// Largest field section we accept
    max_field_section_size: u64,
    /// Blocked streams with their required insert count, oldest first
    blocked: VecDeque<(StreamId, u64)>,
    /// Inserts the encoder already knows we received
    acked_insert_count: u64,
    /// Pending decoder stream bytes
    instructions: Vec<u8>,
    /// Partial encoder stream instruction
    pending_input: Vec<u8>,
}

impl Decoder {
    /// Create a decoder from the local settings
    pub fn new(max_capacity: u64, max_blocked: u64, max_field_section_size: u64) -> Self {
        Self {
            table: DynamicTable::new(),
            max_capacity,
            max_blocked: usize::try_from(max_blocked).unwrap_or(usize::MAX),
            max_field_section_size,
            blocked: VecDeque::new(),
            acked_insert_count: 0,
            instructions: Vec::new(),
            pending_input: Vec::new(),
        }
    }

    /// Number of inserts received
    pub fn insert_count(&self) -> u64 {
        self.table.insert_count()
    }

    /// Number of streams currently blocked
    pub fn blocked_streams(&self) -> usize {
        self.blocked.len()
    }

    /// Whether a stream is blocked
    pub fn is_blocked(&self, stream_id: StreamId) -> bool {
        self.blocked.iter().any(|&(id, _)| id == stream_id)
    }

    /// Take the pending decoder stream bytes
    pub fn take_instructions(&mut self) -> Option<Bytes> {
        if self.instructions.is_empty() {
            return None;
        }
        Some(Bytes::from(std::mem::take(&mut self.instructions)))
    }

    /// Whether decoder stream bytes are pending
    pub fn has_instructions(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Release every stream whose required inserts have now arrived
    ///
    /// Streams are returned in the order they became blocked.
    pub fn take_unblocked(&mut self) -> Vec<StreamId> {
        let insert_count = self.table.insert_count();
        let mut released = Vec::new();
        self.blocked.retain(|&(id, required)| {
            if required <= insert_count {
                released.push(id);
                false
            } else {
                true
            }
        });
        for &stream_id in &released {
            debug!(stream_id, "stream unblocked");
        }
        released
    }

    /// Forget a stream, emitting Stream Cancellation if it was blocked
    pub fn cancel_stream(&mut self, stream_id: StreamId) {
        let before = self.blocked.len();
        self.blocked.retain(|&(id, _)| id != stream_id);
        if self.blocked.len() != before && self.max_capacity > 0 {
            encode_int(
                &mut self.instructions,
                stream_id as u64,
                6,
                decoder_instruction::STREAM_CANCEL,
            );
        }
    }

    // ========================================================================
    // Encoder Stream
    // ========================================================================

    /// Process bytes received on the peer's encoder stream
    ///
    /// Emits an Insert Count Increment for the inserts this call applied.
    pub fn recv_encoder_stream(&mut self, data: &[u8]) -> Result<()> {
        self.pending_input.extend_from_slice(data);
        let input = std::mem::take(&mut self.pending_input);

        let mut pos = 0;
        let result: Result<()> = loop {
            if pos >= input.len() {
                break Ok(());
            }
            match self.encoder_instruction(&input[pos..]) {
                Ok(consumed) => pos += consumed,
                Err(WireError::Incomplete) => break Ok(()),
                Err(WireError::Invalid) => break Err(QpackError::EncoderStreamError.into()),
            }
        };
        self.pending_input = input[pos..].to_vec();
        result?;

        let increment = self.table.insert_count() - self.acked_insert_count;
        if increment > 0 {
            encode_int(
                &mut self.instructions,
                increment,
                6,
                decoder_instruction::INSERT_COUNT_INCREMENT,
            );
            self.acked_insert_count = self.table.insert_count();
        }
        Ok(())
    }

    fn encoder_instruction(&mut self, data: &[u8]) -> WireResult<usize> {
        let first = data[0];

        if first & encoder_instruction::INSERT_WITH_NAME_REF != 0 {
            let is_static = first & 0x40 != 0;
            let (index, mut pos) = decode_int(data, 6)?;
            let (value, consumed) = decode_string(&data[pos..], 7)?;
            pos += consumed;

            let name = if is_static {
                let (name, _) = static_table::get(index).ok_or(WireError::Invalid)?;
                Bytes::from_static(name)
            } else {
                let abs = self
                    .table
                    .insert_count()
                    .checked_sub(index + 1)
                    .ok_or(WireError::Invalid)?;
                self.table.get(abs).ok_or(WireError::Invalid)?.name.clone()
            };
            self.insert(name, Bytes::from(value))?;
            Ok(pos)
        } else if first & encoder_instruction::INSERT_LITERAL_NAME != 0 {
            let (name, mut pos) = decode_string(data, 5)?;
            let (value, consumed) = decode_string(&data[pos..], 7)?;
            pos += consumed;
            self.insert(Bytes::from(name), Bytes::from(value))?;
            Ok(pos)
        } else if first & encoder_instruction::SET_DYNAMIC_TABLE_CAPACITY != 0 {
            let (capacity, consumed) = decode_int(data, 5)?;
            if capacity > self.max_capacity {
                return Err(WireError::Invalid);
            }
            self.table.set_capacity(capacity as usize);
            trace!(capacity, "dynamic table capacity set");
            Ok(consumed)
        } else {
            // Duplicate
            let (index, consumed) = decode_int(data, 5)?;
            let abs = self
                .table
                .insert_count()
                .checked_sub(index + 1)
                .ok_or(WireError::Invalid)?;
            let entry = self.table.get(abs).ok_or(WireError::Invalid)?.clone();
            self.insert(entry.name, entry.value)?;
            Ok(consumed)
        }
    }

    fn insert(&mut self, name: Bytes, value: Bytes) -> WireResult<()> {
        if !self.table.insert(name, value) {
            return Err(WireError::Invalid);
        }
        Ok(())
    }

    // ========================================================================
    // Field Sections
    // ========================================================================

    /// Decode a complete field section
    ///
    /// Returns `Blocked` (and registers the stream) when the section needs
    /// inserts that have not arrived. Registering more blocked streams than
    /// allowed is `QpackFatal`.
    pub fn decode(&mut self, stream_id: StreamId, data: &[u8]) -> Result<Decoded> {
        let invalid = |_| QpackError::DecompressionFailed;

        let (encoded_ric, mut pos) = decode_int(data, 8).map_err(invalid)?;
        let required = self.decode_required_insert_count(encoded_ric)?;

        let sign = *data.get(pos).ok_or(QpackError::DecompressionFailed)? & 0x80 != 0;
        let (delta, consumed) = decode_int(&data[pos..], 7).map_err(invalid)?;
        pos += consumed;
        let base = if sign {
            required
                .checked_sub(delta + 1)
                .ok_or(QpackError::DecompressionFailed)?
        } else {
            required + delta
        };

        if required > self.table.insert_count() {
            if !self.is_blocked(stream_id) {
                if self.blocked.len() >= self.max_blocked {
                    return Err(QpackError::BlockedStreamLimit.into());
                }
                self.blocked.push_back((stream_id, required));
                debug!(stream_id, required_insert_count = required, "stream blocked");
            }
            return Ok(Decoded::Blocked);
        }

        let mut fields = Vec::new();
        let mut total = 0u64;
        while pos < data.len() {
            let (field, consumed) = self
                .decode_line(&data[pos..], base, required)
                .map_err(invalid)?;
            pos += consumed;

            total += field.size();
            if total > self.max_field_section_size {
                return Err(QpackError::HeaderTooLarge.into());
            }
            fields.push(field);
        }

        if required > 0 {
            encode_int(
                &mut self.instructions,
                stream_id as u64,
                7,
                decoder_instruction::SECTION_ACK,
            );
            self.acked_insert_count = self.acked_insert_count.max(required);
        }
        Ok(Decoded::Fields(fields))
    }

    /// RFC 9204 Section 4.5.1.1
    fn decode_required_insert_count(&self, encoded: u64) -> Result<u64> {
        if encoded == 0 {
            return Ok(0);
        }

        let max_entries = self.max_capacity / ENTRY_OVERHEAD as u64;
        let full_range = 2 * max_entries;
        if encoded > full_range {
            return Err(QpackError::DecompressionFailed.into());
        }

        let max_value = self.table.insert_count() + max_entries;
        let max_wrapped = (max_value / full_range) * full_range;
        let mut required = max_wrapped + encoded - 1;

        if required > max_value {
            if required <= full_range {
                return Err(QpackError::DecompressionFailed.into());
            }
            required -= full_range;
        }
        if required == 0 {
            return Err(QpackError::DecompressionFailed.into());
        }
        Ok(required)
    }

    fn decode_line(&self, data: &[u8], base: u64, required: u64) -> WireResult<(HeaderField, usize)> {
        let first = data[0];

        if first & field_line::INDEXED != 0 {
            let (index, consumed) = decode_int(data, 6)?;
            let (name, value) = if first & 0x40 != 0 {
                static_table::get_rcbuf(index).ok_or(WireError::Invalid)?
            } else {
                self.dynamic(relative_to_absolute(base, index)?, required)?
            };
            Ok((HeaderField::new(name, value), consumed))
        } else if first & field_line::LITERAL_NAME_REF != 0 {
            let never_index = first & 0x20 != 0;
            let (index, mut pos) = decode_int(data, 4)?;
            let name = if first & 0x10 != 0 {
                static_table::get_rcbuf(index).ok_or(WireError::Invalid)?.0
            } else {
                self.dynamic(relative_to_absolute(base, index)?, required)?.0
            };
            let (value, consumed) = decode_string(&data[pos..], 7)?;
            pos += consumed;
            Ok((literal(name, value, never_index), pos))
        } else if first & field_line::LITERAL_NAME != 0 {
            let never_index = first & 0x10 != 0;
            let (name, mut pos) = decode_string(data, 3)?;
            let (value, consumed) = decode_string(&data[pos..], 7)?;
            pos += consumed;
            Ok((literal(RcBuf::from(Bytes::from(name)), value, never_index), pos))
        } else if first & field_line::INDEXED_POST_BASE != 0 {
            let (index, consumed) = decode_int(data, 4)?;
            let (name, value) = self.dynamic(base + index, required)?;
            Ok((HeaderField::new(name, value), consumed))
        } else {
            // Literal with post-base name reference
            let never_index = first & 0x08 != 0;
            let (index, mut pos) = decode_int(data, 3)?;
            let name = self.dynamic(base + index, required)?.0;
            let (value, consumed) = decode_string(&data[pos..], 7)?;
            pos += consumed;
            Ok((literal(name, value, never_index), pos))
        }
    }

    fn dynamic(&self, absolute: u64, required: u64) -> WireResult<(RcBuf, RcBuf)> {
        if absolute >= required {
            return Err(WireError::Invalid);
        }
        self.table
            .get(absolute)
            .map(|entry| entry.to_rcbuf())
            .ok_or(WireError::Invalid)
    }
}

fn relative_to_absolute(base: u64, relative: u64) -> WireResult<u64> {
    base.checked_sub(relative + 1).ok_or(WireError::Invalid)
}

fn literal(name: RcBuf, value: Vec<u8>, never_index: bool) -> HeaderField {
    let mut field = HeaderField::new(name, RcBuf::from(Bytes::from(value)));
    if never_index {
        field.flags = NvFlags::NEVER_INDEX;
    }
    field
}
