//! QPACK Header Compression (RFC 9204)
//!
//! QPACK is based on HPACK but designed for QUIC's out-of-order delivery:
//! references into the dynamic table may arrive before the inserts they
//! depend on, which leaves the referencing stream blocked.
//!
//! The codec is split into a [`Encoder`] and a [`Decoder`], each owning one
//! dynamic table. Both are byte-in/byte-out: instruction bytes received from
//! the peer are fed in, and instruction bytes for the local encoder and
//! decoder streams are collected for the connection to write.

mod decoder;
mod encoder;
pub mod huffman;
pub mod static_table;
mod table;

pub use decoder::{Decoded, Decoder};
pub use encoder::Encoder;
pub use table::DynamicTable;

// ============================================================================
// Primitive Parse Errors
// ============================================================================

/// Why a primitive could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WireError {
    /// More input is needed
    Incomplete,
    /// The input can never be valid
    Invalid,
}

pub(crate) type WireResult<T> = std::result::Result<T, WireError>;

// ============================================================================
// Prefixed Integers (RFC 7541 Section 5.1)
// ============================================================================

/// Encode an integer with an N-bit prefix, OR-ing `flags` into the first byte
pub(crate) fn encode_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, flags: u8) {
    let max_prefix = (1u64 << prefix_bits) - 1;

    if value < max_prefix {
        buf.push(flags | value as u8);
        return;
    }

    buf.push(flags | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 0x80 {
        buf.push((remaining & 0x7f) as u8 | 0x80);
        remaining >>= 7;
    }
    buf.push(remaining as u8);
}

/// Decode an integer with an N-bit prefix
///
/// Values that do not fit in 62 bits are `Invalid`.
pub(crate) fn decode_int(data: &[u8], prefix_bits: u8) -> WireResult<(u64, usize)> {
    let first = *data.first().ok_or(WireError::Incomplete)?;
    let max_prefix = (1u64 << prefix_bits) - 1;

    let mut value = first as u64 & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &b) in data[1..].iter().enumerate() {
        if shift > 56 {
            return Err(WireError::Invalid);
        }
        value = value
            .checked_add(((b & 0x7f) as u64) << shift)
            .ok_or(WireError::Invalid)?;
        shift += 7;

        if b & 0x80 == 0 {
            if value > crate::constants::limits::MAX_VARINT {
                return Err(WireError::Invalid);
            }
            return Ok((value, i + 2));
        }
    }

    Err(WireError::Incomplete)
}

// ============================================================================
// String Literals (RFC 9204 Section 4.1.2)
// ============================================================================

/// Encode a string literal with an N-bit length prefix
///
/// The Huffman flag sits just above the prefix; Huffman coding is used
/// whenever it is strictly shorter.
pub(crate) fn encode_string(buf: &mut Vec<u8>, data: &[u8], prefix_bits: u8, flags: u8) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        encode_int(buf, huffman_len as u64, prefix_bits, flags | (1 << prefix_bits));
        huffman::encode(data, buf);
    } else {
        encode_int(buf, data.len() as u64, prefix_bits, flags);
        buf.extend_from_slice(data);
    }
}

/// Decode a string literal with an N-bit length prefix
pub(crate) fn decode_string(data: &[u8], prefix_bits: u8) -> WireResult<(Vec<u8>, usize)> {
    let first = *data.first().ok_or(WireError::Incomplete)?;
    let huffman = first & (1 << prefix_bits) != 0;
    let (len, consumed) = decode_int(data, prefix_bits)?;

    let end = consumed
        .checked_add(usize::try_from(len).map_err(|_| WireError::Invalid)?)
        .ok_or(WireError::Invalid)?;
    if end > data.len() {
        return Err(WireError::Incomplete);
    }

    let raw = &data[consumed..end];
    let value = if huffman {
        huffman::decode(raw).ok_or(WireError::Invalid)?
    } else {
        raw.to_vec()
    };
    Ok((value, end))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_int_rfc7541() {
        // RFC 7541 C.1.2: 1337 with a 5-bit prefix
        let mut buf = Vec::new();
        encode_int(&mut buf, 1337, 5, 0);
        assert_eq!(buf, [0x1f, 0x9a, 0x0a]);
        assert_eq!(decode_int(&buf, 5).unwrap(), (1337, 3));

        let mut buf = Vec::new();
        encode_int(&mut buf, 10, 5, 0xe0);
        assert_eq!(buf, [0xea]);
        assert_eq!(decode_int(&buf, 5).unwrap(), (10, 1));
    }

    #[test]
    fn test_prefix_int_incomplete_and_overflow() {
        assert_eq!(decode_int(&[], 7), Err(WireError::Incomplete));
        assert_eq!(decode_int(&[0x7f, 0x80], 7), Err(WireError::Incomplete));
        let overflow = [0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(decode_int(&overflow, 7), Err(WireError::Invalid));
    }

    #[test]
    fn test_string_literal() {
        let mut buf = Vec::new();
        encode_string(&mut buf, b"custom-key", 7, 0);
        // Huffman is shorter for this input
        assert_eq!(buf[0] & 0x80, 0x80);
        let (value, consumed) = decode_string(&buf, 7).unwrap();
        assert_eq!(value, b"custom-key");
        assert_eq!(consumed, buf.len());

        assert_eq!(
            decode_string(&buf[..buf.len() - 1], 7),
            Err(WireError::Incomplete)
        );
    }
}
