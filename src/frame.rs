//! HTTP/3 Frame handling (RFC 9114)
//!
//! Stateless serialization and parsing of HTTP/3 frames and QUIC
//! variable-length integers. Parsing is split in two steps so that the
//! connection can work on partially received streams: [`FrameHeader::decode`]
//! reports `Ok(None)` until the type and length are complete, and
//! [`Frame::decode_payload`] interprets a fully buffered payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{frame_type, limits};
use crate::error::{ErrorCode, H3Error, Result};

// ============================================================================
// Frame Type Enum
// ============================================================================

/// HTTP/3 frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// DATA frame - carries request or response body
    Data,
    /// HEADERS frame - carries an encoded field section
    Headers,
    /// CANCEL_PUSH frame - cancels a server push
    CancelPush,
    /// SETTINGS frame - communicates configuration parameters
    Settings,
    /// PUSH_PROMISE frame - initiates a server push
    PushPromise,
    /// GOAWAY frame - initiates graceful shutdown
    Goaway,
    /// MAX_PUSH_ID frame - controls maximum push ID
    MaxPushId,
    /// Unknown/reserved frame type
    Unknown(u64),
}

impl From<u64> for FrameType {
    fn from(value: u64) -> Self {
        match value {
            frame_type::DATA => FrameType::Data,
            frame_type::HEADERS => FrameType::Headers,
            frame_type::CANCEL_PUSH => FrameType::CancelPush,
            frame_type::SETTINGS => FrameType::Settings,
            frame_type::PUSH_PROMISE => FrameType::PushPromise,
            frame_type::GOAWAY => FrameType::Goaway,
            frame_type::MAX_PUSH_ID => FrameType::MaxPushId,
            other => FrameType::Unknown(other),
        }
    }
}

impl From<FrameType> for u64 {
    fn from(ft: FrameType) -> u64 {
        match ft {
            FrameType::Data => frame_type::DATA,
            FrameType::Headers => frame_type::HEADERS,
            FrameType::CancelPush => frame_type::CANCEL_PUSH,
            FrameType::Settings => frame_type::SETTINGS,
            FrameType::PushPromise => frame_type::PUSH_PROMISE,
            FrameType::Goaway => frame_type::GOAWAY,
            FrameType::MaxPushId => frame_type::MAX_PUSH_ID,
            FrameType::Unknown(v) => v,
        }
    }
}

impl FrameType {
    /// Check if this is a grease frame type (0x1f * N + 0x21)
    pub fn is_grease(&self) -> bool {
        match self {
            FrameType::Unknown(v) => *v >= 0x21 && (*v - 0x21) % 0x1f == 0,
            _ => false,
        }
    }

    /// Check if this type was used by HTTP/2 and is forbidden in HTTP/3
    pub fn is_reserved_h2(&self) -> bool {
        match self {
            FrameType::Unknown(v) => frame_type::RESERVED_H2.contains(v),
            _ => false,
        }
    }
}

// ============================================================================
// Frame Header
// ============================================================================

/// Frame header (type + length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type
    pub frame_type: FrameType,
    /// Payload length
    pub length: u64,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(frame_type: FrameType, length: u64) -> Self {
        Self { frame_type, length }
    }

    /// Encode the frame header to a buffer
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_varint(buf, self.frame_type.into());
        encode_varint(buf, self.length);
    }

    /// Encoded size of the header
    pub fn encoded_len(&self) -> usize {
        varint_len(self.frame_type.into()) + varint_len(self.length)
    }

    /// Decode a frame header, returning `Ok(None)` until it is complete
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some((frame_type, type_len)) = try_decode_varint(data) else {
            return Ok(None);
        };
        let Some((length, len_len)) = try_decode_varint(&data[type_len..]) else {
            return Ok(None);
        };

        Ok(Some((
            Self {
                frame_type: FrameType::from(frame_type),
                length,
            },
            type_len + len_len,
        )))
    }
}

// ============================================================================
// Frame Enum
// ============================================================================

/// HTTP/3 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA frame
    Data(DataPayload),
    /// HEADERS frame
    Headers(HeadersPayload),
    /// CANCEL_PUSH frame
    CancelPush(CancelPushPayload),
    /// SETTINGS frame
    Settings(SettingsPayload),
    /// PUSH_PROMISE frame
    PushPromise(PushPromisePayload),
    /// GOAWAY frame
    Goaway(GoawayPayload),
    /// MAX_PUSH_ID frame
    MaxPushId(MaxPushIdPayload),
    /// Unknown frame (to be ignored)
    Unknown { frame_type: u64 },
}

impl Frame {
    /// Get the frame type
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data(_) => FrameType::Data,
            Frame::Headers(_) => FrameType::Headers,
            Frame::CancelPush(_) => FrameType::CancelPush,
            Frame::Settings(_) => FrameType::Settings,
            Frame::PushPromise(_) => FrameType::PushPromise,
            Frame::Goaway(_) => FrameType::Goaway,
            Frame::MaxPushId(_) => FrameType::MaxPushId,
            Frame::Unknown { frame_type } => FrameType::Unknown(*frame_type),
        }
    }

    /// Encode the frame to a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::Data(payload) => {
                FrameHeader::new(FrameType::Data, payload.data.len() as u64).encode(buf);
                buf.extend_from_slice(&payload.data);
            }
            Frame::Headers(payload) => {
                FrameHeader::new(FrameType::Headers, payload.header_block.len() as u64)
                    .encode(buf);
                buf.extend_from_slice(&payload.header_block);
            }
            Frame::CancelPush(payload) => {
                encode_single_varint_frame(buf, FrameType::CancelPush, payload.push_id);
            }
            Frame::Settings(payload) => {
                let mut inner = BytesMut::new();
                for &(id, value) in &payload.settings {
                    encode_varint(&mut inner, id);
                    encode_varint(&mut inner, value);
                }
                FrameHeader::new(FrameType::Settings, inner.len() as u64).encode(buf);
                buf.extend_from_slice(&inner);
            }
            Frame::PushPromise(payload) => {
                let length = varint_len(payload.push_id) + payload.header_block.len();
                FrameHeader::new(FrameType::PushPromise, length as u64).encode(buf);
                encode_varint(buf, payload.push_id);
                buf.extend_from_slice(&payload.header_block);
            }
            Frame::Goaway(payload) => {
                encode_single_varint_frame(buf, FrameType::Goaway, payload.id);
            }
            Frame::MaxPushId(payload) => {
                encode_single_varint_frame(buf, FrameType::MaxPushId, payload.push_id);
            }
            Frame::Unknown { frame_type } => {
                FrameHeader::new(FrameType::Unknown(*frame_type), 0).encode(buf);
            }
        }
    }

    /// Serialize into a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Interpret a complete payload
    ///
    /// Malformed payloads (truncated varints, trailing bytes) are
    /// `H3FrameError`.
    pub fn decode_payload(header: FrameHeader, payload: Bytes) -> Result<Self> {
        let frame = match header.frame_type {
            FrameType::Data => Frame::Data(DataPayload { data: payload }),
            FrameType::Headers => Frame::Headers(HeadersPayload {
                header_block: payload,
            }),
            FrameType::CancelPush => Frame::CancelPush(CancelPushPayload {
                push_id: decode_single_varint(&payload)?,
            }),
            FrameType::Settings => {
                let mut settings = Vec::new();
                let mut pos = 0;
                while pos < payload.len() {
                    let (id, consumed) = decode_payload_varint(&payload[pos..])?;
                    pos += consumed;
                    let (value, consumed) = decode_payload_varint(&payload[pos..])?;
                    pos += consumed;
                    settings.push((id, value));
                }
                Frame::Settings(SettingsPayload { settings })
            }
            FrameType::PushPromise => {
                let (push_id, consumed) = decode_payload_varint(&payload)?;
                Frame::PushPromise(PushPromisePayload {
                    push_id,
                    header_block: payload.slice(consumed..),
                })
            }
            FrameType::Goaway => Frame::Goaway(GoawayPayload {
                id: decode_single_varint(&payload)?,
            }),
            FrameType::MaxPushId => Frame::MaxPushId(MaxPushIdPayload {
                push_id: decode_single_varint(&payload)?,
            }),
            FrameType::Unknown(frame_type) => Frame::Unknown { frame_type },
        };
        Ok(frame)
    }
}

// ============================================================================
// Frame Payloads
// ============================================================================

/// DATA frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload {
    /// Raw data
    pub data: Bytes,
}

/// HEADERS frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersPayload {
    /// QPACK-encoded field section
    pub header_block: Bytes,
}

/// CANCEL_PUSH frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelPushPayload {
    /// Push ID to cancel
    pub push_id: u64,
}

/// SETTINGS frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPayload {
    /// List of (setting_id, value) pairs
    pub settings: Vec<(u64, u64)>,
}

/// PUSH_PROMISE frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromisePayload {
    /// Push ID
    pub push_id: u64,
    /// QPACK-encoded field section
    pub header_block: Bytes,
}

/// GOAWAY frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoawayPayload {
    /// Stream ID (from server) or push ID (from client)
    pub id: u64,
}

/// MAX_PUSH_ID frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPushIdPayload {
    /// Maximum push ID
    pub push_id: u64,
}

// ============================================================================
// Varint Encoding/Decoding (RFC 9000 Section 16)
// ============================================================================

/// Encode a variable-length integer
///
/// Values above 2^62 - 1 cannot be represented; they are clamped.
pub fn encode_varint<B: BufMut>(buf: &mut B, value: u64) {
    let value = value.min(limits::MAX_VARINT);
    match varint_len(value) {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(0x4000 | value as u16),
        4 => buf.put_u32(0x8000_0000 | value as u32),
        _ => buf.put_u64(0xc000_0000_0000_0000 | value),
    }
}

/// Decode a variable-length integer
///
/// Returns `NoBuf` if `data` ends before the integer does.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    try_decode_varint(data).ok_or_else(|| ErrorCode::NoBuf.into())
}

/// Decode a variable-length integer, `None` if incomplete
pub fn try_decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = 1usize << (first >> 6);
    if data.len() < len {
        return None;
    }

    let mut value = (first & 0x3f) as u64;
    for &b in &data[1..len] {
        value = (value << 8) | b as u64;
    }
    Some((value, len))
}

/// Get the encoded length of a varint
pub fn varint_len(value: u64) -> usize {
    if value < 0x40 {
        1
    } else if value < 0x4000 {
        2
    } else if value < 0x4000_0000 {
        4
    } else {
        8
    }
}

fn encode_single_varint_frame(buf: &mut BytesMut, ft: FrameType, value: u64) {
    FrameHeader::new(ft, varint_len(value) as u64).encode(buf);
    encode_varint(buf, value);
}

fn decode_payload_varint(data: &[u8]) -> Result<(u64, usize)> {
    try_decode_varint(data).ok_or_else(|| H3Error::FrameError.into())
}

fn decode_single_varint(data: &[u8]) -> Result<u64> {
    let (value, consumed) = decode_payload_varint(data)?;
    if consumed != data.len() {
        return Err(H3Error::FrameError.into());
    }
    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        let test_values = [0u64, 63, 64, 16383, 16384, 1_073_741_823, 1_073_741_824];

        for &value in &test_values {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value));
            let (decoded, len) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn test_varint_rfc_example() {
        // RFC 9000 Appendix A.1
        let (value, len) = decode_varint(&[0x9d, 0x7f, 0x3e, 0x7d]).unwrap();
        assert_eq!(value, 494_878_333);
        assert_eq!(len, 4);
        assert_eq!(
            decode_varint(&[0x9d, 0x7f]).unwrap_err().code(),
            ErrorCode::NoBuf
        );
    }

    #[test]
    fn test_partial_header() {
        assert_eq!(FrameHeader::decode(&[]).unwrap(), None);
        assert_eq!(FrameHeader::decode(&[0x01]).unwrap(), None);
        let (header, len) = FrameHeader::decode(&[0x01, 0x05, 0xff]).unwrap().unwrap();
        assert_eq!(header.frame_type, FrameType::Headers);
        assert_eq!(header.length, 5);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_settings_frame() {
        let frame = Frame::Settings(SettingsPayload {
            settings: vec![(0x06, 16384), (0x01, 4096)],
        });
        let bytes = frame.to_bytes();
        let (header, hlen) = FrameHeader::decode(&bytes).unwrap().unwrap();
        let decoded = Frame::decode_payload(header, bytes.slice(hlen..)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_goaway_trailing_bytes() {
        let header = FrameHeader::new(FrameType::Goaway, 2);
        let err = Frame::decode_payload(header, Bytes::from_static(&[0x04, 0x00])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::H3FrameError);
    }

    #[test]
    fn test_reserved_types() {
        assert!(FrameType::from(0x21).is_grease());
        assert!(FrameType::from(0x21 + 0x1f * 3).is_grease());
        assert!(FrameType::from(0x02).is_reserved_h2());
        assert!(FrameType::from(0x09).is_reserved_h2());
        assert!(!FrameType::from(0x0d).is_reserved_h2());
    }
}
