//! Core type definitions for h3core
//!
//! Stream ids, priorities, header lists and connection settings.

use crate::constants::{defaults, limits, settings_id};
use crate::error::{ErrorCode, H3Error, Result};
use crate::rcbuf::RcBuf;

// ============================================================================
// Stream ID
// ============================================================================

/// Stream identifier type (62-bit, same as QUIC)
pub type StreamId = i64;

/// Maximum valid stream ID (2^62 - 1)
pub const MAX_STREAM_ID: StreamId = (1i64 << 62) - 1;

/// Check if a stream is client-initiated and bidirectional
pub fn is_client_bidi(stream_id: StreamId) -> bool {
    stream_id & 0x03 == 0x00
}

/// Check if a stream is server-initiated and bidirectional
pub fn is_server_bidi(stream_id: StreamId) -> bool {
    stream_id & 0x03 == 0x01
}

/// Check if a stream is client-initiated and unidirectional
pub fn is_client_uni(stream_id: StreamId) -> bool {
    stream_id & 0x03 == 0x02
}

/// Check if a stream is server-initiated and unidirectional
pub fn is_server_uni(stream_id: StreamId) -> bool {
    stream_id & 0x03 == 0x03
}

/// Check if a stream is bidirectional
pub fn is_bidi(stream_id: StreamId) -> bool {
    stream_id & 0x02 == 0
}

// ============================================================================
// Role
// ============================================================================

/// Which endpoint this connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether `stream_id` was opened by this endpoint
    pub fn is_local(self, stream_id: StreamId) -> bool {
        let server_bit = stream_id & 0x01 == 0x01;
        match self {
            Role::Client => !server_bit,
            Role::Server => server_bit,
        }
    }
}

// ============================================================================
// Priority
// ============================================================================

/// HTTP/3 priority specification (RFC 9218)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    /// Urgency (0-7, lower is more urgent)
    pub urgency: u8,
    /// Incremental flag
    pub inc: bool,
}

impl Priority {
    /// Default urgency value
    pub const DEFAULT_URGENCY: u8 = 3;
    /// Maximum urgency value
    pub const MAX_URGENCY: u8 = 7;

    /// Create a priority with specified values
    pub fn with_urgency(urgency: u8, incremental: bool) -> Self {
        Self {
            urgency: urgency.min(Self::MAX_URGENCY),
            inc: incremental,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self {
            urgency: Self::DEFAULT_URGENCY,
            inc: false,
        }
    }
}

// ============================================================================
// Name-Value Pair (Header)
// ============================================================================

bitflags::bitflags! {
    /// Header field flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct NvFlags: u8 {
        /// Never index this field (sensitive value)
        const NEVER_INDEX = 0x01;
        /// The name may be borrowed rather than copied
        const NO_COPY_NAME = 0x02;
        /// The value may be borrowed rather than copied
        const NO_COPY_VALUE = 0x04;
    }
}

/// Header field supplied for submission
///
/// The slices are only borrowed for the duration of the submitting call;
/// field sections are encoded synchronously, so the `NO_COPY_*` hints
/// never extend the borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nv<'a> {
    /// Header name
    pub name: &'a [u8],
    /// Header value
    pub value: &'a [u8],
    /// Flags
    pub flags: NvFlags,
}

impl<'a> Nv<'a> {
    /// Create a new header field
    pub fn new(name: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            name,
            value,
            flags: NvFlags::empty(),
        }
    }

    /// Create a header field that must never enter a compression table
    pub fn sensitive(name: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            name,
            value,
            flags: NvFlags::NEVER_INDEX,
        }
    }

    /// Size as counted against `max_field_section_size`
    pub fn size(&self) -> u64 {
        (self.name.len() + self.value.len() + 32) as u64
    }
}

impl<'a> From<(&'a str, &'a str)> for Nv<'a> {
    fn from((name, value): (&'a str, &'a str)) -> Self {
        Nv::new(name.as_bytes(), value.as_bytes())
    }
}

// ============================================================================
// Header Field (decoded)
// ============================================================================

/// A single decoded header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Header name
    pub name: RcBuf,
    /// Header value
    pub value: RcBuf,
    /// Flags (only `NEVER_INDEX` is meaningful on receipt)
    pub flags: NvFlags,
}

impl HeaderField {
    /// Create a new header field
    pub fn new(name: RcBuf, value: RcBuf) -> Self {
        Self {
            name,
            value,
            flags: NvFlags::empty(),
        }
    }

    /// Whether the sender marked this field never-indexed
    pub fn is_sensitive(&self) -> bool {
        self.flags.contains(NvFlags::NEVER_INDEX)
    }

    /// Size as counted against `max_field_section_size`
    pub fn size(&self) -> u64 {
        (self.name.len() + self.value.len() + 32) as u64
    }
}

// ============================================================================
// Settings
// ============================================================================

/// HTTP/3 connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum size of a field section we accept
    pub max_field_section_size: u64,
    /// Capacity of the dynamic table our decoder allows the peer to use
    pub qpack_max_dtable_capacity: u64,
    /// Upper bound on the dynamic table our encoder uses (not advertised)
    pub qpack_encoder_max_dtable_capacity: u64,
    /// Number of streams that may be blocked on our decoder at once
    pub qpack_blocked_streams: u64,
    /// Extended CONNECT (server only)
    pub enable_connect_protocol: bool,
    /// HTTP datagrams
    pub h3_datagram: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_field_section_size: defaults::MAX_FIELD_SECTION_SIZE,
            qpack_max_dtable_capacity: defaults::QPACK_MAX_TABLE_CAPACITY,
            qpack_encoder_max_dtable_capacity: defaults::QPACK_MAX_TABLE_CAPACITY,
            qpack_blocked_streams: defaults::QPACK_BLOCKED_STREAMS,
            enable_connect_protocol: false,
            h3_datagram: false,
        }
    }
}

impl Settings {
    /// Settings assumed for a peer whose SETTINGS frame has not arrived
    pub fn peer_defaults() -> Self {
        Self {
            max_field_section_size: limits::MAX_VARINT,
            qpack_max_dtable_capacity: 0,
            qpack_encoder_max_dtable_capacity: 0,
            qpack_blocked_streams: 0,
            enable_connect_protocol: false,
            h3_datagram: false,
        }
    }

    /// Set the maximum accepted field section size
    pub fn with_max_field_section_size(mut self, size: u64) -> Self {
        self.max_field_section_size = size;
        self
    }

    /// Set the decoder dynamic table capacity
    pub fn with_qpack_max_dtable_capacity(mut self, capacity: u64) -> Self {
        self.qpack_max_dtable_capacity = capacity;
        self
    }

    /// Set the encoder dynamic table capacity
    pub fn with_qpack_encoder_max_dtable_capacity(mut self, capacity: u64) -> Self {
        self.qpack_encoder_max_dtable_capacity = capacity;
        self
    }

    /// Set the blocked streams limit
    pub fn with_qpack_blocked_streams(mut self, streams: u64) -> Self {
        self.qpack_blocked_streams = streams;
        self
    }

    /// Enable extended CONNECT
    pub fn with_connect_protocol(mut self, enable: bool) -> Self {
        self.enable_connect_protocol = enable;
        self
    }

    /// Enable HTTP datagrams
    pub fn with_h3_datagram(mut self, enable: bool) -> Self {
        self.h3_datagram = enable;
        self
    }

    /// Reject self-contradictory local settings
    pub fn validate(&self, role: Role) -> Result<()> {
        if self.qpack_blocked_streams > limits::MAX_QPACK_BLOCKED_STREAMS
            || self.qpack_max_dtable_capacity > limits::MAX_QPACK_TABLE_CAPACITY
            || self.qpack_encoder_max_dtable_capacity > limits::MAX_QPACK_TABLE_CAPACITY
            || self.max_field_section_size > limits::MAX_VARINT
        {
            return Err(ErrorCode::InvalidArgument.into());
        }
        if role == Role::Client && self.enable_connect_protocol {
            return Err(ErrorCode::InvalidArgument.into());
        }
        Ok(())
    }

    /// Settings parameters to advertise in a SETTINGS frame
    pub fn to_wire(&self) -> Vec<(u64, u64)> {
        let mut params = vec![
            (settings_id::MAX_FIELD_SECTION_SIZE, self.max_field_section_size),
            (settings_id::QPACK_MAX_TABLE_CAPACITY, self.qpack_max_dtable_capacity),
            (settings_id::QPACK_BLOCKED_STREAMS, self.qpack_blocked_streams),
        ];
        if self.enable_connect_protocol {
            params.push((settings_id::ENABLE_CONNECT_PROTOCOL, 1));
        }
        if self.h3_datagram {
            params.push((settings_id::H3_DATAGRAM, 1));
        }
        params
    }

    /// Build the peer's settings from a received SETTINGS frame
    pub fn from_wire(params: &[(u64, u64)]) -> Result<Self> {
        let mut settings = Settings::peer_defaults();

        for (i, &(id, value)) in params.iter().enumerate() {
            if params[..i].iter().any(|&(seen, _)| seen == id) {
                return Err(H3Error::SettingsError.into());
            }
            if settings_id::RESERVED_H2.contains(&id) {
                return Err(H3Error::SettingsError.into());
            }

            match id {
                settings_id::MAX_FIELD_SECTION_SIZE => {
                    settings.max_field_section_size = value;
                }
                settings_id::QPACK_MAX_TABLE_CAPACITY => {
                    settings.qpack_max_dtable_capacity = value;
                }
                settings_id::QPACK_BLOCKED_STREAMS => {
                    settings.qpack_blocked_streams = value;
                }
                settings_id::ENABLE_CONNECT_PROTOCOL => {
                    settings.enable_connect_protocol = parse_bool_setting(value)?;
                }
                settings_id::H3_DATAGRAM => {
                    settings.h3_datagram = parse_bool_setting(value)?;
                }
                _ => {
                    // Unknown settings are ignored
                }
            }
        }

        Ok(settings)
    }
}

fn parse_bool_setting(value: u64) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(H3Error::SettingsError.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_predicates() {
        assert!(is_client_bidi(0));
        assert!(is_server_bidi(1));
        assert!(is_client_uni(2));
        assert!(is_server_uni(3));
        assert!(is_client_bidi(4));
        assert!(!is_bidi(6));
        assert!(Role::Client.is_local(2));
        assert!(!Role::Client.is_local(3));
        assert!(Role::Server.is_local(7));
    }

    #[test]
    fn test_priority_defaults() {
        let pri = Priority::default();
        assert_eq!(pri.urgency, 3);
        assert!(!pri.inc);
        assert_eq!(Priority::with_urgency(9, true).urgency, 7);
    }

    #[test]
    fn test_settings_validate() {
        assert!(Settings::default().validate(Role::Client).is_ok());
        let too_many = Settings::default().with_qpack_blocked_streams(70_000);
        assert_eq!(
            too_many.validate(Role::Server).unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
        let connect = Settings::default().with_connect_protocol(true);
        assert!(connect.validate(Role::Server).is_ok());
        assert!(connect.validate(Role::Client).is_err());
    }

    #[test]
    fn test_settings_wire() {
        let local = Settings::default().with_h3_datagram(true);
        let peer = Settings::from_wire(&local.to_wire()).unwrap();
        assert_eq!(peer.max_field_section_size, 16384);
        assert_eq!(peer.qpack_max_dtable_capacity, 4096);
        assert_eq!(peer.qpack_blocked_streams, 100);
        assert!(peer.h3_datagram);

        let dup = [(0x06, 1), (0x06, 2)];
        assert_eq!(
            Settings::from_wire(&dup).unwrap_err().code(),
            ErrorCode::H3SettingsError
        );
        let h2 = [(0x04, 100)];
        assert!(Settings::from_wire(&h2).is_err());
        let bad_bool = [(0x33, 2)];
        assert!(Settings::from_wire(&bad_bool).is_err());
        let grease = [(0x21, 7)];
        assert_eq!(Settings::from_wire(&grease).unwrap().qpack_max_dtable_capacity, 0);
    }
}
