//! HTTP/3 Constants
//!
//! Wire constants used throughout the engine, following RFC 9114 (HTTP/3),
//! RFC 9204 (QPACK) and RFC 9218 (priorities).

// ============================================================================
// HTTP/3 Frame Types (RFC 9114 Section 7.2)
// ============================================================================

/// Frame type constants
pub mod frame_type {
    /// DATA frame - carries request or response body
    pub const DATA: u64 = 0x00;
    /// HEADERS frame - carries an encoded field section
    pub const HEADERS: u64 = 0x01;
    /// CANCEL_PUSH frame - cancels a server push
    pub const CANCEL_PUSH: u64 = 0x03;
    /// SETTINGS frame - communicates configuration parameters
    pub const SETTINGS: u64 = 0x04;
    /// PUSH_PROMISE frame - initiates a server push
    pub const PUSH_PROMISE: u64 = 0x05;
    /// GOAWAY frame - initiates graceful connection shutdown
    pub const GOAWAY: u64 = 0x07;
    /// MAX_PUSH_ID frame - controls maximum push ID
    pub const MAX_PUSH_ID: u64 = 0x0D;

    /// Frame types reserved by HTTP/2 that must not be sent in HTTP/3
    pub const RESERVED_H2: [u64; 4] = [0x02, 0x06, 0x08, 0x09];
}

// ============================================================================
// HTTP/3 Error Codes (RFC 9114 Section 8.1)
// ============================================================================

/// HTTP/3 application error codes
pub mod h3_error {
    /// No error
    pub const H3_NO_ERROR: u64 = 0x100;
    /// General protocol error
    pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;
    /// Internal error
    pub const H3_INTERNAL_ERROR: u64 = 0x102;
    /// Stream creation error
    pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
    /// Critical stream closed unexpectedly
    pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x104;
    /// Frame not allowed in current context
    pub const H3_FRAME_UNEXPECTED: u64 = 0x105;
    /// Frame encoding error
    pub const H3_FRAME_ERROR: u64 = 0x106;
    /// Excessive load
    pub const H3_EXCESSIVE_LOAD: u64 = 0x107;
    /// Stream or push ID error
    pub const H3_ID_ERROR: u64 = 0x108;
    /// Settings error
    pub const H3_SETTINGS_ERROR: u64 = 0x109;
    /// Missing settings
    pub const H3_MISSING_SETTINGS: u64 = 0x10A;
    /// Request rejected
    pub const H3_REQUEST_REJECTED: u64 = 0x10B;
    /// Request cancelled
    pub const H3_REQUEST_CANCELLED: u64 = 0x10C;
    /// Request incomplete
    pub const H3_REQUEST_INCOMPLETE: u64 = 0x10D;
    /// Message error
    pub const H3_MESSAGE_ERROR: u64 = 0x10E;
    /// Connect error
    pub const H3_CONNECT_ERROR: u64 = 0x10F;
    /// Version fallback
    pub const H3_VERSION_FALLBACK: u64 = 0x110;

    /// QPACK decompression failed (RFC 9204 Section 6)
    pub const QPACK_DECOMPRESSION_FAILED: u64 = 0x200;
    /// QPACK encoder stream error
    pub const QPACK_ENCODER_STREAM_ERROR: u64 = 0x201;
    /// QPACK decoder stream error
    pub const QPACK_DECODER_STREAM_ERROR: u64 = 0x202;
}

// ============================================================================
// HTTP/3 Settings (RFC 9114 Section 7.2.4.1)
// ============================================================================

/// Settings identifier constants
pub mod settings_id {
    /// QPACK maximum table capacity
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
    /// Maximum field section size (previously MAX_HEADER_LIST_SIZE)
    pub const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
    /// QPACK blocked streams
    pub const QPACK_BLOCKED_STREAMS: u64 = 0x07;
    /// Enable extended CONNECT (RFC 9220)
    pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
    /// HTTP datagrams (RFC 9297)
    pub const H3_DATAGRAM: u64 = 0x33;

    /// Setting identifiers reserved by HTTP/2
    pub const RESERVED_H2: [u64; 4] = [0x02, 0x03, 0x04, 0x05];
}

// ============================================================================
// HTTP/3 Stream Types (RFC 9114 Section 6.2)
// ============================================================================

/// Unidirectional stream type constants
pub mod stream_type {
    /// Control stream
    pub const CONTROL: u64 = 0x00;
    /// Push stream
    pub const PUSH: u64 = 0x01;
    /// QPACK encoder stream
    pub const QPACK_ENCODER: u64 = 0x02;
    /// QPACK decoder stream
    pub const QPACK_DECODER: u64 = 0x03;
}

// ============================================================================
// QPACK Constants (RFC 9204)
// ============================================================================

/// QPACK related constants
pub mod qpack {
    /// Static table size
    pub const STATIC_TABLE_SIZE: usize = 99;
    /// Per-entry overhead counted against the table capacity
    pub const ENTRY_OVERHEAD: usize = 32;

    /// Encoder stream instructions (RFC 9204 Section 4.3)
    pub mod encoder_instruction {
        /// Set dynamic table capacity: `001xxxxx`
        pub const SET_DYNAMIC_TABLE_CAPACITY: u8 = 0x20;
        /// Insert with name reference: `1Txxxxxx`
        pub const INSERT_WITH_NAME_REF: u8 = 0x80;
        /// Insert with literal name: `01Hxxxxx`
        pub const INSERT_LITERAL_NAME: u8 = 0x40;
        /// Duplicate: `000xxxxx`
        pub const DUPLICATE: u8 = 0x00;
    }

    /// Decoder stream instructions (RFC 9204 Section 4.4)
    pub mod decoder_instruction {
        /// Section acknowledgment: `1xxxxxxx`
        pub const SECTION_ACK: u8 = 0x80;
        /// Stream cancellation: `01xxxxxx`
        pub const STREAM_CANCEL: u8 = 0x40;
        /// Insert count increment: `00xxxxxx`
        pub const INSERT_COUNT_INCREMENT: u8 = 0x00;
    }

    /// Field line representations (RFC 9204 Section 4.5)
    pub mod field_line {
        /// Indexed field line: `1Txxxxxx`
        pub const INDEXED: u8 = 0x80;
        /// Indexed field line with post-base index: `0001xxxx`
        pub const INDEXED_POST_BASE: u8 = 0x10;
        /// Literal field line with name reference: `01NTxxxx`
        pub const LITERAL_NAME_REF: u8 = 0x40;
        /// Literal field line with post-base name reference: `0000Nxxx`
        pub const LITERAL_POST_BASE_NAME_REF: u8 = 0x00;
        /// Literal field line with literal name: `001NHxxx`
        pub const LITERAL_NAME: u8 = 0x20;
    }
}

// ============================================================================
// Default Values
// ============================================================================

/// Default settings values
pub mod defaults {
    /// Default maximum field section size (16KB)
    pub const MAX_FIELD_SECTION_SIZE: u64 = 16384;
    /// Default QPACK max table capacity
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 4096;
    /// Default QPACK blocked streams
    pub const QPACK_BLOCKED_STREAMS: u64 = 100;
    /// Largest non-DATA, non-HEADERS frame payload we buffer
    pub const MAX_CONTROL_FRAME_SIZE: u64 = 16384;
    /// Size hint handed to body sources per pull
    pub const WRITE_QUANTUM: usize = 16384;
    /// Bytes a request stream may buffer behind a QPACK-blocked header block
    pub const MAX_BLOCKED_BUFFER: u64 = 65536;
}

// ============================================================================
// Limits
// ============================================================================

/// Protocol and implementation limits
pub mod limits {
    /// Maximum variable-length integer value (2^62 - 1)
    pub const MAX_VARINT: u64 = (1u64 << 62) - 1;
    /// Largest `qpack_blocked_streams` accepted in local settings
    pub const MAX_QPACK_BLOCKED_STREAMS: u64 = 65535;
    /// Largest QPACK table capacity accepted in local settings
    pub const MAX_QPACK_TABLE_CAPACITY: u64 = 1 << 30;
    /// Highest client-initiated bidirectional stream id
    pub const MAX_CLIENT_BIDI_STREAM_ID: u64 = (1u64 << 62) - 4;
}
