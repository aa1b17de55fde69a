//! h3core - HTTP/3 connection engine
//!
//! A sans-I/O HTTP/3 (RFC 9114) engine with an nghttp3-style API: the caller
//! owns the QUIC transport, pushes received stream bytes in and pulls
//! serialized stream bytes out, and observes the protocol through callbacks.
//!
//! ## Features
//! - **HTTP/3 framing** on request, control and QPACK streams
//! - **QPACK header compression** (RFC 9204) with a dynamic table and
//!   blocked-stream handling
//! - **Priority scheduling** (RFC 9218 urgency and incremental delivery)
//! - **Pull-based bodies** through [`DataProvider`]
//! - **Graceful shutdown** with GOAWAY
//! - Optional **tokio wrapper** (`async-tokio`) and **client layer** (`client`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (Callbacks, DataProvider, submit_* calls)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Connection Core                          │
//! │  - Stream state machines                                    │
//! │  - Write scheduler                                          │
//! │  - Frame codec / QPACK bridge                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    QUIC transport (caller)                  │
//! │  - read_stream() in, writev_stream() out                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use h3core::{Callbacks, Connection, Nv, Settings};
//!
//! let callbacks = Callbacks::builder()
//!     .recv_data(|stream_id, data| {
//!         println!("{stream_id}: {} bytes", data.len());
//!         Ok(())
//!     })
//!     .build();
//!
//! let mut conn: Connection = Connection::client(callbacks, Settings::default())?;
//! conn.bind_control_stream(2)?;
//! conn.bind_qpack_streams(6, 10)?;
//! conn.submit_request(0, &[Nv::from((":method", "GET")), Nv::from((":path", "/"))], None)?;
//!
//! while let Some(write) = conn.writev_stream(16)? {
//!     let n = transport.write(write.stream_id, &write.vecs, write.fin)?;
//!     conn.add_write_offset(write.stream_id, n)?;
//! }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

// Core types and constants
pub mod constants;
pub mod error;
pub mod rcbuf;
pub mod types;

// Frame layer
pub mod frame;

// QPACK header compression (RFC 9204)
pub mod qpack;
mod bridge;

// HTTP message rules
pub mod http;

// Application-facing hooks
pub mod callbacks;
pub mod data;

// Connection layer
pub mod connection;
mod scheduler;
pub mod stream;

// High-level HTTP/3 client API
#[cfg(feature = "client")]
pub mod client;

// Async I/O backend (tokio)
#[cfg(feature = "async-tokio")]
pub mod async_io;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use callbacks::{CallbackResult, Callbacks, CallbacksBuilder};
pub use connection::{Connection, ConnectionState, StreamWrite};
pub use data::{BoxedProvider, DataFlags, DataProvider, PushBody, Read, StaticBody};
pub use error::{err_is_fatal, strerror, CallbackFailure, Error, ErrorCode, Result, Severity};
pub use frame::{Frame, FrameType};
pub use rcbuf::RcBuf;
pub use stream::{StreamState, StreamType};
pub use types::{
    is_client_bidi, is_client_uni, is_server_bidi, is_server_uni, HeaderField, Nv, NvFlags,
    Priority, Role, Settings, StreamId,
};

#[cfg(feature = "client")]
pub use client::{Client, Method, Request, Response, ResponseStore};

#[cfg(feature = "async-tokio")]
pub use async_io::SharedConnection;

// ============================================================================
// Version Constants
// ============================================================================

/// Library version string
pub const VERSION: &str = "1.0.0";

/// Library version number (0xMMmmpp format)
pub const VERSION_NUM: u32 = 0x010000;

/// ALPN protocol id, length-prefixed as in a TLS ALPN list
pub const ALPN_H3: &[u8] = b"\x02h3";

/// HTTP/3 ALPN protocol string
pub const HTTP3_ALPN: &[u8] = b"h3";

/// Version info structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    /// Age of this struct
    pub age: i32,
    /// Version number
    pub version_num: u32,
    /// Version string
    pub version_str: &'static str,
}

/// Get library version info
pub fn version() -> Info {
    Info {
        age: 1,
        version_num: VERSION_NUM,
        version_str: VERSION,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let info = version();
        assert_eq!(info.version_num, VERSION_NUM);
        assert_eq!(info.version_str, "1.0.0");
    }

    #[test]
    fn test_stream_id_predicates() {
        assert!(is_client_bidi(0));
        assert!(is_server_bidi(1));
        assert!(is_client_uni(2));
        assert!(is_server_uni(3));
        assert!(!is_client_bidi(4 + 1));
    }
}
