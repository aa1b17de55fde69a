//! Shared header buffers
//!
//! Decoded header names and values are handed to the application as [`RcBuf`]s:
//! immutable, cheaply clonable views over [`Bytes`]. Buffers that come from
//! the QPACK static table point at static memory and never allocate; buffers
//! that come from the dynamic table share their allocation with the table
//! entry, so an application may keep a clone after the callback returns.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

/// Reference-counted immutable byte buffer
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct RcBuf {
    buf: Bytes,
    is_static: bool,
}

impl RcBuf {
    /// Wrap a buffer that lives in static memory
    pub const fn from_static(buf: &'static [u8]) -> Self {
        Self {
            buf: Bytes::from_static(buf),
            is_static: true,
        }
    }

    /// Wrap a shared buffer
    pub fn new(buf: Bytes) -> Self {
        Self { buf, is_static: false }
    }

    /// Copy a slice into a new buffer
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Whether the buffer points at static memory
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Borrow the bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Get a handle on the underlying shared buffer
    pub fn to_bytes(&self) -> Bytes {
        self.buf.clone()
    }
}

impl Deref for RcBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for RcBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Bytes> for RcBuf {
    fn from(buf: Bytes) -> Self {
        Self::new(buf)
    }
}

impl fmt::Debug for RcBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.buf) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:?}", &self.buf[..]),
        }
    }
}

impl PartialEq<[u8]> for RcBuf {
    fn eq(&self, other: &[u8]) -> bool {
        self.buf[..] == *other
    }
}

impl PartialEq<&[u8]> for RcBuf {
    fn eq(&self, other: &&[u8]) -> bool {
        self.buf[..] == **other
    }
}

impl PartialEq<&str> for RcBuf {
    fn eq(&self, other: &&str) -> bool {
        self.buf[..] == *other.as_bytes()
    }
}
