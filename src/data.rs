//! Pull-based body sources
//!
//! A request or response body is produced on demand: while the stream is
//! scheduled, `writev_stream` asks the stream's [`DataProvider`] for the next
//! chunk. Providers must not block; a provider with nothing available yet
//! returns [`Read::WouldBlock`] and the stream is parked until the
//! application calls `resume_stream`.

use bytes::Bytes;

use crate::error::CallbackFailure;
use crate::types::StreamId;

bitflags::bitflags! {
    /// Flags attached to a chunk returned by a body source
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DataFlags: u8 {
        /// This is the last chunk of the body
        const EOF = 0x01;
        /// With `EOF`: end the body without ending the stream, so that
        /// trailers can follow
        const NO_END_STREAM = 0x02;
    }
}

/// Result of pulling from a body source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read {
    /// A chunk of body data (possibly empty when carrying `EOF`)
    Data { data: Bytes, flags: DataFlags },
    /// Nothing available now; park the stream until resumed
    WouldBlock,
}

impl Read {
    /// A chunk that is not the last
    pub fn data(data: impl Into<Bytes>) -> Self {
        Read::Data {
            data: data.into(),
            flags: DataFlags::empty(),
        }
    }

    /// The final chunk
    pub fn eof(data: impl Into<Bytes>) -> Self {
        Read::Data {
            data: data.into(),
            flags: DataFlags::EOF,
        }
    }
}

/// Source of body bytes for a stream
pub trait DataProvider {
    /// Produce at most `max_len` bytes for `stream_id`
    ///
    /// Returning an error aborts the connection with `CallbackFailure`.
    fn read_data(&mut self, stream_id: StreamId, max_len: usize) -> Result<Read, CallbackFailure>;

    /// Whether the body is instead fed through `submit_data`
    ///
    /// Such a source is never pulled; submitting it only keeps the sending
    /// side open after the headers.
    fn is_push(&self) -> bool {
        false
    }
}

impl<F> DataProvider for F
where
    F: FnMut(StreamId, usize) -> Result<Read, CallbackFailure>,
{
    fn read_data(&mut self, stream_id: StreamId, max_len: usize) -> Result<Read, CallbackFailure> {
        self(stream_id, max_len)
    }
}

/// Boxed body source as stored by the connection
pub type BoxedProvider = Box<dyn DataProvider + Send>;

// ============================================================================
// Static Body
// ============================================================================

/// A body known in full up front
#[derive(Debug, Clone, Default)]
pub struct StaticBody {
    remaining: Bytes,
}

impl StaticBody {
    /// Create a body from bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            remaining: data.into(),
        }
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Box the body for submission
    pub fn boxed(self) -> BoxedProvider {
        Box::new(self)
    }
}

impl DataProvider for StaticBody {
    fn read_data(&mut self, _stream_id: StreamId, max_len: usize) -> Result<Read, CallbackFailure> {
        let len = self.remaining.len().min(max_len.max(1));
        let data = self.remaining.split_to(len);
        let flags = if self.remaining.is_empty() {
            DataFlags::EOF
        } else {
            DataFlags::empty()
        };
        Ok(Read::Data { data, flags })
    }
}

// ============================================================================
// Push Body
// ============================================================================

/// Marker body whose bytes arrive through `Connection::submit_data`
#[derive(Debug, Clone, Copy, Default)]
pub struct PushBody;

impl PushBody {
    /// Box the marker for submission
    pub fn boxed(self) -> BoxedProvider {
        Box::new(self)
    }
}

impl DataProvider for PushBody {
    fn read_data(&mut self, _stream_id: StreamId, _max_len: usize) -> Result<Read, CallbackFailure> {
        Ok(Read::WouldBlock)
    }

    fn is_push(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_body_chunks() {
        let mut body = StaticBody::new(&b"hello world"[..]);
        assert_eq!(body.read_data(0, 6).unwrap(), Read::data(&b"hello "[..]));
        assert_eq!(body.read_data(0, 6).unwrap(), Read::eof(&b"world"[..]));
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_empty_static_body() {
        let mut body = StaticBody::default();
        assert_eq!(body.read_data(0, 1024).unwrap(), Read::eof(Bytes::new()));
    }

    #[test]
    fn test_closure_provider() {
        let mut calls = 0;
        let mut provider = move |_id: StreamId, _max: usize| -> Result<Read, CallbackFailure> {
            calls += 1;
            if calls == 1 {
                Ok(Read::WouldBlock)
            } else {
                Ok(Read::eof(Bytes::from_static(b"late")))
            }
        };
        assert_eq!(provider.read_data(4, 16).unwrap(), Read::WouldBlock);
        assert_eq!(provider.read_data(4, 16).unwrap(), Read::eof(&b"late"[..]));
    }

    #[test]
    fn test_push_body_marker() {
        assert!(PushBody.boxed().is_push());
        assert!(!StaticBody::new(&b"x"[..]).boxed().is_push());
    }
}
