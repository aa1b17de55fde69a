//! Application callbacks
//!
//! The application observes a connection through a single [`Callbacks`]
//! value, built once with [`Callbacks::builder`] and moved into the
//! connection. Every callback is optional; a missing one behaves like a
//! callback that always succeeds. Returning [`CallbackFailure`] aborts the
//! enclosing operation and the connection with `ERR_CALLBACK_FAILURE`.

use std::fmt;

use crate::error::CallbackFailure;
use crate::types::{HeaderField, StreamId};

/// Result returned by every callback
pub type CallbackResult = Result<(), CallbackFailure>;

type StreamFn = Box<dyn FnMut(StreamId) -> CallbackResult + Send>;
type CodeFn = Box<dyn FnMut(StreamId, u64) -> CallbackResult + Send>;
type DataFn = Box<dyn FnMut(StreamId, &[u8]) -> CallbackResult + Send>;
type SizeFn = Box<dyn FnMut(StreamId, usize) -> CallbackResult + Send>;
type HeaderFn = Box<dyn FnMut(StreamId, &HeaderField) -> CallbackResult + Send>;
type FinFn = Box<dyn FnMut(StreamId, bool) -> CallbackResult + Send>;
type ShutdownFn = Box<dyn FnMut(u64) -> CallbackResult + Send>;

/// Connection callbacks
#[derive(Default)]
pub struct Callbacks {
    acked_stream_data: Option<CodeFn>,
    stream_close: Option<CodeFn>,
    recv_data: Option<DataFn>,
    deferred_consume: Option<SizeFn>,
    begin_headers: Option<StreamFn>,
    recv_header: Option<HeaderFn>,
    end_headers: Option<FinFn>,
    begin_trailers: Option<StreamFn>,
    recv_trailer: Option<HeaderFn>,
    end_trailers: Option<FinFn>,
    end_stream: Option<StreamFn>,
    stop_sending: Option<CodeFn>,
    reset_stream: Option<CodeFn>,
    shutdown: Option<ShutdownFn>,
}

impl Callbacks {
    /// Start building a callback table
    pub fn builder() -> CallbacksBuilder {
        CallbacksBuilder::default()
    }

    pub(crate) fn acked_stream_data(&mut self, id: StreamId, len: u64) -> CallbackResult {
        self.acked_stream_data.as_mut().map_or(Ok(()), |cb| cb(id, len))
    }

    pub(crate) fn stream_close(&mut self, id: StreamId, app_error_code: u64) -> CallbackResult {
        self.stream_close
            .as_mut()
            .map_or(Ok(()), |cb| cb(id, app_error_code))
    }

    pub(crate) fn recv_data(&mut self, id: StreamId, data: &[u8]) -> CallbackResult {
        self.recv_data.as_mut().map_or(Ok(()), |cb| cb(id, data))
    }

    pub(crate) fn deferred_consume(&mut self, id: StreamId, consumed: usize) -> CallbackResult {
        self.deferred_consume
            .as_mut()
            .map_or(Ok(()), |cb| cb(id, consumed))
    }

    pub(crate) fn begin_headers(&mut self, id: StreamId) -> CallbackResult {
        self.begin_headers.as_mut().map_or(Ok(()), |cb| cb(id))
    }

    pub(crate) fn recv_header(&mut self, id: StreamId, field: &HeaderField) -> CallbackResult {
        self.recv_header.as_mut().map_or(Ok(()), |cb| cb(id, field))
    }

    pub(crate) fn end_headers(&mut self, id: StreamId, fin: bool) -> CallbackResult {
        self.end_headers.as_mut().map_or(Ok(()), |cb| cb(id, fin))
    }

    pub(crate) fn begin_trailers(&mut self, id: StreamId) -> CallbackResult {
        self.begin_trailers.as_mut().map_or(Ok(()), |cb| cb(id))
    }

    pub(crate) fn recv_trailer(&mut self, id: StreamId, field: &HeaderField) -> CallbackResult {
        self.recv_trailer.as_mut().map_or(Ok(()), |cb| cb(id, field))
    }

    pub(crate) fn end_trailers(&mut self, id: StreamId, fin: bool) -> CallbackResult {
        self.end_trailers.as_mut().map_or(Ok(()), |cb| cb(id, fin))
    }

    pub(crate) fn end_stream(&mut self, id: StreamId) -> CallbackResult {
        self.end_stream.as_mut().map_or(Ok(()), |cb| cb(id))
    }

    pub(crate) fn stop_sending(&mut self, id: StreamId, app_error_code: u64) -> CallbackResult {
        self.stop_sending
            .as_mut()
            .map_or(Ok(()), |cb| cb(id, app_error_code))
    }

    pub(crate) fn reset_stream(&mut self, id: StreamId, app_error_code: u64) -> CallbackResult {
        self.reset_stream
            .as_mut()
            .map_or(Ok(()), |cb| cb(id, app_error_code))
    }

    pub(crate) fn shutdown(&mut self, id: u64) -> CallbackResult {
        self.shutdown.as_mut().map_or(Ok(()), |cb| cb(id))
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("acked_stream_data", &self.acked_stream_data.is_some())
            .field("stream_close", &self.stream_close.is_some())
            .field("recv_data", &self.recv_data.is_some())
            .field("deferred_consume", &self.deferred_consume.is_some())
            .field("begin_headers", &self.begin_headers.is_some())
            .field("recv_header", &self.recv_header.is_some())
            .field("end_headers", &self.end_headers.is_some())
            .field("begin_trailers", &self.begin_trailers.is_some())
            .field("recv_trailer", &self.recv_trailer.is_some())
            .field("end_trailers", &self.end_trailers.is_some())
            .field("end_stream", &self.end_stream.is_some())
            .field("stop_sending", &self.stop_sending.is_some())
            .field("reset_stream", &self.reset_stream.is_some())
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Callbacks`]
#[derive(Default)]
pub struct CallbacksBuilder {
    inner: Callbacks,
}

impl CallbacksBuilder {
    /// Peer acknowledged body bytes
    pub fn acked_stream_data(
        mut self,
        cb: impl FnMut(StreamId, u64) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.acked_stream_data = Some(Box::new(cb));
        self
    }

    /// A request stream closed, with its application error code
    pub fn stream_close(
        mut self,
        cb: impl FnMut(StreamId, u64) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.stream_close = Some(Box::new(cb));
        self
    }

    /// Body bytes arrived
    pub fn recv_data(
        mut self,
        cb: impl FnMut(StreamId, &[u8]) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.recv_data = Some(Box::new(cb));
        self
    }

    /// Bytes held back by a blocked stream were processed
    pub fn deferred_consume(
        mut self,
        cb: impl FnMut(StreamId, usize) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.deferred_consume = Some(Box::new(cb));
        self
    }

    /// A header section starts
    pub fn begin_headers(
        mut self,
        cb: impl FnMut(StreamId) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.begin_headers = Some(Box::new(cb));
        self
    }

    /// One header field, in encoded order
    pub fn recv_header(
        mut self,
        cb: impl FnMut(StreamId, &HeaderField) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.recv_header = Some(Box::new(cb));
        self
    }

    /// A header section ended; `fin` is set if nothing follows on the stream
    pub fn end_headers(
        mut self,
        cb: impl FnMut(StreamId, bool) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.end_headers = Some(Box::new(cb));
        self
    }

    /// A trailer section starts
    pub fn begin_trailers(
        mut self,
        cb: impl FnMut(StreamId) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.begin_trailers = Some(Box::new(cb));
        self
    }

    /// One trailer field
    pub fn recv_trailer(
        mut self,
        cb: impl FnMut(StreamId, &HeaderField) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.recv_trailer = Some(Box::new(cb));
        self
    }

    /// A trailer section ended
    pub fn end_trailers(
        mut self,
        cb: impl FnMut(StreamId, bool) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.end_trailers = Some(Box::new(cb));
        self
    }

    /// The peer finished sending on a stream
    pub fn end_stream(
        mut self,
        cb: impl FnMut(StreamId) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.end_stream = Some(Box::new(cb));
        self
    }

    /// The transport should send STOP_SENDING
    pub fn stop_sending(
        mut self,
        cb: impl FnMut(StreamId, u64) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.stop_sending = Some(Box::new(cb));
        self
    }

    /// The transport should send RESET_STREAM
    pub fn reset_stream(
        mut self,
        cb: impl FnMut(StreamId, u64) -> CallbackResult + Send + 'static,
    ) -> Self {
        self.inner.reset_stream = Some(Box::new(cb));
        self
    }

    /// The peer sent GOAWAY with this id
    pub fn shutdown(mut self, cb: impl FnMut(u64) -> CallbackResult + Send + 'static) -> Self {
        self.inner.shutdown = Some(Box::new(cb));
        self
    }

    /// Finish building
    pub fn build(self) -> Callbacks {
        self.inner
    }
}
