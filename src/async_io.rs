//! Async I/O backend for h3core
//!
//! [`SharedConnection`] puts a [`Connection`] behind a mutex so that one task
//! can drive the transport writer while others submit requests, feed
//! received bytes or resume body sources. Every call that can make stream
//! data writable wakes the writer, which waits in
//! [`next_write`](SharedConnection::next_write) instead of polling.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::connection::{Connection, ConnectionState, StreamWrite};
use crate::data::BoxedProvider;
use crate::error::{ErrorCode, Result};
use crate::types::{Nv, StreamId};

// ============================================================================
// Shared Connection
// ============================================================================

/// Connection shared between tasks
pub struct SharedConnection<U = ()> {
    inner: Arc<Mutex<Connection<U>>>,
    writable: Arc<Notify>,
}

impl<U> Clone for SharedConnection<U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            writable: self.writable.clone(),
        }
    }
}

impl<U> SharedConnection<U> {
    /// Wrap a connection
    pub fn new(conn: Connection<U>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
            writable: Arc::new(Notify::new()),
        }
    }

    /// Run `f` with exclusive access to the connection
    ///
    /// The writer is woken afterwards, since `f` may have queued data.
    pub fn with<R>(&self, f: impl FnOnce(&mut Connection<U>) -> R) -> R {
        let result = f(&mut self.inner.lock());
        self.wake();
        result
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state()
    }

    /// Feed bytes received on a stream
    pub fn read_stream(&self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<usize> {
        self.notify_after(|conn| conn.read_stream(stream_id, data, fin))
    }

    /// Submit a request
    pub fn submit_request(
        &self,
        stream_id: StreamId,
        headers: &[Nv<'_>],
        body: Option<BoxedProvider>,
    ) -> Result<()> {
        self.notify_after(|conn| conn.submit_request(stream_id, headers, body))
    }

    /// Submit a response
    pub fn submit_response(
        &self,
        stream_id: StreamId,
        headers: &[Nv<'_>],
        body: Option<BoxedProvider>,
    ) -> Result<()> {
        self.notify_after(|conn| conn.submit_response(stream_id, headers, body))
    }

    /// Submit trailers
    pub fn submit_trailers(&self, stream_id: StreamId, trailers: &[Nv<'_>]) -> Result<()> {
        self.notify_after(|conn| conn.submit_trailers(stream_id, trailers))
    }

    /// Queue body bytes on a push-style stream
    pub fn submit_data(&self, stream_id: StreamId, data: impl Into<Bytes>, fin: bool) -> Result<()> {
        self.notify_after(|conn| conn.submit_data(stream_id, data, fin))
    }

    /// Resume a stream whose body source would block
    pub fn resume_stream(&self, stream_id: StreamId) -> Result<()> {
        self.notify_after(|conn| conn.resume_stream(stream_id))
    }

    /// Allow a blocked stream to be scheduled again
    pub fn unblock_stream(&self, stream_id: StreamId) -> Result<()> {
        self.notify_after(|conn| conn.unblock_stream(stream_id))
    }

    /// Start a graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.notify_after(|conn| conn.shutdown())
    }

    /// Report bytes accepted by the transport
    pub fn add_write_offset(&self, stream_id: StreamId, n: usize) -> Result<()> {
        self.notify_after(|conn| conn.add_write_offset(stream_id, n))
    }

    /// Report bytes acknowledged by the peer
    pub fn add_ack_offset(&self, stream_id: StreamId, n: u64) -> Result<()> {
        self.inner.lock().add_ack_offset(stream_id, n)
    }

    /// Wait until some stream has bytes to write
    ///
    /// Fails with the connection's error once it is closed. Intended for a
    /// single writer task.
    pub async fn next_write(&self, max_vecs: usize) -> Result<StreamWrite> {
        loop {
            let result = self.inner.lock().writev_stream(max_vecs);
            match result {
                Ok(Some(write)) => return Ok(write),
                Ok(None) => {}
                Err(err) if err.code() == ErrorCode::WouldBlock => {
                    trace!("writer waiting on body sources");
                }
                Err(err) => return Err(err),
            }
            self.writable.notified().await;
        }
    }

    fn notify_after<R>(&self, f: impl FnOnce(&mut Connection<U>) -> Result<R>) -> Result<R> {
        let result = f(&mut self.inner.lock());
        if result.is_ok() {
            self.wake();
        }
        result
    }

    fn wake(&self) {
        // notify_one keeps a permit when the writer is not waiting yet
        self.writable.notify_one();
    }
}

// ============================================================================
// Tests
// ============================================================================
