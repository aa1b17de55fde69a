//! HTTP/3 Connection Management
//!
//! The connection owns every stream, the QPACK bridge and the write
//! scheduler. It never performs I/O: the caller pushes received stream bytes
//! in with [`Connection::read_stream`] and pulls serialized bytes out with
//! [`Connection::writev_stream`], reporting back what the transport accepted
//! with [`Connection::add_write_offset`]. Everything the application needs
//! to know is reported through [`Callbacks`].
//!
//! The receive path lives in `recv.rs`, submissions and the write pump in
//! `send.rs`.

mod recv;
mod send;

pub use send::StreamWrite;

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::bridge::QpackBridge;
use crate::callbacks::Callbacks;
use crate::constants::stream_type;
use crate::error::{Error, ErrorCode, H3Error, Result};
use crate::frame::{encode_varint, Frame, SettingsPayload};
use crate::scheduler::Scheduler;
use crate::stream::{ClosedStreams, Stream, StreamState, StreamType};
use crate::types::{is_bidi, Priority, Role, Settings, StreamId};

// ============================================================================
// Connection State
// ============================================================================

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is usable
    Connected,
    /// GOAWAY sent or received; existing streams finish
    Draining,
    /// A connection error occurred; every call fails
    Closed,
}

// ============================================================================
// Connection
// ============================================================================

/// HTTP/3 connection
///
/// `U` is the type of the optional per-stream user data.
pub struct Connection<U = ()> {
    /// Client or server
    role: Role,
    /// Connection state
    state: ConnectionState,
    /// Live streams
    streams: HashMap<StreamId, Stream>,
    /// Request streams that were closed or refused
    closed: ClosedStreams,
    /// Peer unidirectional streams whose type is not complete yet
    uni_prefix: HashMap<StreamId, Vec<u8>>,
    /// Ready request streams
    scheduler: Scheduler,
    /// QPACK encoder and decoder
    qpack: QpackBridge,
    /// Local settings
    local_settings: Settings,
    /// Remote settings (received from peer)
    remote_settings: Option<Settings>,
    /// Control stream ID (local)
    local_ctrl_stream_id: Option<StreamId>,
    /// QPACK encoder stream ID (local)
    local_qpack_enc_stream_id: Option<StreamId>,
    /// QPACK decoder stream ID (local)
    local_qpack_dec_stream_id: Option<StreamId>,
    /// Control stream ID (remote)
    remote_ctrl_stream_id: Option<StreamId>,
    /// QPACK encoder stream ID (remote)
    remote_qpack_enc_stream_id: Option<StreamId>,
    /// QPACK decoder stream ID (remote)
    remote_qpack_dec_stream_id: Option<StreamId>,
    /// Callbacks
    callbacks: Callbacks,
    /// Per-stream user data
    user_data: HashMap<StreamId, U>,
    /// Highest peer request stream accepted
    last_accepted_stream_id: Option<StreamId>,
    /// Id carried by the last GOAWAY we sent
    goaway_sent: Option<u64>,
    /// Id carried by the last GOAWAY we received
    goaway_received: Option<u64>,
    /// Error that closed the connection
    failure: Option<Error>,
}

impl<U> Connection<U> {
    /// Create a connection
    ///
    /// Fails with `InvalidArgument` if `settings` are self-contradictory.
    pub fn new(role: Role, callbacks: Callbacks, settings: Settings) -> Result<Self> {
        settings.validate(role)?;
        debug!(?role, "connection created");

        Ok(Self {
            role,
            state: ConnectionState::Connected,
            streams: HashMap::new(),
            closed: ClosedStreams::default(),
            uni_prefix: HashMap::new(),
            scheduler: Scheduler::new(),
            qpack: QpackBridge::new(&settings),
            local_settings: settings,
            remote_settings: None,
            local_ctrl_stream_id: None,
            local_qpack_enc_stream_id: None,
            local_qpack_dec_stream_id: None,
            remote_ctrl_stream_id: None,
            remote_qpack_enc_stream_id: None,
            remote_qpack_dec_stream_id: None,
            callbacks,
            user_data: HashMap::new(),
            last_accepted_stream_id: None,
            goaway_sent: None,
            goaway_received: None,
            failure: None,
        })
    }

    /// Create a new client connection
    pub fn client(callbacks: Callbacks, settings: Settings) -> Result<Self> {
        Self::new(Role::Client, callbacks, settings)
    }

    /// Create a new server connection
    pub fn server(callbacks: Callbacks, settings: Settings) -> Result<Self> {
        Self::new(Role::Server, callbacks, settings)
    }

    /// Client or server
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if connection is client
    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    /// Get connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a GOAWAY was sent by `shutdown` or received from the peer
    pub fn is_draining(&self) -> bool {
        self.state == ConnectionState::Draining
    }

    /// The error that closed the connection, if any
    pub fn error(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Local settings
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Settings received from the peer
    pub fn remote_settings(&self) -> Option<&Settings> {
        self.remote_settings.as_ref()
    }

    /// Local control stream
    pub fn control_stream_id(&self) -> Option<StreamId> {
        self.local_ctrl_stream_id
    }

    /// Local QPACK encoder stream
    pub fn qpack_encoder_stream_id(&self) -> Option<StreamId> {
        self.local_qpack_enc_stream_id
    }

    /// Local QPACK decoder stream
    pub fn qpack_decoder_stream_id(&self) -> Option<StreamId> {
        self.local_qpack_dec_stream_id
    }

    /// Number of live streams, including unidirectional ones
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of streams waiting on QPACK inserts
    pub fn blocked_streams(&self) -> usize {
        self.qpack.blocked_streams()
    }

    // ========================================================================
    // Stream Binding
    // ========================================================================

    fn check_local_uni(&self, stream_id: StreamId) -> Result<()> {
        if is_bidi(stream_id) || !self.role.is_local(stream_id) || self.streams.contains_key(&stream_id) {
            return Err(ErrorCode::InvalidState.into());
        }
        Ok(())
    }

    /// Bind the control stream
    ///
    /// Queues the stream type and a SETTINGS frame carrying the local
    /// settings.
    pub fn bind_control_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.check_usable()?;
        if self.local_ctrl_stream_id.is_some() {
            return Err(ErrorCode::InvalidState.into());
        }
        self.check_local_uni(stream_id)?;

        let mut stream = Stream::new(stream_id, StreamType::Control);
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, stream_type::CONTROL);
        Frame::Settings(SettingsPayload {
            settings: self.local_settings.to_wire(),
        })
        .encode(&mut buf);
        stream.queue(buf.freeze(), false);

        self.streams.insert(stream_id, stream);
        self.local_ctrl_stream_id = Some(stream_id);
        debug!(stream_id, "control stream bound");
        Ok(())
    }

    /// Bind QPACK encoder and decoder streams
    pub fn bind_qpack_streams(
        &mut self,
        encoder_stream_id: StreamId,
        decoder_stream_id: StreamId,
    ) -> Result<()> {
        self.check_usable()?;
        if self.local_qpack_enc_stream_id.is_some() || self.local_qpack_dec_stream_id.is_some() {
            return Err(ErrorCode::InvalidState.into());
        }
        if encoder_stream_id == decoder_stream_id {
            return Err(ErrorCode::InvalidState.into());
        }
        self.check_local_uni(encoder_stream_id)?;
        self.check_local_uni(decoder_stream_id)?;

        for (stream_id, kind) in [
            (encoder_stream_id, StreamType::QpackEncoder),
            (decoder_stream_id, StreamType::QpackDecoder),
        ] {
            let mut stream = Stream::new(stream_id, kind);
            let mut buf = BytesMut::new();
            if let Some(code) = kind.type_code() {
                encode_varint(&mut buf, code);
            }
            stream.queue(buf.freeze(), false);
            self.streams.insert(stream_id, stream);
        }
        self.local_qpack_enc_stream_id = Some(encoder_stream_id);
        self.local_qpack_dec_stream_id = Some(decoder_stream_id);
        debug!(encoder_stream_id, decoder_stream_id, "QPACK streams bound");

        self.flush_qpack_instructions();
        Ok(())
    }

    fn is_critical_stream(&self, stream_id: StreamId) -> bool {
        [
            self.local_ctrl_stream_id,
            self.local_qpack_enc_stream_id,
            self.local_qpack_dec_stream_id,
            self.remote_ctrl_stream_id,
            self.remote_qpack_enc_stream_id,
            self.remote_qpack_dec_stream_id,
        ]
        .contains(&Some(stream_id))
    }

    // ========================================================================
    // Stream Inspection and Control
    // ========================================================================

    /// A live request stream; a closed one is `InvalidState`, an unknown one
    /// `InvalidArgument`
    fn request_stream_mut(&mut self, stream_id: StreamId) -> Result<&mut Stream> {
        if self.closed.contains(stream_id) {
            return Err(ErrorCode::InvalidState.into());
        }
        self.streams
            .get_mut(&stream_id)
            .filter(|s| s.is_request())
            .ok_or_else(|| ErrorCode::InvalidArgument.into())
    }

    /// Current state of a stream
    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(&stream_id).map(Stream::state)
    }

    /// Change the priority of a request stream
    ///
    /// Takes effect at the next scheduling decision.
    pub fn set_stream_priority(&mut self, stream_id: StreamId, priority: Priority) -> Result<()> {
        self.check_usable()?;
        if priority.urgency > Priority::MAX_URGENCY {
            return Err(ErrorCode::InvalidArgument.into());
        }
        self.request_stream_mut(stream_id)?.priority = priority;
        Ok(())
    }

    /// Priority of a request stream
    pub fn stream_priority(&self, stream_id: StreamId) -> Result<Priority> {
        self.streams
            .get(&stream_id)
            .filter(|s| s.is_request())
            .map(|s| s.priority)
            .ok_or_else(|| ErrorCode::InvalidArgument.into())
    }

    /// Exclude a stream from scheduling (e.g. while flow control blocks it)
    pub fn block_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.check_usable()?;
        self.request_stream_mut(stream_id)?.app_blocked = true;
        self.scheduler.unschedule(stream_id);
        Ok(())
    }

    /// Return a stream excluded by [`block_stream`](Self::block_stream)
    pub fn unblock_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.check_usable()?;
        self.request_stream_mut(stream_id)?.app_blocked = false;
        self.reschedule(stream_id);
        Ok(())
    }

    /// Ask a parked body source again
    pub fn resume_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.check_usable()?;
        self.request_stream_mut(stream_id)?.parked = false;
        self.reschedule(stream_id);
        Ok(())
    }

    /// Whether a stream is waiting for `writev_stream`
    pub fn is_stream_scheduled(&self, stream_id: StreamId) -> bool {
        self.scheduler.is_scheduled(stream_id)
    }

    // ========================================================================
    // User Data
    // ========================================================================

    /// Attach user data to a live stream, replacing any previous value
    pub fn set_stream_user_data(&mut self, stream_id: StreamId, data: U) -> Result<()> {
        if !self.streams.contains_key(&stream_id) {
            return Err(ErrorCode::InvalidArgument.into());
        }
        self.user_data.insert(stream_id, data);
        Ok(())
    }

    /// User data attached to a stream
    pub fn stream_user_data(&self, stream_id: StreamId) -> Option<&U> {
        self.user_data.get(&stream_id)
    }

    /// Mutable user data attached to a stream
    pub fn stream_user_data_mut(&mut self, stream_id: StreamId) -> Option<&mut U> {
        self.user_data.get_mut(&stream_id)
    }

    /// Detach user data from a stream
    pub fn take_stream_user_data(&mut self, stream_id: StreamId) -> Option<U> {
        self.user_data.remove(&stream_id)
    }

    // ========================================================================
    // Closing Streams
    // ========================================================================

    /// Close a stream abruptly
    ///
    /// Called when the transport reports the stream reset or otherwise gone.
    /// Fires `stream_close` with `app_error_code`. Closing a critical stream
    /// is a connection error.
    pub fn close_stream(&mut self, stream_id: StreamId, app_error_code: u64) -> Result<()> {
        self.check_usable()?;
        if self.is_critical_stream(stream_id) {
            let err: Error = H3Error::ClosedCriticalStream.into();
            self.fail(err.clone());
            return Err(err);
        }
        if self.uni_prefix.remove(&stream_id).is_some() {
            return Ok(());
        }

        let Some(stream) = self.streams.get(&stream_id) else {
            return Err(ErrorCode::InvalidArgument.into());
        };
        if !stream.is_request() {
            self.streams.remove(&stream_id);
            return Ok(());
        }

        let result = self.close_with(stream_id, app_error_code);
        self.finish(result)
    }

    /// Stop reading a stream
    ///
    /// Buffered and future bytes are discarded and any QPACK state for the
    /// stream is cancelled. The receiving side counts as finished.
    pub fn shutdown_stream_read(&mut self, stream_id: StreamId) -> Result<()> {
        self.check_usable()?;
        let stream = self.request_stream_mut(stream_id)?;
        stream.read_shutdown = true;
        stream.recv_buf.clear();
        stream.qpack_blocked = false;
        stream.recv_done = true;

        self.qpack.cancel_stream(stream_id);
        let result = self.maybe_close(stream_id);
        self.finish(result)
    }

    /// Close a request stream with `code`, firing `stream_close` once
    fn close_with(&mut self, stream_id: StreamId, code: u64) -> Result<()> {
        let Some(mut stream) = self.streams.remove(&stream_id) else {
            return Ok(());
        };
        self.scheduler.unschedule(stream_id);
        self.qpack.cancel_stream(stream_id);
        self.user_data.remove(&stream_id);
        if stream.is_request() {
            self.closed.insert(stream_id);
        }

        if stream.is_request() && !stream.close_notified {
            stream.close_notified = true;
            debug!(stream_id, code, "stream closed");
            self.callbacks.stream_close(stream_id, code)?;
        }
        Ok(())
    }

    /// Close a request stream once both directions are done
    fn maybe_close(&mut self, stream_id: StreamId) -> Result<()> {
        let done = self
            .streams
            .get(&stream_id)
            .is_some_and(|s| s.is_request() && s.recv_done && s.fin_sent);
        if done {
            self.close_with(stream_id, 0)?;
        }
        Ok(())
    }

    /// Reset a stream after a stream-level error
    fn abort_stream(&mut self, stream_id: StreamId, code: u64) -> Result<()> {
        debug!(stream_id, code, "aborting stream");
        self.callbacks.stop_sending(stream_id, code)?;
        self.callbacks.reset_stream(stream_id, code)?;
        self.close_with(stream_id, code)
    }

    /// Turn an error raised while processing a request stream into its
    /// outcome: stream-level errors reset the stream, others pass through
    fn stream_error(&mut self, stream_id: StreamId, err: Error) -> Error {
        if err.is_fatal() {
            return err;
        }
        match self.abort_stream(stream_id, err.app_error_code()) {
            Ok(()) => err,
            Err(fatal) => fatal,
        }
    }

    // ========================================================================
    // Connection Errors
    // ========================================================================

    fn check_usable(&self) -> Result<()> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Record a fatal error on the way out of a public call
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fail(err.clone());
            }
        }
        result
    }

    /// Stop the connection: every open request stream is closed with the
    /// error's application code and all later calls return `err`
    fn fail(&mut self, err: Error) {
        if self.failure.is_some() {
            return;
        }
        let code = err.app_error_code();
        warn!(error = %err, code, "connection error");
        self.failure = Some(err);
        self.state = ConnectionState::Closed;

        let mut open: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.is_request() && !s.close_notified)
            .map(|s| s.id)
            .collect();
        open.sort_unstable();
        for stream_id in open {
            // The connection is already gone; a failing callback changes nothing
            let _ = self.callbacks.stream_close(stream_id, code);
        }

        self.streams.clear();
        self.scheduler = Scheduler::new();
        self.user_data.clear();
    }
}

impl<U> std::fmt::Debug for Connection<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("streams", &self.streams.len())
            .field("scheduled", &self.scheduler.len())
            .field("closed_out_of_order", &self.closed.pending())
            .field("remote_settings", &self.remote_settings)
            .field("failure", &self.failure)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
