//! HTTP/3 Stream Management
//!
//! Per-stream state for request streams and the unidirectional control and
//! QPACK streams: inbound buffering and frame progress, the outbound queue
//! of serialized chunks, the pull-based body source, and the bookkeeping
//! needed to report acknowledged body bytes.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::stream_type;
use crate::data::BoxedProvider;
use crate::error::{ErrorCode, Result};
use crate::types::{is_bidi, Priority, StreamId};

// ============================================================================
// Stream Type
// ============================================================================

/// HTTP/3 stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Request stream (bidirectional)
    Request,
    /// Control stream
    Control,
    /// Push stream (unidirectional, server-initiated)
    Push,
    /// QPACK encoder stream
    QpackEncoder,
    /// QPACK decoder stream
    QpackDecoder,
    /// Unknown unidirectional stream
    Unknown(u64),
}

impl StreamType {
    /// Get the stream type code for unidirectional streams
    pub fn type_code(&self) -> Option<u64> {
        match self {
            StreamType::Control => Some(stream_type::CONTROL),
            StreamType::Push => Some(stream_type::PUSH),
            StreamType::QpackEncoder => Some(stream_type::QPACK_ENCODER),
            StreamType::QpackDecoder => Some(stream_type::QPACK_DECODER),
            StreamType::Unknown(code) => Some(*code),
            StreamType::Request => None,
        }
    }

    /// Create from stream type code
    pub fn from_code(code: u64) -> Self {
        match code {
            stream_type::CONTROL => StreamType::Control,
            stream_type::PUSH => StreamType::Push,
            stream_type::QPACK_ENCODER => StreamType::QpackEncoder,
            stream_type::QPACK_DECODER => StreamType::QpackDecoder,
            other => StreamType::Unknown(other),
        }
    }

    /// Check if this is a critical stream type
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StreamType::Control | StreamType::QpackEncoder | StreamType::QpackDecoder
        )
    }
}

// ============================================================================
// Stream State
// ============================================================================

/// Externally visible stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No header section received yet
    Idle,
    /// A HEADERS frame arrived but is waiting on QPACK inserts
    HeadersPending,
    /// The header section was delivered; no body yet
    HeadersReceived,
    /// Body data is flowing
    Body,
    /// Local side finished sending
    HalfClosedLocal,
    /// Peer finished sending
    HalfClosedRemote,
    /// Both sides finished, or the stream was closed abruptly
    Closed,
    /// A unidirectional stream in use
    Open,
}

/// What the next HEADERS frame on a request stream would be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPhase {
    /// Waiting for the (final) header section
    Headers,
    /// Header section delivered; DATA or trailers may follow
    Body,
    /// Trailers delivered; nothing else may follow
    Done,
}

/// Frame payload currently being streamed through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Payload {
    /// Between frames
    None,
    /// Inside a DATA frame with this many bytes left
    Data(u64),
    /// Inside an ignored frame with this many bytes left
    Skip(u64),
}

/// One serialized piece of outbound data
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub data: Bytes,
    /// Body payload (counted for `acked_stream_data`)
    pub body: bool,
}

// ============================================================================
// Stream
// ============================================================================

/// An HTTP/3 stream
pub(crate) struct Stream {
    /// Stream ID
    pub id: StreamId,
    /// Stream type
    pub kind: StreamType,
    /// Priority
    pub priority: Priority,

    // -- inbound --
    /// Bytes received but not yet processed
    pub recv_buf: BytesMut,
    pub phase: ReadPhase,
    pub body_seen: bool,
    pub payload: Payload,
    /// A HEADERS frame at the head of `recv_buf` waits on QPACK inserts
    pub qpack_blocked: bool,
    /// The transport delivered the fin
    pub fin_received: bool,
    /// `end_stream` fired
    pub recv_done: bool,
    /// Inbound bytes are discarded
    pub read_shutdown: bool,
    /// Declared `content-length` of the incoming message
    pub content_length: Option<u64>,
    /// DATA payload bytes received
    pub data_received: u64,
    /// The message carries no content whatever `content-length` says
    /// (response to HEAD, or 304)
    pub bodyless: bool,

    // -- outbound --
    outq: VecDeque<Chunk>,
    pub provider: Option<BoxedProvider>,
    /// Body source reported would-block
    pub parked: bool,
    /// Application excluded the stream from scheduling
    pub app_blocked: bool,
    pub headers_sent: bool,
    pub trailers_sent: bool,
    /// Trailer frame waiting for the body source to finish
    pub pending_trailers: Option<Bytes>,
    /// Nothing more will be queued; the fin follows the queue
    pub send_finished: bool,
    /// The fin was handed out by `writev_stream`
    pub fin_pending: bool,
    /// The transport accepted the fin
    pub fin_sent: bool,
    write_offset: u64,
    ack_offset: u64,
    /// Stream offsets of body bytes written but not yet acknowledged
    body_ranges: VecDeque<(u64, u64)>,

    /// `stream_close` already fired
    pub close_notified: bool,
}

impl Stream {
    /// Create a new stream
    pub fn new(id: StreamId, kind: StreamType) -> Self {
        Self {
            id,
            kind,
            priority: Priority::default(),
            recv_buf: BytesMut::new(),
            phase: ReadPhase::Headers,
            body_seen: false,
            payload: Payload::None,
            qpack_blocked: false,
            fin_received: false,
            recv_done: false,
            read_shutdown: false,
            content_length: None,
            data_received: 0,
            bodyless: false,
            outq: VecDeque::new(),
            provider: None,
            parked: false,
            app_blocked: false,
            headers_sent: false,
            trailers_sent: false,
            pending_trailers: None,
            send_finished: false,
            fin_pending: false,
            fin_sent: false,
            write_offset: 0,
            ack_offset: 0,
            body_ranges: VecDeque::new(),
            close_notified: false,
        }
    }

    /// Create a request stream
    pub fn request(id: StreamId) -> Self {
        Self::new(id, StreamType::Request)
    }

    /// Whether this is a request stream
    pub fn is_request(&self) -> bool {
        self.kind == StreamType::Request && is_bidi(self.id)
    }

    /// Derived state
    pub fn state(&self) -> StreamState {
        if self.close_notified {
            return StreamState::Closed;
        }
        if !self.is_request() {
            return StreamState::Open;
        }
        match (self.recv_done, self.fin_sent) {
            (true, true) => return StreamState::Closed,
            (true, false) => return StreamState::HalfClosedRemote,
            (false, true) => return StreamState::HalfClosedLocal,
            (false, false) => {}
        }
        if self.qpack_blocked {
            return StreamState::HeadersPending;
        }
        match self.phase {
            ReadPhase::Headers => StreamState::Idle,
            ReadPhase::Body if !self.body_seen => StreamState::HeadersReceived,
            _ => StreamState::Body,
        }
    }

    // ========================================================================
    // Outbound Queue
    // ========================================================================

    /// Queue serialized bytes
    pub fn queue(&mut self, data: Bytes, body: bool) {
        if !data.is_empty() {
            self.outq.push_back(Chunk { data, body });
        }
    }

    /// Whether serialized bytes are waiting
    pub fn has_queued(&self) -> bool {
        !self.outq.is_empty()
    }

    /// Number of queued bytes
    pub fn queued_len(&self) -> usize {
        self.outq.iter().map(|c| c.data.len()).sum()
    }

    /// Up to `max` queued chunks, in order
    pub fn peek_chunks(&self, max: usize) -> (Vec<Bytes>, bool) {
        let vecs: Vec<Bytes> = self.outq.iter().take(max).map(|c| c.data.clone()).collect();
        let all = vecs.len() == self.outq.len();
        (vecs, all)
    }

    /// Whether the body source can be asked for more
    pub fn can_pull(&self) -> bool {
        self.provider.is_some() && !self.parked && !self.send_finished
    }

    /// Whether `writev_stream` has something to do for this stream
    pub fn is_ready(&self) -> bool {
        if self.app_blocked || self.fin_sent {
            return false;
        }
        self.has_queued() || self.can_pull() || (self.send_finished && !self.fin_pending)
    }

    /// The transport accepted `n` bytes from the head of the queue
    pub fn advance_write(&mut self, mut n: usize) -> Result<()> {
        if n > self.queued_len() {
            return Err(ErrorCode::InvalidArgument.into());
        }

        while n > 0 {
            let Some(front) = self.outq.front_mut() else {
                break;
            };
            let take = n.min(front.data.len());
            if front.body {
                let start = self.write_offset;
                let end = start + take as u64;
                match self.body_ranges.back_mut() {
                    Some(last) if last.1 == start => last.1 = end,
                    _ => self.body_ranges.push_back((start, end)),
                }
            }
            front.data.advance(take);
            if front.data.is_empty() {
                self.outq.pop_front();
            }
            self.write_offset += take as u64;
            n -= take;
        }

        if self.fin_pending && self.outq.is_empty() {
            self.fin_sent = true;
        }
        Ok(())
    }

    /// The peer acknowledged `n` more bytes; returns the body bytes among them
    pub fn advance_ack(&mut self, n: u64) -> u64 {
        let end = (self.ack_offset + n).min(self.write_offset);
        let start = self.ack_offset;
        self.ack_offset = end;

        let mut acked = 0;
        while let Some(range) = self.body_ranges.front_mut() {
            if range.0 >= end {
                break;
            }
            let from = range.0.max(start);
            let to = range.1.min(end);
            acked += to.saturating_sub(from);
            if range.1 <= end {
                self.body_ranges.pop_front();
            } else {
                range.0 = end;
                break;
            }
        }
        acked
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("priority", &self.priority)
            .field("buffered", &self.recv_buf.len())
            .field("queued", &self.queued_len())
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

// ============================================================================
// Closed Request Streams
// ============================================================================

/// Request stream ids that are closed for good
///
/// Every id below `floor` is closed. Closed ids above it are kept one by one
/// until the gaps below them close, so the set only holds ids that finished
/// out of order.
#[derive(Debug, Default)]
pub(crate) struct ClosedStreams {
    floor: StreamId,
    above: BTreeSet<StreamId>,
}

impl ClosedStreams {
    /// Mark a request stream id closed
    pub fn insert(&mut self, id: StreamId) {
        if id < self.floor {
            return;
        }
        self.above.insert(id);
        while self.above.remove(&self.floor) {
            self.floor += 4;
        }
    }

    /// Whether a request stream id was closed
    pub fn contains(&self, id: StreamId) -> bool {
        id < self.floor || self.above.contains(&id)
    }

    /// Closed ids still tracked individually
    pub fn pending(&self) -> usize {
        self.above.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
