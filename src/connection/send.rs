//! Submissions and the write pump
//!
//! Submitted header sections are compressed immediately and queued as
//! serialized HEADERS frames. Bodies come either from a [`DataProvider`]
//! pulled inside `writev_stream`, or from explicit `submit_data` calls.
//! `writev_stream` never consumes queued bytes itself; they stay queued until
//! the caller reports them written with `add_write_offset`.
//!
//! [`DataProvider`]: crate::data::DataProvider

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::{Connection, ConnectionState};
use crate::constants::{defaults, limits};
use crate::data::{BoxedProvider, DataFlags, Read};
use crate::error::{CallbackFailure, ErrorCode, Result};
use crate::frame::{Frame, FrameHeader, FrameType, GoawayPayload, HeadersPayload};
use crate::stream::Stream;
use crate::types::{is_client_bidi, Nv, Role, StreamId};

/// Bytes `writev_stream` wants written to one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWrite {
    /// Stream to write to
    pub stream_id: StreamId,
    /// Whether the stream ends after `vecs`
    pub fin: bool,
    /// Data to write, in order
    pub vecs: Vec<Bytes>,
}

impl StreamWrite {
    /// Total number of bytes in `vecs`
    pub fn len(&self) -> usize {
        self.vecs.iter().map(Bytes::len).sum()
    }

    /// Whether there are no bytes (a bare fin)
    pub fn is_empty(&self) -> bool {
        self.vecs.iter().all(Bytes::is_empty)
    }
}

/// Outcome of asking a body source for more
enum Pull {
    Ready,
    Parked,
}

/// Look for `:status` and `:method` in a header list
fn pseudo_value<'a>(headers: &[Nv<'a>], name: &[u8]) -> Option<&'a [u8]> {
    headers.iter().find(|nv| nv.name == name).map(|nv| nv.value)
}

/// Install a body source, or finish the sending side when there is none
fn attach_body(stream: &mut Stream, body: Option<BoxedProvider>) {
    match body {
        Some(provider) if provider.is_push() => {}
        Some(provider) => stream.provider = Some(provider),
        None => stream.send_finished = true,
    }
}

fn headers_frame(block: Bytes) -> Bytes {
    Frame::Headers(HeadersPayload { header_block: block }).to_bytes()
}

impl<U> Connection<U> {
    // ========================================================================
    // Submissions
    // ========================================================================

    /// Submit a request on a client bidirectional stream
    ///
    /// Without `body` the stream is finished right after the headers.
    pub fn submit_request(
        &mut self,
        stream_id: StreamId,
        headers: &[Nv<'_>],
        body: Option<BoxedProvider>,
    ) -> Result<()> {
        self.check_usable()?;
        if self.role != Role::Client {
            return Err(ErrorCode::InvalidState.into());
        }
        if !is_client_bidi(stream_id) {
            return Err(ErrorCode::InvalidArgument.into());
        }
        if self.streams.contains_key(&stream_id) {
            return Err(ErrorCode::StreamInUse.into());
        }
        if self.closed.contains(stream_id) {
            return Err(ErrorCode::InvalidState.into());
        }
        if self.state == ConnectionState::Draining
            && self.goaway_received.map_or(true, |goaway| stream_id as u64 >= goaway)
        {
            return Err(ErrorCode::InvalidState.into());
        }

        let block = self.qpack.encode(stream_id, headers)?;

        let mut stream = Stream::request(stream_id);
        stream.queue(headers_frame(block), false);
        stream.headers_sent = true;
        stream.bodyless = pseudo_value(headers, b":method") == Some(b"HEAD".as_slice());
        attach_body(&mut stream, body);
        self.streams.insert(stream_id, stream);
        self.reschedule(stream_id);
        debug!(stream_id, "request submitted");
        Ok(())
    }

    /// Submit a response on a request stream
    ///
    /// An informational (1xx) response may precede the final one; it cannot
    /// carry a body.
    pub fn submit_response(
        &mut self,
        stream_id: StreamId,
        headers: &[Nv<'_>],
        body: Option<BoxedProvider>,
    ) -> Result<()> {
        self.check_usable()?;
        if self.role != Role::Server {
            return Err(ErrorCode::InvalidState.into());
        }

        let interim = pseudo_value(headers, b":status")
            .is_some_and(|status| status.len() == 3 && status[0] == b'1' && status != b"101");
        if interim && body.is_some() {
            return Err(ErrorCode::InvalidArgument.into());
        }

        let stream = self.request_stream_mut(stream_id)?;
        if stream.headers_sent {
            return Err(ErrorCode::StreamInUse.into());
        }
        if stream.send_finished {
            return Err(ErrorCode::InvalidState.into());
        }

        let block = self.qpack.encode(stream_id, headers)?;
        let stream = self.request_stream_mut(stream_id)?;
        stream.queue(headers_frame(block), false);
        if !interim {
            stream.headers_sent = true;
            attach_body(stream, body);
        }
        self.reschedule(stream_id);
        debug!(stream_id, interim, "response submitted");
        Ok(())
    }

    /// Submit trailers
    ///
    /// If a body source is still active, the trailers follow its last chunk.
    pub fn submit_trailers(&mut self, stream_id: StreamId, trailers: &[Nv<'_>]) -> Result<()> {
        self.check_usable()?;
        let stream = self.request_stream_mut(stream_id)?;
        if !stream.headers_sent
            || stream.send_finished
            || stream.trailers_sent
            || stream.pending_trailers.is_some()
        {
            return Err(ErrorCode::InvalidState.into());
        }

        let block = self.qpack.encode(stream_id, trailers)?;
        let frame = headers_frame(block);
        let stream = self.request_stream_mut(stream_id)?;
        if stream.provider.is_some() {
            stream.pending_trailers = Some(frame);
        } else {
            stream.queue(frame, false);
            stream.trailers_sent = true;
            stream.send_finished = true;
        }
        self.reschedule(stream_id);
        trace!(stream_id, "trailers submitted");
        Ok(())
    }

    /// Queue body bytes on a stream that has no body source
    ///
    /// The stream must have been submitted with a [`PushBody`].
    ///
    /// [`PushBody`]: crate::data::PushBody
    pub fn submit_data(&mut self, stream_id: StreamId, data: impl Into<Bytes>, fin: bool) -> Result<()> {
        self.check_usable()?;
        let stream = self.request_stream_mut(stream_id)?;
        if !stream.headers_sent || stream.send_finished || stream.provider.is_some() {
            return Err(ErrorCode::InvalidState.into());
        }

        queue_data(stream, data.into());
        if fin {
            stream.send_finished = true;
        }
        self.reschedule(stream_id);
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Start a graceful shutdown
    ///
    /// Queues GOAWAY with the first request stream id that will not be
    /// processed (a client sends push id 0) and marks the connection
    /// draining. The id never grows past one sent earlier.
    pub fn shutdown(&mut self) -> Result<()> {
        self.check_usable()?;
        let id = match self.role {
            Role::Server => self
                .last_accepted_stream_id
                .map_or(0, |last| last as u64 + 4),
            Role::Client => 0,
        };
        let id = self.goaway_sent.map_or(id, |prev| prev.min(id));

        self.send_goaway(id)?;
        self.state = ConnectionState::Draining;
        Ok(())
    }

    /// Announce an upcoming shutdown without refusing anything yet
    ///
    /// Sends GOAWAY with the largest possible id; a later
    /// [`shutdown`](Self::shutdown) carries the real one.
    pub fn submit_shutdown_notice(&mut self) -> Result<()> {
        self.check_usable()?;
        let id = match self.role {
            Role::Server => limits::MAX_CLIENT_BIDI_STREAM_ID,
            Role::Client => limits::MAX_VARINT,
        };
        let id = self.goaway_sent.map_or(id, |prev| prev.min(id));
        self.send_goaway(id)
    }

    fn send_goaway(&mut self, id: u64) -> Result<()> {
        let stream = self
            .local_ctrl_stream_id
            .and_then(|ctrl| self.streams.get_mut(&ctrl))
            .ok_or(ErrorCode::InvalidState)?;
        stream.queue(Frame::Goaway(GoawayPayload { id }).to_bytes(), false);
        self.goaway_sent = Some(id);
        debug!(id, "GOAWAY queued");
        Ok(())
    }

    // ========================================================================
    // Write Pump
    // ========================================================================

    /// Move pending QPACK instructions onto the local instruction streams
    pub(super) fn flush_qpack_instructions(&mut self) {
        if let Some(stream_id) = self.local_qpack_enc_stream_id {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                if let Some(bytes) = self.qpack.take_encoder_instructions() {
                    stream.queue(bytes, false);
                }
            }
        }
        if let Some(stream_id) = self.local_qpack_dec_stream_id {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                if let Some(bytes) = self.qpack.take_decoder_instructions() {
                    stream.queue(bytes, false);
                }
            }
        }
    }

    /// Put a request stream in or out of the scheduler to match its readiness
    pub(super) fn reschedule(&mut self, stream_id: StreamId) {
        match self.streams.get(&stream_id) {
            Some(stream) if stream.is_request() && stream.is_ready() => {
                self.scheduler.schedule(stream_id, stream.priority);
            }
            _ => self.scheduler.unschedule(stream_id),
        }
    }

    /// Next batch of bytes to hand to the transport
    ///
    /// Returns `Ok(None)` when nothing is ready, and `Err(WouldBlock)` when
    /// the only candidates were body sources with no data yet; those streams
    /// are parked until [`resume_stream`](Self::resume_stream).
    pub fn writev_stream(&mut self, max_vecs: usize) -> Result<Option<StreamWrite>> {
        self.check_usable()?;
        if max_vecs == 0 {
            return Err(ErrorCode::InvalidArgument.into());
        }
        let result = self.writev_inner(max_vecs);
        self.finish(result)
    }

    fn writev_inner(&mut self, max_vecs: usize) -> Result<Option<StreamWrite>> {
        self.flush_qpack_instructions();

        let critical = [
            self.local_ctrl_stream_id,
            self.local_qpack_enc_stream_id,
            self.local_qpack_dec_stream_id,
        ];
        for stream_id in critical.into_iter().flatten() {
            if let Some(stream) = self.streams.get(&stream_id).filter(|s| s.has_queued()) {
                let (vecs, _) = stream.peek_chunks(max_vecs);
                trace!(stream_id, len = vecs.len(), "critical stream write");
                return Ok(Some(StreamWrite {
                    stream_id,
                    fin: false,
                    vecs,
                }));
            }
        }

        let mut parked = false;
        loop {
            let streams = &self.streams;
            let next = self.scheduler.next(|id| {
                streams
                    .get(&id)
                    .filter(|s| s.is_ready())
                    .map(|s| s.priority)
            });
            let Some(stream_id) = next else {
                break;
            };

            let needs_pull = self
                .streams
                .get(&stream_id)
                .is_some_and(|s| !s.has_queued() && s.can_pull());
            if needs_pull {
                if let Pull::Parked = self.pull(stream_id)? {
                    trace!(stream_id, "body source would block");
                    parked = true;
                    self.scheduler.unschedule(stream_id);
                    continue;
                }
            }

            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            let (vecs, all) = stream.peek_chunks(max_vecs);
            let fin = all && stream.send_finished;
            if vecs.is_empty() && !fin {
                self.scheduler.unschedule(stream_id);
                continue;
            }
            if fin {
                stream.fin_pending = true;
            }
            let incremental = stream.priority.inc;
            let urgency = stream.priority.urgency;

            if incremental {
                self.scheduler.rotate(stream_id);
            }
            self.reschedule(stream_id);
            trace!(stream_id, urgency, incremental, fin, "stream write");
            return Ok(Some(StreamWrite {
                stream_id,
                fin,
                vecs,
            }));
        }

        if parked {
            return Err(ErrorCode::WouldBlock.into());
        }
        Ok(None)
    }

    /// Ask a stream's body source for the next chunk
    fn pull(&mut self, stream_id: StreamId) -> Result<Pull> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(Pull::Ready);
        };
        let Some(provider) = stream.provider.as_mut() else {
            return Ok(Pull::Ready);
        };

        let read = provider
            .read_data(stream_id, defaults::WRITE_QUANTUM)
            .map_err(|CallbackFailure| ErrorCode::CallbackFailure)?;
        let (data, flags) = match read {
            Read::WouldBlock => {
                stream.parked = true;
                return Ok(Pull::Parked);
            }
            Read::Data { data, flags } => (data, flags),
        };

        let eof = flags.contains(DataFlags::EOF);
        if data.is_empty() && !eof {
            stream.parked = true;
            return Ok(Pull::Parked);
        }
        queue_data(stream, data);

        if eof {
            stream.provider = None;
            if let Some(trailers) = stream.pending_trailers.take() {
                stream.queue(trailers, false);
                stream.trailers_sent = true;
                stream.send_finished = true;
            } else if !flags.contains(DataFlags::NO_END_STREAM) {
                stream.send_finished = true;
            }
        }
        Ok(Pull::Ready)
    }

    /// The transport accepted `n` bytes of what `writev_stream` returned
    pub fn add_write_offset(&mut self, stream_id: StreamId, n: usize) -> Result<()> {
        self.check_usable()?;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(ErrorCode::InvalidArgument.into());
        };
        stream.advance_write(n)?;
        if stream.fin_sent {
            trace!(stream_id, "local side finished");
        }

        self.reschedule(stream_id);
        let result = self.maybe_close(stream_id);
        self.finish(result)
    }

    /// The peer acknowledged `n` more bytes of a stream
    ///
    /// Fires `acked_stream_data` with the body bytes among them. Unknown or
    /// closed streams are ignored.
    pub fn add_ack_offset(&mut self, stream_id: StreamId, n: u64) -> Result<()> {
        self.check_usable()?;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let acked = stream.advance_ack(n);
        if acked == 0 {
            return Ok(());
        }
        let result = self
            .callbacks
            .acked_stream_data(stream_id, acked)
            .map_err(Into::into);
        self.finish(result)
    }
}

/// Queue a DATA frame
fn queue_data(stream: &mut Stream, data: Bytes) {
    if data.is_empty() {
        return;
    }
    let mut header = BytesMut::with_capacity(16);
    FrameHeader::new(FrameType::Data, data.len() as u64).encode(&mut header);
    stream.queue(header.freeze(), false);
    stream.queue(data, true);
}
