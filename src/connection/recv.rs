//! Receive path
//!
//! Bytes handed to `read_stream` are appended to the stream's buffer and
//! parsed frame by frame. DATA payloads are streamed straight to `recv_data`;
//! every other frame is processed only once it is complete. A request stream
//! whose HEADERS frame waits on QPACK inserts keeps that frame and everything
//! behind it buffered until the encoder stream delivers the inserts.

use bytes::Buf;
use tracing::{debug, trace};

use super::{Connection, ConnectionState};
use crate::constants::{defaults, h3_error};
use crate::error::{Error, ErrorCode, H3Error, Result};
use crate::frame::{try_decode_varint, Frame, FrameHeader, FrameType};
use crate::http::{SectionCheck, SectionKind};
use crate::qpack::Decoded;
use crate::stream::{Payload, ReadPhase, Stream, StreamType};
use crate::types::{is_bidi, is_client_bidi, HeaderField, Role, Settings, StreamId};

/// Longest possible encoded section prefix (two 10-byte integers)
const SECTION_PREFIX_MAX: u64 = 20;

/// Largest HEADERS payload that can still decode within `max_section`
///
/// A field line never encodes to more than four times its counted size:
/// the longest Huffman code is 30 bits and every field counts 32 bytes of
/// overhead.
fn header_block_limit(max_section: u64) -> u64 {
    max_section.saturating_mul(4).saturating_add(SECTION_PREFIX_MAX)
}

/// Bytes left of a payload after taking `n`
fn remaining_after(remaining: u64, n: usize, payload: fn(u64) -> Payload) -> Payload {
    match remaining - n as u64 {
        0 => Payload::None,
        left => payload(left),
    }
}

impl<U> Connection<U> {
    /// Process bytes received on a stream
    ///
    /// Returns the number of bytes the connection consumed on its own
    /// account. DATA payload handed to `recv_data` is not included, and
    /// neither are bytes still buffered behind an incomplete frame or a
    /// QPACK-blocked header block; the latter are reported later through
    /// `deferred_consume` once processed.
    pub fn read_stream(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<usize> {
        self.check_usable()?;
        let result = if is_bidi(stream_id) {
            self.read_bidi(stream_id, data, fin)
        } else {
            self.read_uni(stream_id, data, fin)
        };
        self.finish(result)
    }

    // ========================================================================
    // Request Streams
    // ========================================================================

    fn read_bidi(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<usize> {
        if !self.streams.contains_key(&stream_id) {
            if self.role.is_local(stream_id) || self.closed.contains(stream_id) {
                trace!(stream_id, len = data.len(), "data for closed stream ignored");
                return Ok(data.len());
            }
            if self.role == Role::Client {
                return Err(H3Error::StreamCreationError.into());
            }
            if self.refuses_new_streams(stream_id) {
                debug!(stream_id, "request rejected while draining");
                self.closed.insert(stream_id);
                self.callbacks.stop_sending(stream_id, h3_error::H3_REQUEST_REJECTED)?;
                self.callbacks.reset_stream(stream_id, h3_error::H3_REQUEST_REJECTED)?;
                return Ok(data.len());
            }

            self.streams.insert(stream_id, Stream::request(stream_id));
            self.last_accepted_stream_id = self.last_accepted_stream_id.max(Some(stream_id));
            debug!(stream_id, "request stream opened");
        }

        let blocked_limit = header_block_limit(self.local_settings.max_field_section_size)
            .saturating_add(defaults::MAX_BLOCKED_BUFFER);
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(data.len());
        };
        if stream.read_shutdown || stream.recv_done {
            return Ok(data.len());
        }
        stream.recv_buf.extend_from_slice(data);
        if fin {
            stream.fin_received = true;
        }

        let result = if stream.qpack_blocked && stream.recv_buf.len() as u64 > blocked_limit {
            debug!(stream_id, buffered = stream.recv_buf.len(), "too much data behind blocked headers");
            Err(H3Error::ExcessiveLoad.into())
        } else {
            self.process_request(stream_id)
        };
        result.map_err(|err| self.stream_error(stream_id, err))
    }

    /// A draining server refuses requests at or above its GOAWAY id
    fn refuses_new_streams(&self, stream_id: StreamId) -> bool {
        self.state == ConnectionState::Draining
            && self
                .goaway_sent
                .is_some_and(|goaway| stream_id as u64 >= goaway)
    }

    fn process_request(&mut self, stream_id: StreamId) -> Result<usize> {
        let consumed = self.process_request_frames(stream_id)?;
        self.check_request_fin(stream_id)?;
        Ok(consumed)
    }

    fn process_request_frames(&mut self, stream_id: StreamId) -> Result<usize> {
        let header_limit = header_block_limit(self.local_settings.max_field_section_size);
        let mut consumed = 0;

        loop {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                break;
            };
            if stream.qpack_blocked || stream.read_shutdown || stream.recv_buf.is_empty() {
                break;
            }

            match stream.payload {
                Payload::Data(remaining) => {
                    let n = remaining.min(stream.recv_buf.len() as u64) as usize;
                    let chunk = stream.recv_buf.split_to(n).freeze();
                    stream.payload = remaining_after(remaining, n, Payload::Data);
                    stream.data_received += n as u64;
                    if let Some(length) = stream.content_length {
                        if !stream.bodyless && stream.data_received > length {
                            return Err(ErrorCode::MalformedHttpMessaging.into());
                        }
                    }
                    self.callbacks.recv_data(stream_id, &chunk)?;
                    continue;
                }
                Payload::Skip(remaining) => {
                    let n = remaining.min(stream.recv_buf.len() as u64) as usize;
                    stream.recv_buf.advance(n);
                    stream.payload = remaining_after(remaining, n, Payload::Skip);
                    consumed += n;
                    continue;
                }
                Payload::None => {}
            }

            let Some((header, header_len)) = FrameHeader::decode(&stream.recv_buf)? else {
                break;
            };
            trace!(stream_id, frame_type = ?header.frame_type, length = header.length, "frame");

            match header.frame_type {
                FrameType::Data => {
                    if stream.phase != ReadPhase::Body {
                        return Err(H3Error::FrameUnexpected.into());
                    }
                    stream.recv_buf.advance(header_len);
                    consumed += header_len;
                    stream.body_seen = true;
                    if header.length > 0 {
                        stream.payload = Payload::Data(header.length);
                    }
                }
                FrameType::Headers => {
                    if stream.phase == ReadPhase::Done {
                        return Err(H3Error::FrameUnexpected.into());
                    }
                    if header.length > header_limit {
                        return Err(H3Error::ExcessiveLoad.into());
                    }
                    let total = usize::try_from(header.length)
                        .ok()
                        .and_then(|len| len.checked_add(header_len))
                        .ok_or(ErrorCode::QpackHeaderTooLarge)?;
                    if stream.recv_buf.len() < total {
                        break;
                    }

                    match self.qpack.decode(stream_id, &stream.recv_buf[header_len..total])? {
                        Decoded::Blocked => {
                            stream.qpack_blocked = true;
                            debug!(stream_id, "header block waits on QPACK inserts");
                            break;
                        }
                        Decoded::Fields(fields) => {
                            stream.recv_buf.advance(total);
                            consumed += total;
                            self.deliver_section(stream_id, &fields)?;
                        }
                    }
                }
                // No MAX_PUSH_ID is ever sent, so every push id is out of range
                FrameType::PushPromise if self.role == Role::Client => {
                    return Err(H3Error::IdError.into());
                }
                FrameType::Unknown(_) if !header.frame_type.is_reserved_h2() => {
                    stream.recv_buf.advance(header_len);
                    consumed += header_len;
                    if header.length > 0 {
                        stream.payload = Payload::Skip(header.length);
                    }
                }
                _ => return Err(H3Error::FrameUnexpected.into()),
            }
        }

        Ok(consumed)
    }

    /// Hand a decoded header or trailer section to the application
    fn deliver_section(&mut self, stream_id: StreamId, fields: &[HeaderField]) -> Result<()> {
        let role = self.role;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let trailers = stream.phase == ReadPhase::Body;
        let fin = stream.recv_buf.is_empty() && stream.fin_received;

        let kind = match (trailers, role) {
            (true, _) => SectionKind::Trailers,
            (false, Role::Server) => SectionKind::Request,
            (false, Role::Client) => SectionKind::Response,
        };
        let mut check = SectionCheck::new(kind);

        if trailers {
            self.callbacks.begin_trailers(stream_id)?;
            for field in fields {
                check.field(field)?;
                self.callbacks.recv_trailer(stream_id, field)?;
            }
            check.finish()?;
            stream.phase = ReadPhase::Done;
            return self.callbacks.end_trailers(stream_id, fin).map_err(Error::from);
        }

        self.callbacks.begin_headers(stream_id)?;
        for field in fields {
            check.field(field)?;
            self.callbacks.recv_header(stream_id, field)?;
        }
        let summary = check.finish()?;

        if role == Role::Client && summary.is_interim() {
            trace!(stream_id, status = ?summary.status, "interim response");
            return self.callbacks.end_headers(stream_id, false).map_err(Error::from);
        }

        stream.phase = ReadPhase::Body;
        stream.content_length = summary.content_length;
        if summary.status == Some(304) {
            stream.bodyless = true;
        }
        self.callbacks.end_headers(stream_id, fin).map_err(Error::from)
    }

    /// Finish the receiving side once the fin and every byte before it
    /// were processed
    fn check_request_fin(&mut self, stream_id: StreamId) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        if !stream.fin_received || stream.recv_done || stream.qpack_blocked || stream.read_shutdown {
            return Ok(());
        }

        if !stream.recv_buf.is_empty() || stream.payload != Payload::None {
            return Err(H3Error::FrameError.into());
        }
        if stream.phase == ReadPhase::Headers {
            return Err(ErrorCode::MalformedHttpMessaging.into());
        }
        if let Some(length) = stream.content_length {
            if !stream.bodyless && length != stream.data_received {
                return Err(ErrorCode::MalformedHttpMessaging.into());
            }
        }

        stream.recv_done = true;
        trace!(stream_id, "remote side finished");
        self.callbacks.end_stream(stream_id)?;
        self.maybe_close(stream_id)
    }

    /// Redeliver streams released by new dynamic table inserts
    fn process_unblocked(&mut self) -> Result<()> {
        for stream_id in self.qpack.take_unblocked() {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            stream.qpack_blocked = false;

            match self.process_request(stream_id) {
                Ok(0) => {}
                Ok(consumed) => self.callbacks.deferred_consume(stream_id, consumed)?,
                Err(err) => {
                    let err = self.stream_error(stream_id, err);
                    if err.is_fatal() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Unidirectional Streams
    // ========================================================================

    fn read_uni(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<usize> {
        if self.role.is_local(stream_id) {
            return Err(H3Error::StreamCreationError.into());
        }

        if self.streams.contains_key(&stream_id) {
            self.dispatch_uni(stream_id, data, fin)?;
            return Ok(data.len());
        }

        let mut prefix = self.uni_prefix.remove(&stream_id).unwrap_or_default();
        prefix.extend_from_slice(data);
        let Some((code, type_len)) = try_decode_varint(&prefix) else {
            if !fin {
                self.uni_prefix.insert(stream_id, prefix);
            }
            return Ok(data.len());
        };

        self.open_remote_uni(stream_id, StreamType::from_code(code))?;
        self.dispatch_uni(stream_id, &prefix[type_len..], fin)?;
        Ok(data.len())
    }

    fn open_remote_uni(&mut self, stream_id: StreamId, kind: StreamType) -> Result<()> {
        let slot = match kind {
            StreamType::Control => &mut self.remote_ctrl_stream_id,
            StreamType::QpackEncoder => &mut self.remote_qpack_enc_stream_id,
            StreamType::QpackDecoder => &mut self.remote_qpack_dec_stream_id,
            StreamType::Push if self.role == Role::Client => {
                return Err(H3Error::IdError.into());
            }
            StreamType::Push | StreamType::Request => {
                return Err(H3Error::StreamCreationError.into());
            }
            StreamType::Unknown(code) => {
                trace!(stream_id, code, "unknown stream type ignored");
                let mut stream = Stream::new(stream_id, kind);
                stream.read_shutdown = true;
                self.streams.insert(stream_id, stream);
                self.callbacks
                    .stop_sending(stream_id, h3_error::H3_STREAM_CREATION_ERROR)?;
                return Ok(());
            }
        };

        if slot.is_some() {
            return Err(H3Error::StreamCreationError.into());
        }
        *slot = Some(stream_id);
        self.streams.insert(stream_id, Stream::new(stream_id, kind));
        debug!(stream_id, ?kind, "peer stream opened");
        Ok(())
    }

    fn dispatch_uni(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        let kind = stream.kind;
        let result = match kind {
            StreamType::Control => {
                stream.recv_buf.extend_from_slice(data);
                self.process_control(stream_id)
            }
            StreamType::QpackEncoder => self
                .qpack
                .recv_encoder_stream(data)
                .and_then(|()| self.process_unblocked()),
            StreamType::QpackDecoder => self.qpack.recv_decoder_stream(data),
            _ => {
                if fin {
                    self.streams.remove(&stream_id);
                }
                return Ok(());
            }
        };

        result.map_err(escalate)?;
        if fin {
            return Err(H3Error::ClosedCriticalStream.into());
        }
        Ok(())
    }

    // ========================================================================
    // Control Stream
    // ========================================================================

    fn process_control(&mut self, stream_id: StreamId) -> Result<()> {
        loop {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            if stream.recv_buf.is_empty() {
                return Ok(());
            }

            if let Payload::Skip(remaining) = stream.payload {
                let n = remaining.min(stream.recv_buf.len() as u64) as usize;
                stream.recv_buf.advance(n);
                stream.payload = remaining_after(remaining, n, Payload::Skip);
                continue;
            }

            let Some((header, header_len)) = FrameHeader::decode(&stream.recv_buf)? else {
                return Ok(());
            };
            if self.remote_settings.is_none() && header.frame_type != FrameType::Settings {
                return Err(H3Error::MissingSettings.into());
            }

            if let FrameType::Unknown(frame_type) = header.frame_type {
                if !header.frame_type.is_reserved_h2() {
                    trace!(frame_type, length = header.length, "unknown control frame skipped");
                    stream.recv_buf.advance(header_len);
                    if header.length > 0 {
                        stream.payload = Payload::Skip(header.length);
                    }
                    continue;
                }
            }

            if header.length > defaults::MAX_CONTROL_FRAME_SIZE {
                return Err(H3Error::FrameError.into());
            }
            let total = header_len + header.length as usize;
            if stream.recv_buf.len() < total {
                return Ok(());
            }

            let raw = stream.recv_buf.split_to(total).freeze();
            let frame = Frame::decode_payload(header, raw.slice(header_len..))?;
            self.handle_control_frame(frame)?;
        }
    }

    fn handle_control_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Settings(payload) => {
                if self.remote_settings.is_some() {
                    return Err(H3Error::FrameUnexpected.into());
                }
                let settings = Settings::from_wire(&payload.settings)?;
                debug!(
                    max_field_section_size = settings.max_field_section_size,
                    qpack_max_dtable_capacity = settings.qpack_max_dtable_capacity,
                    qpack_blocked_streams = settings.qpack_blocked_streams,
                    "SETTINGS received"
                );
                self.qpack.apply_peer_settings(&settings);
                self.remote_settings = Some(settings);
                Ok(())
            }
            Frame::Goaway(payload) => self.recv_goaway(payload.id),
            Frame::MaxPushId(_) if self.role == Role::Client => {
                Err(H3Error::FrameUnexpected.into())
            }
            Frame::MaxPushId(payload) => {
                trace!(push_id = payload.push_id, "MAX_PUSH_ID ignored");
                Ok(())
            }
            Frame::CancelPush(_) if self.role == Role::Client => Err(H3Error::IdError.into()),
            Frame::CancelPush(payload) => {
                trace!(push_id = payload.push_id, "CANCEL_PUSH ignored");
                Ok(())
            }
            _ => Err(H3Error::FrameUnexpected.into()),
        }
    }

    fn recv_goaway(&mut self, id: u64) -> Result<()> {
        if self.role == Role::Client && !is_client_bidi(id as StreamId) {
            return Err(H3Error::IdError.into());
        }
        if self.goaway_received.is_some_and(|prev| id > prev) {
            return Err(H3Error::IdError.into());
        }

        self.goaway_received = Some(id);
        self.state = ConnectionState::Draining;
        debug!(id, "GOAWAY received");
        self.callbacks.shutdown(id)?;

        if self.role == Role::Client {
            let mut rejected: Vec<StreamId> = self
                .streams
                .values()
                .filter(|s| s.is_request() && s.id as u64 >= id)
                .map(|s| s.id)
                .collect();
            rejected.sort_unstable();
            for stream_id in rejected {
                self.abort_stream(stream_id, h3_error::H3_REQUEST_REJECTED)?;
            }
        }
        Ok(())
    }
}

/// Stream-level errors on a critical stream close the connection
fn escalate(err: Error) -> Error {
    if err.is_fatal() {
        err
    } else {
        H3Error::ClosedCriticalStream.into()
    }
}
