//! Shared harness for the integration tests
//!
//! Two connections are wired back to back: whatever one side's
//! `writev_stream` produces is fed into the other side's `read_stream`, the
//! way a loss-free QUIC transport would deliver it.

#![allow(dead_code)]

use std::sync::Arc;

use h3core::{Callbacks, Connection, ErrorCode, Nv, Result, Settings, StreamId};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub const CLIENT_CTRL: StreamId = 2;
pub const CLIENT_QPACK_ENC: StreamId = 6;
pub const CLIENT_QPACK_DEC: StreamId = 10;
pub const SERVER_CTRL: StreamId = 3;
pub const SERVER_QPACK_ENC: StreamId = 7;
pub const SERVER_QPACK_DEC: StreamId = 11;

/// Route engine diagnostics to the test output (filtered by `RUST_LOG`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Event Recorder
// ============================================================================

/// Everything an application can observe through callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BeginHeaders(StreamId),
    Header(StreamId, String, String),
    EndHeaders(StreamId, bool),
    BeginTrailers(StreamId),
    Trailer(StreamId, String, String),
    EndTrailers(StreamId, bool),
    Data(StreamId, Vec<u8>),
    DeferredConsume(StreamId, usize),
    EndStream(StreamId),
    StopSending(StreamId, u64),
    ResetStream(StreamId, u64),
    StreamClose(StreamId, u64),
    Acked(StreamId, u64),
    Shutdown(u64),
}

/// Callback log shared with the connection
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks that append to this log
    pub fn callbacks(&self) -> Callbacks {
        let log = |recorder: &Recorder| recorder.events.clone();
        let (a, b, c, d, e, f, g) = (log(self), log(self), log(self), log(self), log(self), log(self), log(self));
        let (h, i, j, k, l, m, n) = (log(self), log(self), log(self), log(self), log(self), log(self), log(self));

        Callbacks::builder()
            .begin_headers(move |id| {
                a.lock().push(Event::BeginHeaders(id));
                Ok(())
            })
            .recv_header(move |id, field| {
                b.lock()
                    .push(Event::Header(id, text(&field.name), text(&field.value)));
                Ok(())
            })
            .end_headers(move |id, fin| {
                c.lock().push(Event::EndHeaders(id, fin));
                Ok(())
            })
            .begin_trailers(move |id| {
                d.lock().push(Event::BeginTrailers(id));
                Ok(())
            })
            .recv_trailer(move |id, field| {
                e.lock()
                    .push(Event::Trailer(id, text(&field.name), text(&field.value)));
                Ok(())
            })
            .end_trailers(move |id, fin| {
                f.lock().push(Event::EndTrailers(id, fin));
                Ok(())
            })
            .recv_data(move |id, data| {
                g.lock().push(Event::Data(id, data.to_vec()));
                Ok(())
            })
            .deferred_consume(move |id, consumed| {
                h.lock().push(Event::DeferredConsume(id, consumed));
                Ok(())
            })
            .end_stream(move |id| {
                i.lock().push(Event::EndStream(id));
                Ok(())
            })
            .stop_sending(move |id, code| {
                j.lock().push(Event::StopSending(id, code));
                Ok(())
            })
            .reset_stream(move |id, code| {
                k.lock().push(Event::ResetStream(id, code));
                Ok(())
            })
            .stream_close(move |id, code| {
                l.lock().push(Event::StreamClose(id, code));
                Ok(())
            })
            .acked_stream_data(move |id, len| {
                m.lock().push(Event::Acked(id, len));
                Ok(())
            })
            .shutdown(move |id| {
                n.lock().push(Event::Shutdown(id));
                Ok(())
            })
            .build()
    }

    /// Snapshot of the log
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Remove and return the log
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of logged events matching `pred`
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Body bytes received on a stream, concatenated
    pub fn body(&self, stream_id: StreamId) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Data(id, data) if *id == stream_id => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Regular and pseudo header fields received on a stream
    pub fn headers(&self, stream_id: StreamId) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Header(id, name, value) if *id == stream_id => {
                    Some((name.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Connection Pair
// ============================================================================

/// One endpoint and its callback log
pub struct Peer {
    pub conn: Connection,
    pub log: Recorder,
}

impl Peer {
    pub fn client(settings: Settings) -> Self {
        init_tracing();
        let log = Recorder::new();
        let conn = Connection::client(log.callbacks(), settings).unwrap();
        Self { conn, log }
    }

    pub fn server(settings: Settings) -> Self {
        init_tracing();
        let log = Recorder::new();
        let conn = Connection::server(log.callbacks(), settings).unwrap();
        Self { conn, log }
    }
}

/// A client and a server with their critical streams bound
pub struct Pair {
    pub client: Peer,
    pub server: Peer,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_settings(Settings::default(), Settings::default())
    }

    pub fn with_settings(client: Settings, server: Settings) -> Self {
        let mut client = Peer::client(client);
        let mut server = Peer::server(server);
        client.conn.bind_control_stream(CLIENT_CTRL).unwrap();
        client
            .conn
            .bind_qpack_streams(CLIENT_QPACK_ENC, CLIENT_QPACK_DEC)
            .unwrap();
        server.conn.bind_control_stream(SERVER_CTRL).unwrap();
        server
            .conn
            .bind_qpack_streams(SERVER_QPACK_ENC, SERVER_QPACK_DEC)
            .unwrap();
        Self { client, server }
    }

    /// Exchange SETTINGS and stream preambles
    pub fn handshake(&mut self) {
        self.run().unwrap();
        assert!(self.client.conn.remote_settings().is_some());
        assert!(self.server.conn.remote_settings().is_some());
    }

    /// Move bytes both ways until neither side has anything to write
    pub fn run(&mut self) -> Result<()> {
        loop {
            let sent = pump(&mut self.client.conn, &mut self.server.conn)?
                + pump(&mut self.server.conn, &mut self.client.conn)?;
            if sent == 0 {
                return Ok(());
            }
        }
    }
}

/// Deliver everything `from` has ready to `to`; returns the number of writes
pub fn pump(from: &mut Connection, to: &mut Connection) -> Result<usize> {
    let mut writes = 0;
    loop {
        let write = match from.writev_stream(16) {
            Ok(Some(write)) => write,
            Ok(None) => return Ok(writes),
            Err(err) if err.code() == ErrorCode::WouldBlock => return Ok(writes),
            Err(err) => return Err(err),
        };
        let data: Vec<u8> = write.vecs.iter().flat_map(|v| v.iter().copied()).collect();
        to.read_stream(write.stream_id, &data, write.fin)?;
        from.add_write_offset(write.stream_id, data.len())?;
        writes += 1;
    }
}

/// Deliver `from`'s writes for a single stream only, holding back others
pub fn pump_stream(from: &mut Connection, to: &mut Connection, stream_id: StreamId) -> Result<usize> {
    let mut delivered = 0;
    while let Some(write) = from.writev_stream(16)? {
        if write.stream_id != stream_id {
            return Ok(delivered);
        }
        let data: Vec<u8> = write.vecs.iter().flat_map(|v| v.iter().copied()).collect();
        to.read_stream(write.stream_id, &data, write.fin)?;
        from.add_write_offset(write.stream_id, data.len())?;
        delivered += data.len();
    }
    Ok(delivered)
}

/// Bytes one `writev_stream` call produced
#[derive(Debug, Clone)]
pub struct Write {
    pub stream_id: StreamId,
    pub data: Vec<u8>,
    pub fin: bool,
}

/// Take everything `from` has ready, marking it written
pub fn drain(from: &mut Connection) -> Result<Vec<Write>> {
    let mut writes = Vec::new();
    while let Some(write) = from.writev_stream(16)? {
        let data: Vec<u8> = write.vecs.iter().flat_map(|v| v.iter().copied()).collect();
        from.add_write_offset(write.stream_id, data.len())?;
        writes.push(Write {
            stream_id: write.stream_id,
            data,
            fin: write.fin,
        });
    }
    Ok(writes)
}

/// Feed drained writes into `to`, in order
pub fn deliver<'a>(to: &mut Connection, writes: impl IntoIterator<Item = &'a Write>) -> Result<()> {
    for write in writes {
        to.read_stream(write.stream_id, &write.data, write.fin)?;
    }
    Ok(())
}

/// Request headers for `GET https://example.com{path}`
pub fn get(path: &str) -> Vec<Nv<'_>> {
    vec![
        Nv::from((":method", "GET")),
        Nv::from((":scheme", "https")),
        Nv::from((":authority", "example.com")),
        Nv::from((":path", path)),
    ]
}
