//! High-Level HTTP/3 Client API
//!
//! A request/response layer over [`Connection`]: requests are built from a
//! method and URL, responses are collected from the connection callbacks
//! into a [`ResponseStore`]. The QUIC transport stays with the caller, who
//! keeps driving `writev_stream` and `read_stream` as usual.
//!
//! ## Example
//!
//! ```rust,ignore
//! use h3core::client::{Client, Request};
//!
//! let mut client = Client::new(Settings::default())?;
//! client.bind_streams(2, 6, 10)?;
//! client.send(0, &Request::get("https://example.com/"))?;
//! // ... pump the transport ...
//! let response = client.take_response(0).unwrap();
//! println!("Status: {}", response.status());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::callbacks::Callbacks;
use crate::connection::Connection;
use crate::data::StaticBody;
use crate::error::{Error, ErrorCode, Result};
use crate::types::{HeaderField, Nv, Settings, StreamId};

// ============================================================================
// HTTP Method
// ============================================================================

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
    CONNECT,
}

impl Method {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
        }
    }
}

// ============================================================================
// Request Builder
// ============================================================================

/// HTTP/3 Request builder
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    method: Method,
    /// Request URL
    url: String,
    /// Request headers
    headers: Vec<(String, String)>,
    /// Request body (optional)
    body: Option<Bytes>,
}

impl Request {
    /// Create a new GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a new POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a new request with custom method
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header (the name is lowercased)
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Get the method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the headers
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Get the body
    pub fn get_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Build the complete field list, pseudo-headers first
    ///
    /// A body adds `content-length`.
    pub fn fields(&self) -> Result<Vec<(String, String)>> {
        let (scheme, authority, path) = parse_url(&self.url)?;
        let mut fields = vec![
            (":method".to_string(), self.method.as_str().to_string()),
            (":scheme".to_string(), scheme),
            (":authority".to_string(), authority),
            (":path".to_string(), path),
        ];
        fields.extend(self.headers.iter().cloned());
        if let Some(body) = &self.body {
            fields.push(("content-length".to_string(), body.len().to_string()));
        }
        Ok(fields)
    }

    /// The body as a source for `submit_request`
    pub fn body_source(&self) -> Option<StaticBody> {
        self.body.clone().map(StaticBody::new)
    }
}

/// Borrow a field list as `Nv`s
pub fn as_nv(fields: &[(String, String)]) -> Vec<Nv<'_>> {
    fields
        .iter()
        .map(|(name, value)| Nv::new(name.as_bytes(), value.as_bytes()))
        .collect()
}

// ============================================================================
// Response
// ============================================================================

/// HTTP/3 Response
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code of the final response (0 until received)
    pub status: u16,
    /// Statuses of informational responses, in arrival order
    pub interim: Vec<u16>,
    /// Response headers (without pseudo-headers)
    pub headers: Vec<HeaderField>,
    /// Response body
    pub body: BytesMut,
    /// Trailer fields
    pub trailers: Vec<HeaderField>,
    /// The stream ended cleanly
    pub complete: bool,
    /// Application error code the stream closed with, once closed
    pub close_code: Option<u64>,
}

impl Response {
    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Check if status is success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value.as_slice())
    }

    /// Get a trailer value
    pub fn trailer(&self, name: &str) -> Option<&[u8]> {
        self.trailers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value.as_slice())
    }

    /// Get the body as bytes
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Get the body as text (UTF-8)
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|_| Error::from(ErrorCode::MalformedHttpMessaging))
    }
}

fn parse_status(value: &[u8]) -> u16 {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

// ============================================================================
// Response Store
// ============================================================================

/// Responses assembled from connection callbacks, keyed by stream
#[derive(Debug, Clone, Default)]
pub struct ResponseStore {
    inner: Arc<Mutex<HashMap<StreamId, Response>>>,
}

impl ResponseStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks that fill this store
    pub fn callbacks(&self) -> Callbacks {
        let begin = self.inner.clone();
        let header = self.inner.clone();
        let end = self.inner.clone();
        let trailer = self.inner.clone();
        let data = self.inner.clone();
        let done = self.inner.clone();
        let close = self.inner.clone();

        Callbacks::builder()
            .begin_headers(move |id| {
                begin.lock().entry(id).or_default();
                Ok(())
            })
            .recv_header(move |id, field| {
                let mut map = header.lock();
                let response = map.entry(id).or_default();
                if field.name == ":status" {
                    response.status = parse_status(&field.value);
                } else if !field.name.starts_with(b":") {
                    response.headers.push(field.clone());
                }
                Ok(())
            })
            .end_headers(move |id, _fin| {
                let mut map = end.lock();
                if let Some(response) = map.get_mut(&id) {
                    if (100..200).contains(&response.status) {
                        response.interim.push(response.status);
                        response.status = 0;
                        response.headers.clear();
                    }
                }
                Ok(())
            })
            .recv_trailer(move |id, field| {
                trailer.lock().entry(id).or_default().trailers.push(field.clone());
                Ok(())
            })
            .recv_data(move |id, chunk| {
                data.lock()
                    .entry(id)
                    .or_default()
                    .body
                    .extend_from_slice(chunk);
                Ok(())
            })
            .end_stream(move |id| {
                done.lock().entry(id).or_default().complete = true;
                Ok(())
            })
            .stream_close(move |id, code| {
                if let Some(response) = close.lock().get_mut(&id) {
                    response.close_code = Some(code);
                }
                Ok(())
            })
            .build()
    }

    /// Copy of the response collected so far on a stream
    pub fn response(&self, stream_id: StreamId) -> Option<Response> {
        self.inner.lock().get(&stream_id).cloned()
    }

    /// Body bytes received so far on a stream
    pub fn stream_response_data(&self, stream_id: StreamId) -> Option<Bytes> {
        self.inner
            .lock()
            .get(&stream_id)
            .map(|r| Bytes::copy_from_slice(&r.body))
    }

    /// Whether the response on a stream has fully arrived
    pub fn is_complete(&self, stream_id: StreamId) -> bool {
        self.inner
            .lock()
            .get(&stream_id)
            .is_some_and(|r| r.complete)
    }

    /// Remove and return a response
    pub fn take_response(&self, stream_id: StreamId) -> Option<Response> {
        self.inner.lock().remove(&stream_id)
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP/3 Client
///
/// Owns a client [`Connection`] whose callbacks feed a [`ResponseStore`].
pub struct Client {
    conn: Connection,
    store: ResponseStore,
}

impl Client {
    /// Create a client connection with the given local settings
    pub fn new(settings: Settings) -> Result<Self> {
        let store = ResponseStore::new();
        let conn = Connection::client(store.callbacks(), settings)?;
        Ok(Self { conn, store })
    }

    /// Bind the local control and QPACK streams
    pub fn bind_streams(
        &mut self,
        control: StreamId,
        qpack_encoder: StreamId,
        qpack_decoder: StreamId,
    ) -> Result<()> {
        self.conn.bind_control_stream(control)?;
        self.conn.bind_qpack_streams(qpack_encoder, qpack_decoder)
    }

    /// Submit a request on `stream_id`
    pub fn send(&mut self, stream_id: StreamId, request: &Request) -> Result<()> {
        let fields = request.fields()?;
        let nva = as_nv(&fields);
        let body = request.body_source().map(StaticBody::boxed);
        self.conn.submit_request(stream_id, &nva, body)?;
        debug!(stream_id, method = request.method().as_str(), "request sent");
        Ok(())
    }

    /// Copy of the response collected so far
    pub fn response(&self, stream_id: StreamId) -> Option<Response> {
        self.store.response(stream_id)
    }

    /// Remove and return a response
    pub fn take_response(&mut self, stream_id: StreamId) -> Option<Response> {
        self.store.take_response(stream_id)
    }

    /// Response store shared with the callbacks
    pub fn store(&self) -> &ResponseStore {
        &self.store
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Underlying connection, for driving the transport
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

// ============================================================================
// URL Parsing Helper
// ============================================================================

/// Parse a URL into (scheme, authority, path)
fn parse_url(url: &str) -> Result<(String, String, String)> {
    let (scheme, rest) = url
        .trim()
        .split_once("://")
        .ok_or(ErrorCode::InvalidArgument)?;
    if scheme.is_empty() {
        return Err(ErrorCode::InvalidArgument.into());
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(ErrorCode::InvalidArgument.into());
    }

    Ok((
        scheme.to_ascii_lowercase(),
        authority.to_string(),
        path.to_string(),
    ))
}

// ============================================================================
// Tests
// ============================================================================
