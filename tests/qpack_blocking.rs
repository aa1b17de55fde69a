//! Header blocks that reference dynamic table entries not yet received

mod common;

use common::{deliver, drain, get, Event, Pair, Peer, Write, CLIENT_QPACK_ENC};
use h3core::constants::h3_error;
use h3core::{ConnectionState, ErrorCode, Nv, PushBody, Settings, StreamState};

fn split_inserts(writes: Vec<Write>) -> (Vec<Write>, Vec<Write>) {
    writes
        .into_iter()
        .partition(|w| w.stream_id == CLIENT_QPACK_ENC)
}

#[test]
fn test_blocked_headers_released_by_inserts() {
    let mut pair = Pair::new();
    pair.handshake();

    let mut headers = get("/");
    headers.push(Nv::from(("x-trace", "abc123")));
    pair.client.conn.submit_request(0, &headers, None).unwrap();

    let (inserts, request) = split_inserts(drain(&mut pair.client.conn).unwrap());
    assert!(!inserts.is_empty());
    assert_eq!(request.len(), 1);

    // The header block arrives first and waits
    let consumed = pair
        .server
        .conn
        .read_stream(0, &request[0].data, request[0].fin)
        .unwrap();
    assert_eq!(consumed, 0);
    assert_eq!(pair.server.conn.blocked_streams(), 1);
    assert_eq!(
        pair.server.conn.stream_state(0),
        Some(StreamState::HeadersPending)
    );
    assert_eq!(pair.server.log.count(|e| matches!(e, Event::BeginHeaders(_))), 0);

    deliver(&mut pair.server.conn, &inserts).unwrap();

    let events = pair.server.log.events();
    assert!(events.contains(&Event::DeferredConsume(0, request[0].data.len())));
    assert!(events.contains(&Event::Header(0, "x-trace".into(), "abc123".into())));
    assert!(events.contains(&Event::EndHeaders(0, true)));
    assert!(events.contains(&Event::EndStream(0)));
    assert_eq!(pair.server.conn.blocked_streams(), 0);
}

#[test]
fn test_acknowledged_entries_do_not_block() {
    let mut pair = Pair::new();
    pair.handshake();

    let mut headers = get("/");
    headers.push(Nv::from(("x-trace", "abc123")));
    pair.client.conn.submit_request(0, &headers, None).unwrap();
    // Delivers the inserts and returns the section acknowledgement
    pair.run().unwrap();

    pair.client.conn.submit_request(4, &headers, None).unwrap();
    let (inserts, request) = split_inserts(drain(&mut pair.client.conn).unwrap());
    assert!(inserts.is_empty());

    deliver(&mut pair.server.conn, &request).unwrap();
    assert!(pair.server.log.events().contains(&Event::EndStream(4)));
    assert_eq!(pair.server.conn.blocked_streams(), 0);
}

#[test]
fn test_blocked_stream_limit_is_fatal() {
    let mut pair = Pair::new();
    let mut strict = Peer::server(Settings::default().with_qpack_blocked_streams(1));

    // The client learns the lenient server's limits, but talks to the strict one too
    let preamble = drain(&mut pair.client.conn).unwrap();
    deliver(&mut pair.server.conn, &preamble).unwrap();
    deliver(&mut strict.conn, &preamble).unwrap();
    pair.run().unwrap();
    assert!(pair.client.conn.remote_settings().is_some());

    let mut first = get("/a");
    first.push(Nv::from(("x-first", "1")));
    let mut second = get("/b");
    second.push(Nv::from(("x-second", "2")));
    pair.client.conn.submit_request(0, &first, None).unwrap();
    pair.client.conn.submit_request(4, &second, None).unwrap();

    let (_, requests) = split_inserts(drain(&mut pair.client.conn).unwrap());
    let err = deliver(&mut strict.conn, &requests).unwrap_err();
    assert_eq!(err.code(), ErrorCode::QpackFatal);
    assert_eq!(strict.conn.state(), ConnectionState::Closed);
    assert!(strict
        .log
        .events()
        .contains(&Event::StreamClose(0, h3_error::QPACK_DECOMPRESSION_FAILED)));
}

#[test]
fn test_read_shutdown_cancels_blocked_stream() {
    let mut pair = Pair::new();
    pair.handshake();

    let mut headers = get("/");
    headers.push(Nv::from(("x-cancel", "me")));
    pair.client.conn.submit_request(0, &headers, None).unwrap();
    let (inserts, request) = split_inserts(drain(&mut pair.client.conn).unwrap());

    deliver(&mut pair.server.conn, &request).unwrap();
    assert_eq!(pair.server.conn.blocked_streams(), 1);

    pair.server.conn.shutdown_stream_read(0).unwrap();
    assert_eq!(pair.server.conn.blocked_streams(), 0);

    // Late inserts no longer release anything on that stream
    deliver(&mut pair.server.conn, &inserts).unwrap();
    assert_eq!(pair.server.log.count(|e| matches!(e, Event::BeginHeaders(0))), 0);
    assert_eq!(pair.server.conn.state(), ConnectionState::Connected);
}

#[test]
fn test_oversized_header_list_rejected_on_submit() {
    let mut pair = Pair::with_settings(
        Settings::default(),
        Settings::default().with_max_field_section_size(256),
    );
    pair.handshake();

    let value = "v".repeat(400);
    let mut headers = get("/");
    headers.push(Nv::from(("x-large", value.as_str())));
    let err = pair.client.conn.submit_request(0, &headers, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::QpackHeaderTooLarge);
    assert!(pair.client.conn.stream_state(0).is_none());
    assert_eq!(pair.client.conn.state(), ConnectionState::Connected);

    // The id is still free
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();
}

#[test]
fn test_blocked_stream_buffer_is_bounded() {
    let mut pair = Pair::new();
    pair.handshake();

    let mut headers = get("/upload");
    headers[0] = Nv::from((":method", "POST"));
    headers.push(Nv::from(("x-trace", "abc123")));
    pair.client
        .conn
        .submit_request(0, &headers, Some(PushBody.boxed()))
        .unwrap();
    let (inserts, request) = split_inserts(drain(&mut pair.client.conn).unwrap());
    deliver(&mut pair.server.conn, &request).unwrap();
    assert_eq!(pair.server.conn.blocked_streams(), 1);

    // A 200000-byte DATA frame piles up behind the blocked header block
    let mut data = vec![0x00, 0x80, 0x03, 0x0d, 0x40];
    data.extend(std::iter::repeat(b'x').take(200_000));
    let err = pair.server.conn.read_stream(0, &data, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::QpackHeaderTooLarge);
    assert!(pair
        .server
        .log
        .events()
        .contains(&Event::StreamClose(0, h3_error::H3_EXCESSIVE_LOAD)));
    assert_eq!(pair.server.conn.blocked_streams(), 0);

    // The inserts no longer release anything for that stream
    deliver(&mut pair.server.conn, &inserts).unwrap();
    assert_eq!(pair.server.log.count(|e| matches!(e, Event::BeginHeaders(0))), 0);
    assert_eq!(pair.server.conn.state(), ConnectionState::Connected);
}
