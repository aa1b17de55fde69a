//! Graceful shutdown

mod common;

use common::{get, pump, Event, Pair, Peer};
use h3core::constants::{h3_error, limits};
use h3core::frame::{Frame, GoawayPayload};
use h3core::{ConnectionState, ErrorCode, Nv, Settings};

fn goaway(id: u64) -> Vec<u8> {
    Frame::Goaway(GoawayPayload { id }).to_bytes().to_vec()
}

#[test]
fn test_server_shutdown_rejects_newer_requests() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();
    pair.run().unwrap();

    pair.server.conn.shutdown().unwrap();
    assert_eq!(pair.server.conn.state(), ConnectionState::Draining);

    // The client opens stream 4 before hearing about the GOAWAY
    pair.client.conn.submit_request(4, &get("/late"), None).unwrap();
    pump(&mut pair.client.conn, &mut pair.server.conn).unwrap();
    let events = pair.server.log.events();
    assert!(events.contains(&Event::StopSending(4, h3_error::H3_REQUEST_REJECTED)));
    assert!(events.contains(&Event::ResetStream(4, h3_error::H3_REQUEST_REJECTED)));
    assert!(!events.contains(&Event::BeginHeaders(4)));

    pump(&mut pair.server.conn, &mut pair.client.conn).unwrap();
    assert!(pair.client.log.events().contains(&Event::Shutdown(4)));
    assert_eq!(pair.client.conn.state(), ConnectionState::Draining);
    assert_eq!(
        pair.client.conn.submit_request(8, &get("/"), None).unwrap_err().code(),
        ErrorCode::InvalidState
    );

    // Stream 0 still completes
    pair.server
        .conn
        .submit_response(0, &[Nv::from((":status", "200"))], None)
        .unwrap();
    pair.run().unwrap();
    assert!(pair.client.log.events().contains(&Event::StreamClose(0, 0)));
}

#[test]
fn test_client_aborts_streams_past_goaway() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();
    pair.run().unwrap();

    pair.server.conn.shutdown().unwrap();
    pair.client.conn.submit_request(4, &get("/a"), None).unwrap();
    pair.client.conn.submit_request(8, &get("/b"), None).unwrap();

    pump(&mut pair.server.conn, &mut pair.client.conn).unwrap();
    let events = pair.client.log.events();
    for id in [4, 8] {
        assert!(events.contains(&Event::StopSending(id, h3_error::H3_REQUEST_REJECTED)));
        assert!(events.contains(&Event::StreamClose(id, h3_error::H3_REQUEST_REJECTED)));
        assert!(pair.client.conn.stream_state(id).is_none());
    }
    assert!(pair.client.conn.stream_state(0).is_some());
}

#[test]
fn test_shutdown_without_requests() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.server.conn.shutdown().unwrap();
    pair.run().unwrap();
    assert_eq!(pair.client.log.events(), vec![Event::Shutdown(0)]);
}

#[test]
fn test_shutdown_notice_then_shutdown() {
    let mut pair = Pair::new();
    pair.handshake();

    pair.server.conn.submit_shutdown_notice().unwrap();
    assert_eq!(pair.server.conn.state(), ConnectionState::Connected);
    pair.run().unwrap();
    assert!(pair
        .client
        .log
        .events()
        .contains(&Event::Shutdown(limits::MAX_CLIENT_BIDI_STREAM_ID)));

    // Requests still flow after the notice
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();
    pair.run().unwrap();
    assert!(pair.server.log.events().contains(&Event::EndStream(0)));

    pair.server.conn.shutdown().unwrap();
    pair.run().unwrap();
    assert!(pair.client.log.events().contains(&Event::Shutdown(4)));
    assert_eq!(pair.server.conn.state(), ConnectionState::Draining);
}

#[test]
fn test_shutdown_requires_control_stream() {
    let mut peer = Peer::server(Settings::default());
    assert_eq!(peer.conn.shutdown().unwrap_err().code(), ErrorCode::InvalidState);
}

#[test]
fn test_goaway_id_may_not_grow() {
    let mut peer = Peer::client(Settings::default());
    let mut bytes = vec![0x00, 0x04, 0x00];
    bytes.extend(goaway(4));
    peer.conn.read_stream(3, &bytes, false).unwrap();
    assert_eq!(peer.conn.state(), ConnectionState::Draining);

    let err = peer.conn.read_stream(3, &goaway(8), false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::H3IdError);
    assert_eq!(peer.conn.state(), ConnectionState::Closed);
}

#[test]
fn test_goaway_must_name_client_stream() {
    let mut peer = Peer::client(Settings::default());
    let mut bytes = vec![0x00, 0x04, 0x00];
    bytes.extend(goaway(1));
    let err = peer.conn.read_stream(3, &bytes, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::H3IdError);
}

#[test]
fn test_client_shutdown_sends_push_id_zero() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.shutdown().unwrap();
    pair.run().unwrap();
    assert_eq!(pair.server.log.events(), vec![Event::Shutdown(0)]);
    assert_eq!(pair.server.conn.state(), ConnectionState::Draining);
}
