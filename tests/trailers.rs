//! Trailer sections after a body

mod common;

use bytes::Bytes;
use common::{get, Event, Pair};
use h3core::constants::h3_error;
use h3core::{
    BoxedProvider, CallbackFailure, DataFlags, ErrorCode, Nv, PushBody, Read, StaticBody,
    StreamId,
};

fn post(path: &str) -> Vec<Nv<'_>> {
    let mut headers = get(path);
    headers[0] = Nv::from((":method", "POST"));
    headers
}

fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(pred).unwrap()
}

#[test]
fn test_trailers_follow_last_chunk() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client
        .conn
        .submit_request(0, &post("/upload"), Some(StaticBody::new(vec![7u8; 100]).boxed()))
        .unwrap();
    // The body source is still active, so the trailers wait for it
    pair.client
        .conn
        .submit_trailers(0, &[Nv::from(("x-checksum", "abc"))])
        .unwrap();
    pair.run().unwrap();

    let events = pair.server.log.events();
    assert_eq!(pair.server.log.body(0), vec![7u8; 100]);
    let last_data = events
        .iter()
        .rposition(|e| matches!(e, Event::Data(0, _)))
        .unwrap();
    let begin = position(&events, |e| *e == Event::BeginTrailers(0));
    assert!(last_data < begin);
    assert!(events.contains(&Event::Trailer(0, "x-checksum".into(), "abc".into())));
    assert!(events.contains(&Event::EndTrailers(0, true)));
    assert!(position(&events, |e| *e == Event::EndTrailers(0, true))
        < position(&events, |e| *e == Event::EndStream(0)));
}

#[test]
fn test_trailers_after_open_ended_body() {
    let mut pair = Pair::new();
    pair.handshake();

    let source = |_id: StreamId, _max: usize| -> Result<Read, CallbackFailure> {
        Ok(Read::Data {
            data: Bytes::from_static(b"body"),
            flags: DataFlags::EOF | DataFlags::NO_END_STREAM,
        })
    };
    pair.client
        .conn
        .submit_request(0, &post("/"), Some(Box::new(source) as BoxedProvider))
        .unwrap();
    pair.run().unwrap();

    assert_eq!(pair.server.log.body(0), b"body");
    assert!(!pair.server.log.events().contains(&Event::EndStream(0)));
    assert!(!pair.client.conn.is_stream_scheduled(0));

    pair.client
        .conn
        .submit_trailers(0, &[Nv::from(("x-done", "yes"))])
        .unwrap();
    pair.run().unwrap();
    let events = pair.server.log.events();
    assert!(events.contains(&Event::Trailer(0, "x-done".into(), "yes".into())));
    assert!(events.contains(&Event::EndTrailers(0, true)));
    assert!(events.contains(&Event::EndStream(0)));
}

#[test]
fn test_trailers_submitted_once() {
    let mut pair = Pair::new();
    pair.client
        .conn
        .submit_request(0, &post("/"), Some(StaticBody::new(&b"x"[..]).boxed()))
        .unwrap();
    let trailers = [Nv::from(("x-a", "1"))];
    pair.client.conn.submit_trailers(0, &trailers).unwrap();
    assert_eq!(
        pair.client.conn.submit_trailers(0, &trailers).unwrap_err().code(),
        ErrorCode::InvalidState
    );

    // Nothing may follow a finished body
    pair.client.conn.submit_request(4, &get("/"), None).unwrap();
    assert_eq!(
        pair.client.conn.submit_trailers(4, &trailers).unwrap_err().code(),
        ErrorCode::InvalidState
    );
}

#[test]
fn test_trailers_only_response() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/rpc"), None).unwrap();
    pair.run().unwrap();

    pair.server
        .conn
        .submit_response(0, &[Nv::from((":status", "200"))], Some(PushBody.boxed()))
        .unwrap();
    pair.server
        .conn
        .submit_trailers(0, &[Nv::from(("grpc-status", "0"))])
        .unwrap();
    pair.run().unwrap();

    let events = pair.client.log.events();
    assert!(events.contains(&Event::EndHeaders(0, false)));
    assert!(events.contains(&Event::Trailer(0, "grpc-status".into(), "0".into())));
    assert!(events.contains(&Event::EndTrailers(0, true)));
    assert!(pair.client.log.body(0).is_empty());
    assert!(events.contains(&Event::StreamClose(0, 0)));
}

#[test]
fn test_pseudo_header_in_trailers() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client
        .conn
        .submit_request(0, &post("/"), Some(StaticBody::new(&b"x"[..]).boxed()))
        .unwrap();
    pair.client
        .conn
        .submit_trailers(0, &[Nv::from((":status", "200"))])
        .unwrap();

    let err = pair.run().unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedHttpMessaging);
    assert!(pair
        .server
        .log
        .events()
        .contains(&Event::StreamClose(0, h3_error::H3_MESSAGE_ERROR)));
}
