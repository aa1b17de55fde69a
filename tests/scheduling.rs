//! Write ordering across request streams

mod common;

use bytes::Bytes;
use common::{get, Pair};
use h3core::{BoxedProvider, CallbackFailure, ErrorCode, Priority, Read, StaticBody, StreamId};

fn body(len: usize) -> Option<BoxedProvider> {
    Some(StaticBody::new(vec![b'.'; len]).boxed())
}

/// Request streams served by the next `limit` client writes, in order
fn write_order(pair: &mut Pair, limit: usize) -> Vec<StreamId> {
    let mut order = Vec::new();
    while order.len() < limit {
        let Some(write) = pair.client.conn.writev_stream(16).unwrap() else {
            break;
        };
        let data: Vec<u8> = write.vecs.iter().flat_map(|v| v.iter().copied()).collect();
        pair.server
            .conn
            .read_stream(write.stream_id, &data, write.fin)
            .unwrap();
        pair.client
            .conn
            .add_write_offset(write.stream_id, data.len())
            .unwrap();
        if write.stream_id % 4 == 0 {
            order.push(write.stream_id);
        }
    }
    order
}

#[test]
fn test_lower_urgency_served_first() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/low"), body(20_000)).unwrap();
    pair.client.conn.submit_request(4, &get("/high"), body(20_000)).unwrap();
    pair.client
        .conn
        .set_stream_priority(0, Priority::with_urgency(5, false))
        .unwrap();
    pair.client
        .conn
        .set_stream_priority(4, Priority::with_urgency(1, false))
        .unwrap();

    // Headers, a full quantum and the rest: three writes each
    assert_eq!(write_order(&mut pair, 10), vec![4, 4, 4, 0, 0, 0]);
}

#[test]
fn test_same_urgency_is_fifo_without_incremental() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/a"), body(20_000)).unwrap();
    pair.client.conn.submit_request(4, &get("/b"), body(20_000)).unwrap();

    assert_eq!(write_order(&mut pair, 10), vec![0, 0, 0, 4, 4, 4]);
}

#[test]
fn test_incremental_streams_take_turns() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/a"), body(40_000)).unwrap();
    pair.client.conn.submit_request(4, &get("/b"), body(40_000)).unwrap();
    for id in [0, 4] {
        pair.client
            .conn
            .set_stream_priority(id, Priority::with_urgency(3, true))
            .unwrap();
    }

    assert_eq!(write_order(&mut pair, 6), vec![0, 4, 0, 4, 0, 4]);
}

#[test]
fn test_priority_change_takes_effect_at_next_write() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/a"), body(20_000)).unwrap();
    pair.client.conn.submit_request(4, &get("/b"), body(20_000)).unwrap();

    assert_eq!(write_order(&mut pair, 1), vec![0]);
    pair.client
        .conn
        .set_stream_priority(4, Priority::with_urgency(0, false))
        .unwrap();
    assert_eq!(pair.client.conn.stream_priority(4).unwrap().urgency, 0);
    assert_eq!(write_order(&mut pair, 4), vec![4, 4, 4, 0]);
}

#[test]
fn test_invalid_urgency() {
    let mut pair = Pair::new();
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();
    let err = pair
        .client
        .conn
        .set_stream_priority(0, Priority { urgency: 8, inc: false })
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(
        pair.client.conn.stream_priority(0).unwrap(),
        Priority::default()
    );
}

#[test]
fn test_blocked_stream_is_skipped() {
    let mut pair = Pair::new();
    pair.handshake();
    pair.client.conn.submit_request(0, &get("/a"), body(100)).unwrap();
    pair.client.conn.submit_request(4, &get("/b"), body(100)).unwrap();

    pair.client.conn.block_stream(0).unwrap();
    assert!(!pair.client.conn.is_stream_scheduled(0));
    assert_eq!(write_order(&mut pair, 10), vec![4, 4]);

    pair.client.conn.unblock_stream(0).unwrap();
    assert!(pair.client.conn.is_stream_scheduled(0));
    assert_eq!(write_order(&mut pair, 10), vec![0, 0]);
}

#[test]
fn test_parked_source_resumes() {
    let mut pair = Pair::new();
    pair.handshake();

    let mut calls = 0;
    let source = move |_id: StreamId, _max: usize| -> Result<Read, CallbackFailure> {
        calls += 1;
        match calls {
            1 => Ok(Read::WouldBlock),
            _ => Ok(Read::eof(Bytes::from_static(b"ready"))),
        }
    };
    pair.client
        .conn
        .submit_request(0, &get("/"), Some(Box::new(source) as BoxedProvider))
        .unwrap();

    // Headers go out, then the source has nothing yet
    assert_eq!(write_order(&mut pair, 1), vec![0]);
    assert_eq!(
        pair.client.conn.writev_stream(16).unwrap_err().code(),
        ErrorCode::WouldBlock
    );
    // Parked streams are not polled again
    assert_eq!(pair.client.conn.writev_stream(16).unwrap(), None);
    assert!(!pair.client.conn.is_stream_scheduled(0));

    pair.client.conn.resume_stream(0).unwrap();
    assert_eq!(write_order(&mut pair, 10), vec![0]);
    assert!(pair.server.log.body(0).ends_with(b"ready"));
}

#[test]
fn test_critical_streams_before_requests() {
    let mut pair = Pair::new();
    pair.client.conn.submit_request(0, &get("/"), None).unwrap();

    let first = pair.client.conn.writev_stream(16).unwrap().unwrap();
    assert_eq!(first.stream_id, common::CLIENT_CTRL);
    assert!(!first.fin);
}
