//! The request/response wrapper against a plain server connection

#![cfg(feature = "client")]

mod common;

use common::{pump, Event, Peer, CLIENT_CTRL, CLIENT_QPACK_DEC, CLIENT_QPACK_ENC};
use h3core::constants::h3_error;
use h3core::{Client, Nv, PushBody, Request, Settings, StaticBody};

fn connect() -> (Client, Peer) {
    let mut client = Client::new(Settings::default()).unwrap();
    client
        .bind_streams(CLIENT_CTRL, CLIENT_QPACK_ENC, CLIENT_QPACK_DEC)
        .unwrap();
    let mut server = Peer::server(Settings::default());
    server.conn.bind_control_stream(common::SERVER_CTRL).unwrap();
    server
        .conn
        .bind_qpack_streams(common::SERVER_QPACK_ENC, common::SERVER_QPACK_DEC)
        .unwrap();
    run(&mut client, &mut server);
    (client, server)
}

fn run(client: &mut Client, server: &mut Peer) {
    loop {
        let sent = pump(client.connection_mut(), &mut server.conn).unwrap()
            + pump(&mut server.conn, client.connection_mut()).unwrap();
        if sent == 0 {
            break;
        }
    }
}

#[test]
fn test_get_collects_response() {
    let (mut client, mut server) = connect();
    let request = Request::get("https://example.com/index.html").header("Accept", "text/html");
    client.send(0, &request).unwrap();
    run(&mut client, &mut server);

    let headers = server.log.headers(0);
    assert!(headers.contains(&(":path".into(), "/index.html".into())));
    assert!(headers.contains(&(":authority".into(), "example.com".into())));
    assert!(headers.contains(&("accept".into(), "text/html".into())));

    server
        .conn
        .submit_response(
            0,
            &[Nv::from((":status", "200")), Nv::from(("content-type", "text/html"))],
            Some(StaticBody::new(&b"<h1>hi</h1>"[..]).boxed()),
        )
        .unwrap();
    run(&mut client, &mut server);

    let response = client.take_response(0).unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.is_success());
    assert_eq!(response.header("content-type"), Some(&b"text/html"[..]));
    assert_eq!(response.text().unwrap(), "<h1>hi</h1>");
    assert!(response.complete);
    assert_eq!(response.close_code, Some(0));
    assert!(client.response(0).is_none());
}

#[test]
fn test_post_with_body_and_trailers() {
    let (mut client, mut server) = connect();
    let request = Request::post("https://example.com/submit").body("name=h3");
    client.send(0, &request).unwrap();
    run(&mut client, &mut server);

    assert_eq!(server.log.body(0), b"name=h3");
    assert!(server
        .log
        .headers(0)
        .contains(&("content-length".into(), "7".into())));
    assert!(server.log.events().contains(&Event::EndStream(0)));

    server
        .conn
        .submit_response(0, &[Nv::from((":status", "100"))], None)
        .unwrap();
    server
        .conn
        .submit_response(0, &[Nv::from((":status", "201"))], Some(PushBody.boxed()))
        .unwrap();
    server.conn.submit_data(0, &b"created"[..], false).unwrap();
    server
        .conn
        .submit_trailers(0, &[Nv::from(("x-request-id", "42"))])
        .unwrap();
    run(&mut client, &mut server);

    let response = client.response(0).unwrap();
    assert_eq!(response.interim, vec![100]);
    assert_eq!(response.status(), 201);
    assert_eq!(response.bytes(), b"created");
    assert_eq!(response.trailer("x-request-id"), Some(&b"42"[..]));
    assert!(client.store().is_complete(0));
}

#[test]
fn test_cancelled_request_records_close_code() {
    let (mut client, mut server) = connect();
    client.send(0, &Request::get("https://example.com/feed")).unwrap();
    run(&mut client, &mut server);

    // Headers arrive, then the client gives up waiting for the body
    server
        .conn
        .submit_response(0, &[Nv::from((":status", "200"))], Some(PushBody.boxed()))
        .unwrap();
    run(&mut client, &mut server);
    client
        .connection_mut()
        .close_stream(0, h3_error::H3_REQUEST_CANCELLED)
        .unwrap();

    let response = client.response(0).unwrap();
    assert_eq!(response.status(), 200);
    assert!(!response.complete);
    assert_eq!(response.close_code, Some(h3_error::H3_REQUEST_CANCELLED));
}
