use std::rc::Rc;

use muxio::{ErrorKind, HeapByteBuffer, Selector, StaticByteBuffer, Transfer};

mod util;
use util::{drive, free_tcp_port, free_udp_port, free_udp_ports, init};

#[test]
fn loopback_tcp_echo() {
    init();

    let mut selector = Selector::new();
    let port = free_tcp_port();
    let server = selector.start_server(port, None).unwrap();
    let client = selector.start_client("127.0.0.1", port, None).unwrap();
    assert!(client.is_connection_pending());

    drive(&mut selector, || !client.is_connection_pending());
    assert!(client.is_connection_success());
    assert!(!client.is_connection_failed());

    let mut ping = StaticByteBuffer::<64>::new();
    ping.put(b"PING\n").unwrap();
    ping.flip();
    assert_eq!(client.write(&mut ping).unwrap(), Transfer::Done(5));
    client.watch_readable(true);

    drive(&mut selector, || server.is_acceptable());
    assert!(!server.is_readable());

    let conn = selector.accept(&server, None).unwrap();
    conn.watch_readable(true);

    drive(&mut selector, || conn.is_readable());
    let mut request = StaticByteBuffer::<64>::new();
    assert_eq!(conn.read(&mut request).unwrap(), Transfer::Done(5));
    request.flip();
    assert_eq!(request.as_slice(), b"PING\n");

    let mut pong = StaticByteBuffer::<64>::new();
    pong.put(b"PONG\n").unwrap();
    pong.flip();
    assert_eq!(conn.write(&mut pong).unwrap(), Transfer::Done(5));

    drive(&mut selector, || client.is_readable());
    let mut reply = StaticByteBuffer::<64>::new();
    assert_eq!(client.read(&mut reply).unwrap(), Transfer::Done(5));
    reply.flip();
    assert_eq!(reply.as_slice(), b"PONG\n");

    selector.cancel_socket(&server);
    selector.cancel_socket(&client);
    selector.cancel_socket(&conn);
    assert_eq!(selector.len(), 3);

    assert_eq!(selector.select(1).unwrap(), 0);
    assert!(selector.is_empty());
}

#[test]
fn dual_stack_server_accepts_v4_and_v6() {
    init();

    let mut selector = Selector::new();
    let port = free_tcp_port();
    let server = selector.start_server(port, None).unwrap();

    let v4 = selector.start_client("127.0.0.1", port, None).unwrap();
    let v6 = selector.start_client("::1", port, None).unwrap();

    drive(&mut selector, || {
        !v4.is_connection_pending() && !v6.is_connection_pending()
    });
    assert!(!v4.is_connection_failed());
    assert!(!v6.is_connection_failed());

    drive(&mut selector, || server.is_acceptable());
    let first = selector.accept(&server, None).unwrap();
    drive(&mut selector, || server.is_acceptable());
    let second = selector.accept(&server, None).unwrap();
    assert_ne!(first.handle(), second.handle());
}

#[test]
fn udp_request_reply() {
    init();

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector.start_udp_server(port, None).unwrap();
    let client = selector.start_udp_client("localhost", port, None).unwrap();
    assert!(client.peer_addr().is_some());

    let mut request = StaticByteBuffer::<64>::new();
    request.put(b"CLIENT REQUEST").unwrap();
    request.flip();
    assert_eq!(client.send_to_peer(&mut request).unwrap(), Transfer::Done(14));

    drive(&mut selector, || server.is_readable());
    let mut inbound = StaticByteBuffer::<1500>::new();
    let (transfer, from) = server.recv_from(&mut inbound).unwrap();
    assert_eq!(transfer, Transfer::Done(14));
    let from = from.expect("datagram must carry a peer address");
    inbound.flip();
    assert_eq!(inbound.as_slice(), b"CLIENT REQUEST");

    let mut response = StaticByteBuffer::<64>::new();
    response.put(b"RESPONSE\r\n").unwrap();
    response.flip();
    assert_eq!(server.send_to(&mut response, &from).unwrap(), Transfer::Done(10));

    client.watch_readable(true);
    drive(&mut selector, || client.is_readable());
    let mut reply = StaticByteBuffer::<64>::new();
    assert_eq!(client.recv_from_peer(&mut reply).unwrap(), Transfer::Done(10));
    reply.flip();
    assert_eq!(reply.as_slice(), b"RESPONSE\r\n");
}

#[test]
fn oversized_datagram_is_truncated_not_failed() {
    init();

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector.start_udp_server(port, None).unwrap();
    let client = selector.start_udp_client("127.0.0.1", port, None).unwrap();

    let payload: Vec<u8> = (0..100).map(|_| rand::random()).collect();
    let mut outbound = HeapByteBuffer::new(100).unwrap();
    outbound.put(&payload).unwrap();
    outbound.flip();
    assert_eq!(client.send_to_peer(&mut outbound).unwrap(), Transfer::Done(100));

    drive(&mut selector, || server.is_readable());
    let mut small = StaticByteBuffer::<10>::new();
    let (transfer, from) = server.recv_from(&mut small).unwrap();
    assert_eq!(transfer, Transfer::Done(10));
    assert!(from.is_some());
    assert_eq!(small.position(), 10);
    small.flip();
    assert_eq!(small.as_slice(), &payload[..10]);
}

#[test]
fn cancel_is_deferred_to_the_next_wait() {
    init();

    let mut selector = Selector::new();
    let ports = free_udp_ports(2);
    let _a = selector.start_udp_server(ports[0], None).unwrap();
    let _b = selector.start_udp_server(ports[1], None).unwrap();
    assert_eq!(selector.len(), 2);

    // Cancelling while walking the snapshot must not disturb the walk.
    for socket in selector.sockets() {
        selector.cancel_socket(&socket);
    }
    assert_eq!(selector.len(), 2);

    assert_eq!(selector.select(1).unwrap(), 0);
    assert!(selector.is_empty());
}

#[test]
fn connect_to_closed_port_fails() {
    init();

    let mut selector = Selector::new();
    let port = free_tcp_port();

    // Loopback may refuse during connect() itself or through the wait.
    match selector.start_client("127.0.0.1", port, None) {
        Ok(client) => {
            drive(&mut selector, || !client.is_connection_pending());
            assert!(client.is_connection_failed());
            assert!(!client.is_connection_success());
            selector.cancel_socket(&client);
        }
        Err(err) => assert_eq!(err.kind(), ErrorKind::Connect),
    }
}

#[test]
fn connect_success_is_visible_for_one_wait() {
    init();

    let mut selector = Selector::new();
    let port = free_tcp_port();
    let _server = selector.start_server(port, None).unwrap();
    let client = selector.start_client("127.0.0.1", port, None).unwrap();

    drive(&mut selector, || !client.is_connection_pending());
    assert!(client.is_connection_success());

    client.watch_writable(true);
    drive(&mut selector, || client.is_writable());
    assert!(!client.is_connection_success());
    assert!(!client.is_connection_pending());
    assert!(!client.is_connection_failed());
}

#[test]
fn attachment_comes_back_by_type() {
    init();

    struct Session {
        name: &'static str,
    }

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector
        .start_udp_server(port, Some(Rc::new(Session { name: "udp-server" })))
        .unwrap();

    let session = server.attachment::<Session>().unwrap();
    assert_eq!(session.name, "udp-server");
    assert!(server.attachment::<String>().is_none());

    // Replacing the payload is allowed at any time.
    server.set_attachment(Rc::new(String::from("replaced")));
    assert_eq!(*server.attachment::<String>().unwrap(), "replaced");
}

#[test]
fn io_on_a_drained_buffer_is_an_invariant_error() {
    init();

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector.start_udp_server(port, None).unwrap();

    let mut empty = StaticByteBuffer::<8>::new();
    empty.flip();
    assert!(server.recv_from(&mut empty).unwrap_err().is_invariant());
    assert!(server
        .send_to(&mut empty, &"127.0.0.1:9".parse().unwrap())
        .unwrap_err()
        .is_invariant());
}

#[test]
fn peered_shorthands_demand_a_peered_socket() {
    init();

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector.start_udp_server(port, None).unwrap();

    let mut buf = StaticByteBuffer::<8>::new();
    buf.put(b"x").unwrap();
    buf.flip();
    assert!(server.send_to_peer(&mut buf).unwrap_err().is_invariant());
    buf.clear();
    assert!(server.recv_from_peer(&mut buf).unwrap_err().is_invariant());
}

#[test]
#[ignore = "requires a multicast-capable network"]
fn multicast_request_reply() {
    init();

    let mut selector = Selector::new();
    let port = free_udp_port();
    let server = selector
        .start_multicast_server("224.0.0.251", port, None)
        .unwrap();
    let client = selector.start_udp_client("224.0.0.251", port, None).unwrap();

    let mut request = StaticByteBuffer::<64>::new();
    request.put(b"MULTICAST REQUEST").unwrap();
    request.flip();
    assert_eq!(client.send_to_peer(&mut request).unwrap(), Transfer::Done(17));

    drive(&mut selector, || server.is_readable());
    let mut inbound = StaticByteBuffer::<1500>::new();
    let (transfer, from) = server.recv_from(&mut inbound).unwrap();
    assert_eq!(transfer, Transfer::Done(17));
    inbound.flip();
    assert_eq!(inbound.as_slice(), b"MULTICAST REQUEST");

    let mut response = StaticByteBuffer::<64>::new();
    response.put(b"MULTICAST RESPONSE").unwrap();
    response.flip();
    server.send_to(&mut response, &from.unwrap()).unwrap();

    client.watch_readable(true);
    drive(&mut selector, || client.is_readable());
    let mut reply = StaticByteBuffer::<64>::new();
    assert_eq!(client.recv_from_peer(&mut reply).unwrap(), Transfer::Done(18));
    reply.flip();
    assert_eq!(reply.as_slice(), b"MULTICAST RESPONSE");
}

#[test]
fn rejected_multicast_group_is_an_error() {
    init();

    let mut selector = Selector::new();
    let err = selector
        .start_multicast_server("not-an-address", free_udp_port(), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolve);
    assert!(selector.is_empty());
}
