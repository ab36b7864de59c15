//! End-to-end scenarios over real loopback TCP sockets. Plain
//! `#[test]` functions using only `std`, no extra test harness.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use mqio::{Endpoint, Msg, MsgType, PollSet};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Drives `server` until it has accepted one connection, or panics after
/// `timeout`.
fn accept_within(server: &Endpoint, timeout: Duration) -> Endpoint {
    let deadline = Instant::now() + timeout;
    loop {
        server.wait(Instant::now() + Duration::from_millis(50)).unwrap();
        if let Some(child) = server.accept() {
            return child;
        }
        assert!(Instant::now() < deadline, "server did not accept in time");
    }
}

/// Drives `driver` (typically the sender) and `ep` (the receiver) until a
/// message is available on `ep`, or panics after `timeout`.
fn recv_within(driver: &Endpoint, ep: &Endpoint, timeout: Duration) -> Msg {
    let deadline = Instant::now() + timeout;
    loop {
        driver.wait(Instant::now() + Duration::from_millis(20)).ok();
        ep.wait(Instant::now() + Duration::from_millis(20)).ok();
        if let Some(msg) = ep.recv() {
            return msg;
        }
        assert!(Instant::now() < deadline, "message was not received in time");
    }
}

#[test]
fn echo_single_message() {
    let server = Endpoint::serve(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    let client = Endpoint::connect(addr).unwrap();

    client.send(Msg::wrap_buffer(b"hello"));

    let child = accept_within(&server, Duration::from_secs(2));
    let msg = recv_within(&client, &child, Duration::from_secs(2));

    assert_eq!(msg.len(), 5);
    assert_eq!(msg.kind(), Some(MsgType::Buffer));
    assert_eq!(msg.unwrap_buffer().unwrap(), b"hello");
}

#[test]
fn fragmented_wire_one_byte_at_a_time() {
    let server = Endpoint::serve(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    let mut raw_client = TcpStream::connect(addr).unwrap();

    let child = accept_within(&server, Duration::from_secs(2));

    let mut wire = Vec::new();
    wire.extend_from_slice(b"DSmsg");
    wire.extend_from_slice(&[0, 0]); // padding
    wire.push(0); // type = BUFFER
    wire.extend_from_slice(&5u64.to_be_bytes());
    wire.extend_from_slice(b"hello");

    for byte in &wire {
        raw_client.write_all(&[*byte]).unwrap();
        raw_client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut received = None;
    while received.is_none() {
        child.wait(Instant::now() + Duration::from_millis(50)).unwrap();
        received = child.recv();
        assert!(Instant::now() < deadline, "fragmented message was not reassembled in time");
    }

    assert_eq!(received.unwrap().unwrap_buffer().unwrap(), b"hello");
}

#[test]
fn two_messages_pipelined_before_first_recv() {
    let server = Endpoint::serve(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    let client = Endpoint::connect(addr).unwrap();

    client.send(Msg::wrap_buffer(b"A"));
    client.send(Msg::wrap_buffer(b"BC"));

    let child = accept_within(&server, Duration::from_secs(2));

    let first = recv_within(&client, &child, Duration::from_secs(2));
    assert_eq!(first.unwrap_buffer().unwrap(), b"A");

    let second = recv_within(&client, &child, Duration::from_secs(2));
    assert_eq!(second.unwrap_buffer().unwrap(), b"BC");
}

#[test]
fn magic_violation_poisons_the_connection() {
    let server = Endpoint::serve(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    let mut raw_client = TcpStream::connect(addr).unwrap();

    let child = accept_within(&server, Duration::from_secs(2));

    let mut wire = Vec::new();
    wire.extend_from_slice(b"XXmsg");
    wire.extend_from_slice(&[0u8; 11]);
    raw_client.write_all(&wire).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !child.is_error() {
        child.wait(Instant::now() + Duration::from_millis(50)).ok();
        assert!(Instant::now() < deadline, "connection was not poisoned in time");
    }

    assert!(child.geterror().is_some());
    assert!(child.recv().is_none());
}

#[test]
fn pollset_fan_in_reports_the_right_connection() {
    let pollset: PollSet<Endpoint> = PollSet::new();
    let mut clients = Vec::new();
    let mut children = Vec::new();

    for _ in 0..3 {
        let server = Endpoint::serve(loopback()).unwrap();
        let addr = server.local_addr().unwrap();
        let client = Endpoint::connect(addr).unwrap();
        let child = accept_within(&server, Duration::from_secs(2));
        pollset.add_self(&child).unwrap();
        clients.push(client);
        children.push(child);
    }

    clients[1].send(Msg::wrap_buffer(b"only for #2"));

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut ready_tag = None;
    while ready_tag.is_none() {
        clients[1].wait(Instant::now() + Duration::from_millis(20)).ok();
        if pollset.wait(Instant::now() + Duration::from_millis(50)).unwrap() > 0 {
            ready_tag = pollset.readable();
        }
        assert!(Instant::now() < deadline, "pollset did not report readiness in time");
    }

    let ready = ready_tag.unwrap();
    assert!(ready.ptr_eq(&children[1]));
    assert!(!ready.ptr_eq(&children[0]));
    assert!(!ready.ptr_eq(&children[2]));

    let msg = ready.recv().unwrap();
    assert_eq!(msg.unwrap_buffer().unwrap(), b"only for #2");
}

#[test]
fn pollset_add_rejects_double_membership_and_foreign_membership() {
    let set_a: PollSet<Endpoint> = PollSet::new();
    let set_b: PollSet<Endpoint> = PollSet::new();

    let server = Endpoint::serve(loopback()).unwrap();

    set_a.add_self(&server).unwrap();
    assert_eq!(
        set_a.add_self(&server).unwrap_err().kind(),
        std::io::ErrorKind::AlreadyExists
    );
    assert_eq!(
        set_b.add_self(&server).unwrap_err().kind(),
        std::io::ErrorKind::InvalidInput
    );

    set_a.remove(&server).unwrap();
    assert_eq!(
        set_a.remove(&server).unwrap_err().kind(),
        std::io::ErrorKind::NotFound
    );

    // Now free to join the other set.
    set_b.add_self(&server).unwrap();
}

#[test]
fn close_detaches_from_pollset_immediately() {
    let pollset: PollSet<Endpoint> = PollSet::new();
    let other_pollset: PollSet<Endpoint> = PollSet::new();

    let server = Endpoint::serve(loopback()).unwrap();
    let addr = server.local_addr().unwrap();
    let client = Endpoint::connect(addr).unwrap();
    let child = accept_within(&server, Duration::from_secs(2));

    pollset.add_self(&child).unwrap();

    let handle = child.clone();
    handle.close();

    assert!(child.is_error());
    assert!(child.geterror().is_none());
    assert!(child.recv().is_none());

    // Detached eagerly on close, not only once every clone drops: free to
    // join a different set right away instead of being stuck a member of
    // `pollset` forever.
    other_pollset.add_self(&child).unwrap();

    client.send(Msg::wrap_buffer(b"after close"));
    client.wait(Instant::now() + Duration::from_millis(50)).ok();
    assert_eq!(
        pollset.wait(Instant::now() + Duration::from_millis(50)).unwrap(),
        0
    );
}

#[test]
fn connect_to_closed_port_yields_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Endpoint::connect(addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !client.is_error() {
        client.wait(Instant::now() + Duration::from_millis(50)).ok();
        assert!(Instant::now() < deadline, "connect failure was not observed in time");
    }

    let err = client.geterror().expect("expected a latched connect error");
    assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
}
