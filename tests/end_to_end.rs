//! End-to-end scenarios from `spec.md` §8, driven through the public
//! reactor/request surface rather than the synchronous socket calls
//! `src/net/socket.rs`'s own unit tests already cover.
//!
//! Readiness-based only (epoll/kqueue); the completion-port backend isn't
//! exercisable from this sandbox.

#![cfg(unix)]

use std::time::Duration;

use vortex::{Error, ErrorKind};
use vortex::net::{Endpoint, Socket, SocketType};
use vortex::reactor::Reactor;
use vortex::request::{Buffer, Op, Request};
use vortex::task::Service;

fn loopback_udp() -> Socket {
    let socket = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
    socket.bind(Endpoint::new("127.0.0.1:0".parse().unwrap())).unwrap();
    socket
}

/// §8.1 — UDP echo: A sends to B, B receives A's bytes and sees A's bound
/// endpoint as the sender.
#[test]
fn udp_echo_round_trip() {
    drop(env_logger::try_init());
    let a = loopback_udp();
    let b = loopback_udp();
    let a_addr = a.local_endpoint().unwrap();

    let sent = a.send_to(b"hello", b.local_endpoint().unwrap()).unwrap();
    assert_eq!(sent, 5);

    let mut buf = [0u8; 16];
    let (n, peer) = b.receive_from(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(peer.port(), a_addr.port());
}

/// §8.2 — cork/uncork send ordering: two async sends queued while corked
/// complete, in order, only once uncorked.
#[test]
fn cork_uncork_preserves_send_order() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let a = loopback_udp();
    let a_addr = a.local_endpoint().unwrap();

    let b = loopback_udp();
    let b_token = reactor.register(b.native_handle().raw()).unwrap();
    reactor.cork_send(b_token).unwrap();

    let mut r1 = Request::new();
    let mut r2 = Request::new();
    unsafe {
        reactor.start_send_to(b_token, &mut r1, &[Buffer::from_slice(b"first")], a_addr).unwrap();
        reactor.start_send_to(b_token, &mut r2, &[Buffer::from_slice(b"second")], a_addr).unwrap();
    }

    reactor.poll(Some(Duration::from_millis(100))).unwrap();
    assert!(reactor.try_completion().is_null(), "corked sends completed before uncork");

    reactor.uncork_send(b_token).unwrap();

    let first = reactor.try_completion();
    let second = reactor.try_completion();
    assert_eq!(first, &mut r1 as *mut Request, "r1 must complete before r2");
    assert_eq!(second, &mut r2 as *mut Request);

    let mut buf = [0u8; 16];
    let (n, _) = a.receive_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"first");
    let (n, _) = a.receive_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"second");

    reactor.deregister(b_token).unwrap();
}

/// §8.3 — two receives, one datagram: only the first pending receive is
/// satisfied; the second remains pending until the socket is closed, at
/// which point it completes with `bad_file_descriptor`.
#[test]
fn two_receives_one_datagram() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let mut a = loopback_udp();
    let a_addr = a.local_endpoint().unwrap();
    let a_token = reactor.register(a.native_handle().raw()).unwrap();

    let b = loopback_udp();

    let mut buf1 = [0u8; 16];
    let mut buf2 = [0u8; 16];
    let mut r1 = Request::new();
    let mut r2 = Request::new();
    unsafe {
        reactor.start_receive_from(a_token, &mut r1, &[Buffer::from_mut_slice(&mut buf1)]).unwrap();
        reactor.start_receive_from(a_token, &mut r2, &[Buffer::from_mut_slice(&mut buf2)]).unwrap();
    }

    b.send_to(b"one datagram", a_addr).unwrap();

    let mut completed = std::ptr::null_mut();
    for _ in 0..200 {
        let c = reactor.try_completion();
        if !c.is_null() {
            completed = c;
            break;
        }
        reactor.poll(Some(Duration::from_millis(20))).unwrap();
    }
    assert_eq!(completed, &mut r1 as *mut Request, "only the first receive should complete");
    assert!(reactor.try_completion().is_null(), "second receive must remain pending");

    a.close().unwrap();
    reactor.deregister(a_token).unwrap();
    let completed = reactor.try_completion();
    assert_eq!(completed, &mut r2 as *mut Request, "r2 must be delivered on deregister after close");
    assert_eq!(r2.error(), Some(Error::System(ErrorKind::BadFileDescriptor)));
}

/// §8.4 — TCP accept/connect: the accepted socket's remote endpoint matches
/// the connecting client's local endpoint, and its local endpoint matches
/// the listener's.
#[test]
fn tcp_accept_connect_identity() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let listener = Socket::open("[::1]:0".parse().unwrap(), SocketType::Stream).unwrap();
    listener.bind(Endpoint::new("[::1]:0".parse().unwrap())).unwrap();
    listener.listen(8).unwrap();
    let listen_addr = listener.local_endpoint().unwrap();
    let listener_token = reactor.register(listener.native_handle().raw()).unwrap();

    let mut accept_req = Request::new();
    unsafe {
        reactor.start_accept(listener_token, &mut accept_req).unwrap();
    }

    let client = Socket::open("[::1]:0".parse().unwrap(), SocketType::Stream).unwrap();
    client.connect(listen_addr).unwrap();
    let client_addr = client.local_endpoint().unwrap();

    let mut completed = std::ptr::null_mut();
    for _ in 0..200 {
        let c = reactor.try_completion();
        if !c.is_null() {
            completed = c;
            break;
        }
        reactor.poll(Some(Duration::from_millis(20))).unwrap();
    }
    assert_eq!(completed, &mut accept_req as *mut Request, "accept never completed");
    assert!(accept_req.error().is_none(), "accept failed: {:?}", accept_req.error());
    match accept_req.op() {
        Op::Accept(op) => {
            let from = op.from.expect("accepted connection missing peer endpoint");
            assert_eq!(from.port(), client_addr.port());
        }
        other => panic!("unexpected op: {other:?}"),
    }

    reactor.deregister(listener_token).unwrap();
}

/// Async TCP connect: a non-blocking `connect` queued through the reactor
/// actually dials the listener (not just a same-tick `SO_ERROR` check) and
/// completes once the socket is writable.
#[test]
fn async_connect_reaches_listener() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let listener = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Stream).unwrap();
    listener.bind(Endpoint::new("127.0.0.1:0".parse().unwrap())).unwrap();
    listener.listen(8).unwrap();
    let listen_addr = listener.local_endpoint().unwrap();

    let client = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Stream).unwrap();
    let client_token = reactor.register(client.native_handle().raw()).unwrap();

    let mut connect_req = Request::new();
    unsafe {
        reactor.start_connect(client_token, &mut connect_req, listen_addr).unwrap();
    }

    // The three-way handshake completes against the listen backlog without
    // the test ever calling `accept`; that's enough for the client side to
    // observe itself as connected.
    let mut completed = std::ptr::null_mut();
    for _ in 0..200 {
        let c = reactor.try_completion();
        if !c.is_null() {
            completed = c;
            break;
        }
        reactor.poll(Some(Duration::from_millis(20))).unwrap();
    }
    assert_eq!(completed, &mut connect_req as *mut Request, "connect never completed");
    assert!(connect_req.error().is_none(), "connect failed: {:?}", connect_req.error());

    let (_accepted, peer) = listener.accept().unwrap();
    assert_eq!(peer.port(), client.local_endpoint().unwrap().port());

    reactor.deregister(client_token).unwrap();
}

/// §8 boundary behavior: a datagram receive with a buffer strictly smaller
/// than the message sets the truncated flag and reports the buffer's size,
/// not the original message's, as bytes transferred.
#[test]
fn undersized_buffer_reports_truncation() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let mut a = loopback_udp();
    let a_addr = a.local_endpoint().unwrap();
    let a_token = reactor.register(a.native_handle().raw()).unwrap();

    let b = loopback_udp();

    let mut small_buf = [0u8; 4];
    let mut recv_req = Request::new();
    unsafe {
        reactor.start_receive_from(a_token, &mut recv_req, &[Buffer::from_mut_slice(&mut small_buf)]).unwrap();
    }

    b.send_to(b"this message is longer than four bytes", a_addr).unwrap();

    let mut completed = std::ptr::null_mut();
    for _ in 0..200 {
        let c = reactor.try_completion();
        if !c.is_null() {
            completed = c;
            break;
        }
        reactor.poll(Some(Duration::from_millis(20))).unwrap();
    }
    assert_eq!(completed, &mut recv_req as *mut Request);
    assert!(recv_req.error().is_none());
    match recv_req.op() {
        Op::ReceiveFrom(op) => {
            assert!(op.truncated, "receive into an undersized buffer must set the truncated flag");
            assert_eq!(op.transferred, small_buf.len());
        }
        other => panic!("unexpected op: {other:?}"),
    }

    a.close().unwrap();
    reactor.deregister(a_token).unwrap();
}

/// §3/§4.4 — scatter/gather: a send gathers a message from two disjoint
/// buffers, and the matching receive scatters it across two more.
#[test]
fn vectored_send_receive_round_trip() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let mut a = loopback_udp();
    let a_addr = a.local_endpoint().unwrap();
    let a_token = reactor.register(a.native_handle().raw()).unwrap();

    let b = loopback_udp();
    let b_token = reactor.register(b.native_handle().raw()).unwrap();

    let mut head = [0u8; 5];
    let mut tail = [0u8; 5];
    let mut recv_req = Request::new();
    unsafe {
        reactor
            .start_receive_from(a_token, &mut recv_req, &[Buffer::from_mut_slice(&mut head), Buffer::from_mut_slice(&mut tail)])
            .unwrap();
    }

    let mut send_req = Request::new();
    unsafe {
        reactor
            .start_send_to(b_token, &mut send_req, &[Buffer::from_slice(b"hello"), Buffer::from_slice(b"world")], a_addr)
            .unwrap();
    }

    let mut seen_send = false;
    let mut seen_recv = false;
    for _ in 0..200 {
        if seen_send && seen_recv {
            break;
        }
        reactor.poll(Some(Duration::from_millis(20))).unwrap();
        loop {
            let done = reactor.try_completion();
            if done.is_null() {
                break;
            }
            if done == &mut send_req as *mut Request {
                seen_send = true;
            }
            if done == &mut recv_req as *mut Request {
                seen_recv = true;
            }
        }
    }
    assert!(seen_send && seen_recv);
    assert!(recv_req.error().is_none());
    match recv_req.op() {
        Op::ReceiveFrom(op) => assert_eq!(op.transferred, 10),
        other => panic!("unexpected op: {other:?}"),
    }
    assert_eq!(&head, b"hello");
    assert_eq!(&tail, b"world");

    a.close().unwrap();
    reactor.deregister(a_token).unwrap();
    reactor.deregister(b_token).unwrap();
}

/// §4.4/§8 — a buffer list longer than the platform iov cap is rejected
/// synchronously, before the request is ever queued.
#[test]
fn oversized_buffer_list_fails_synchronously() {
    drop(env_logger::try_init());
    let reactor = Reactor::new().unwrap();

    let a = loopback_udp();
    let a_token = reactor.register(a.native_handle().raw()).unwrap();

    let mut scratch = [0u8; 4];
    let one = Buffer::from_mut_slice(&mut scratch);
    let too_many = vec![one; vortex::net::buffer::MAX_IOV_LEN + 1];
    let mut recv_req = Request::new();
    let result = unsafe { reactor.start_receive_from(a_token, &mut recv_req, &too_many) };
    match result {
        Err(Error::System(ErrorKind::ArgumentListTooLong)) => {}
        other => panic!("expected argument_list_too_long, got {other:?}"),
    }
    assert!(recv_req.is_idle(), "a rejected op must never touch the request");

    reactor.deregister(a_token).unwrap();
}

/// §8.5 — timer ordering: T2 (+20ms), T1 (+50ms), T3 (+70ms) fire in
/// deadline order within a single `run_for` window.
#[test]
fn timer_ordering() {
    drop(env_logger::try_init());
    let service = Service::new().unwrap();

    let mut t1 = Request::new();
    let mut t2 = Request::new();
    let mut t3 = Request::new();
    unsafe {
        service.post_after(Duration::from_millis(50), &mut t1);
        service.post_after(Duration::from_millis(20), &mut t2);
        service.post_after(Duration::from_millis(70), &mut t3);
    }

    let mut order = Vec::new();
    service
        .run_for(Duration::from_millis(150), |r| {
            if r == &mut t1 as *mut Request {
                order.push(1);
            } else if r == &mut t2 as *mut Request {
                order.push(2);
            } else if r == &mut t3 as *mut Request {
                order.push(3);
            }
        })
        .unwrap();

    assert_eq!(order, vec![2, 1, 3]);
}

/// §8.6 — MPSC FIFO: two producers pushing monotonically tagged nodes
/// preserve per-producer order under concurrent draining.
#[test]
fn mpsc_preserves_per_producer_order_under_concurrency() {
    drop(env_logger::try_init());
    use std::sync::Arc;
    use std::thread;
    use vortex::intrusive::mpsc::Mpsc;
    use vortex::intrusive::{Hook, Link};

    struct Node {
        link: Link<Node>,
        producer: u32,
        tag: u32,
    }
    unsafe impl Hook for Node {
        fn link(&self) -> &Link<Node> {
            &self.link
        }
    }

    const N: u32 = 10_000;
    let queue = Arc::new(Mpsc::<Node>::new());

    let handles: Vec<_> = (0..2u32)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut nodes = Vec::with_capacity(N as usize);
                for tag in 0..N {
                    let node = Box::into_raw(Box::new(Node { link: Link::new(), producer, tag }));
                    unsafe {
                        queue.push(node);
                    }
                    nodes.push(node);
                }
                nodes
            })
        })
        .collect();

    let mut last = [None::<u32>, None::<u32>];
    let mut drained = 0u32;
    let mut owned = Vec::new();
    while drained < N * 2 {
        let node = queue.try_pop();
        if node.is_null() {
            thread::yield_now();
            continue;
        }
        unsafe {
            let n = &*node;
            if let Some(prev) = last[n.producer as usize] {
                assert!(n.tag > prev, "per-producer FIFO order violated");
            }
            last[n.producer as usize] = Some(n.tag);
        }
        owned.push(node);
        drained += 1;
    }

    for h in handles {
        h.join().unwrap();
    }
    for node in owned {
        unsafe {
            drop(Box::from_raw(node));
        }
    }
}
