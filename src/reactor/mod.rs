//! Reactor: the public face of the per-platform polling backend.
//!
//! A [`Reactor`] owns one OS multiplexing primitive (epoll, kqueue, or an
//! IOCP completion port, selected in [`sys`]) and the completion queue every
//! finished [`Request`] lands on regardless of which backend produced it.
//! Everything platform-specific — how readiness is discovered, whether an
//! operation is issued immediately or only once the socket is ready — stays
//! behind [`sys::PlatformReactor`]; this module only deals in [`Token`]s,
//! [`Direction`]s, and requests.

pub mod state;
pub(crate) mod sys;

use std::time::Duration;

use log::trace;

use crate::error::Result;
use crate::intrusive::mpsc::Mpsc;
use crate::net::buffer::{validate_iov_len, BufferList};
use crate::net::endpoint::Endpoint;
use crate::net::handle::RawHandle;
use crate::request::{
    Accept as AcceptOp, Buffer, Connect as ConnectOp, Op, Receive as ReceiveOp,
    ReceiveFrom as ReceiveFromOp, Request, Send as SendOp, SendTo as SendToOp,
};

pub use state::Token;

/// Which of a socket's two independently-corkable queues an operation
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// One reactor instance: one native multiplexer, one completion queue.
///
/// `Reactor` is `!Send`-adjacent in spirit — every `start_*`/`poll` call is
/// meant to run on the thread that owns it — but the completion queue itself
/// is an [`Mpsc`], so other threads may legally push onto it (a platform
/// backend's own poll loop is the only producer in this crate, but nothing
/// stops a caller from wiring up a second one).
pub struct Reactor {
    backend: sys::PlatformReactor,
    completed: Mpsc<Request>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Reactor { backend: sys::PlatformReactor::new()?, completed: Mpsc::new() })
    }

    /// Register `handle` and switch it to non-blocking mode. Returns a
    /// [`Token`] identifying it in every later call.
    pub fn register(&self, handle: RawHandle) -> Result<Token> {
        trace!("registering with poller");
        self.backend.register(handle)
    }

    /// Deregister `token`. Any request still pending on either side (queued
    /// but not yet completed) is delivered through [`Reactor::try_completion`]
    /// with `bad_file_descriptor`, matching `spec.md` §8's close invariant —
    /// callers are expected to call this after closing the underlying
    /// handle, not before, since the socket itself is not closed here.
    pub fn deregister(&self, token: Token) -> Result<()> {
        trace!("deregistering handle with poller");
        self.backend.deregister(token, &self.completed)
    }

    pub fn cork_send(&self, token: Token) -> Result<()> {
        self.backend.with_socket(token, |s| s.send.corked = true)
    }

    pub fn cork_receive(&self, token: Token) -> Result<()> {
        self.backend.with_socket(token, |s| s.receive.corked = true)
    }

    /// Uncork and immediately try to drive whatever built up while corked,
    /// rather than waiting for the next readiness notification (epoll/
    /// kqueue) or leaving it unissued (IOCP).
    pub fn uncork_send(&self, token: Token) -> Result<()> {
        self.backend.with_socket(token, |s| s.send.corked = false)?;
        self.backend.drain_now(token, &self.completed);
        Ok(())
    }

    pub fn uncork_receive(&self, token: Token) -> Result<()> {
        self.backend.with_socket(token, |s| s.receive.corked = false)?;
        self.backend.drain_now(token, &self.completed);
        Ok(())
    }

    /// # Safety
    /// `request` must be a valid, currently-idle pointer that stays alive and
    /// exclusively owned by this reactor until it reappears from
    /// [`Reactor::try_completion`].
    unsafe fn enqueue(&self, token: Token, direction: Direction, request: *mut Request) -> Result<()> {
        self.backend.with_socket(token, |s| {
            let side = match direction {
                Direction::Send => &mut s.send,
                Direction::Receive => &mut s.receive,
            };
            side.pending.push(request);
        })?;
        self.backend.drain_now(token, &self.completed);
        Ok(())
    }

    /// Each data op carries a scatter/gather list rather than one buffer. A
    /// list longer than the platform's portable iov cap is rejected here,
    /// synchronously and before `request` is touched at all — it never
    /// reaches the pending queue, matching `spec.md` §4.4/§8's
    /// `argument_list_too_long` behavior.
    ///
    /// # Safety
    /// See [`Reactor::enqueue`]; every `Buffer` in `buffers`, and `buffers`
    /// itself, must stay valid until completion.
    pub unsafe fn start_send(&self, token: Token, request: *mut Request, buffers: &[Buffer]) -> Result<()> {
        validate_iov_len(buffers.len())?;
        let mut op = SendOp::default();
        op.buffers = BufferList::from_slice(buffers);
        (*request).set_op(Op::Send(op));
        self.enqueue(token, Direction::Send, request)
    }

    /// # Safety
    /// See [`Reactor::start_send`].
    pub unsafe fn start_receive(&self, token: Token, request: *mut Request, buffers: &[Buffer]) -> Result<()> {
        validate_iov_len(buffers.len())?;
        let mut op = ReceiveOp::default();
        op.buffers = BufferList::from_slice(buffers);
        (*request).set_op(Op::Receive(op));
        self.enqueue(token, Direction::Receive, request)
    }

    /// # Safety
    /// See [`Reactor::start_send`].
    pub unsafe fn start_send_to(
        &self,
        token: Token,
        request: *mut Request,
        buffers: &[Buffer],
        to: Endpoint,
    ) -> Result<()> {
        validate_iov_len(buffers.len())?;
        let mut op = SendToOp::default();
        op.buffers = BufferList::from_slice(buffers);
        op.to = Some(to);
        (*request).set_op(Op::SendTo(op));
        self.enqueue(token, Direction::Send, request)
    }

    /// # Safety
    /// See [`Reactor::start_send`].
    pub unsafe fn start_receive_from(&self, token: Token, request: *mut Request, buffers: &[Buffer]) -> Result<()> {
        validate_iov_len(buffers.len())?;
        let mut op = ReceiveFromOp::default();
        op.buffers = BufferList::from_slice(buffers);
        (*request).set_op(Op::ReceiveFrom(op));
        self.enqueue(token, Direction::Receive, request)
    }

    /// Non-blocking connect: on the readiness backends this queues on the
    /// send side and completes once the socket reports writable (checked via
    /// the pending-error mechanism, not by re-calling `connect`). On Windows
    /// it goes straight to `ConnectEx`, which needs its own function pointer
    /// and skips the generic pending-queue dispatch entirely.
    ///
    /// # Safety
    /// See [`Reactor::enqueue`].
    #[cfg(unix)]
    pub unsafe fn start_connect(&self, token: Token, request: *mut Request, to: Endpoint) -> Result<()> {
        (*request).set_op(Op::Connect(ConnectOp { to: Some(to) }));
        self.enqueue(token, Direction::Send, request)
    }

    /// # Safety
    /// See [`Reactor::enqueue`].
    #[cfg(windows)]
    pub unsafe fn start_connect(&self, token: Token, request: *mut Request, to: Endpoint) -> Result<()> {
        (*request).set_op(Op::Connect(ConnectOp { to: Some(to) }));
        self.backend.start_connect(token, &mut *request, &to)
    }

    /// Accept a new connection. On the readiness backends this queues on the
    /// receive side (a listening socket becomes readable when a connection
    /// is waiting). On Windows, `AcceptEx` needs a freshly opened socket to
    /// receive the new connection into before it's issued, so the caller
    /// supplies one along with scratch space for the packed local/remote
    /// address pair `AcceptEx` writes on completion.
    ///
    /// # Safety
    /// See [`Reactor::enqueue`].
    #[cfg(unix)]
    pub unsafe fn start_accept(&self, token: Token, request: *mut Request) -> Result<()> {
        (*request).set_op(Op::Accept(AcceptOp::default()));
        self.enqueue(token, Direction::Receive, request)
    }

    /// # Safety
    /// See [`Reactor::enqueue`]; `addr_buf` must stay valid until completion
    /// and be at least twice the size of a `sockaddr_storage`, split evenly
    /// between local and remote address output.
    #[cfg(windows)]
    pub unsafe fn start_accept(
        &self,
        token: Token,
        request: *mut Request,
        accept_socket: crate::net::NativeHandle,
        addr_buf: &mut [u8],
    ) -> Result<()> {
        let raw = accept_socket.raw();
        (*request).set_op(Op::Accept(AcceptOp {
            accepted: Some(accept_socket),
            from: None,
            addr_buf: Some(Buffer::from_mut_slice(addr_buf)),
        }));
        self.backend.start_accept(token, &mut *request, raw, addr_buf)
    }

    /// Block up to `timeout` (or forever, if `None`) for new completions.
    /// Completed requests become visible through [`Reactor::try_completion`]
    /// afterward, not returned directly.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<()> {
        trace!("polling; timeout={:?}", timeout);
        self.backend.poll(timeout, &self.completed)
    }

    /// Pop the oldest completed request not yet claimed, or null if none are
    /// ready. Never blocks; callers that want to wait call [`Reactor::poll`]
    /// first.
    pub fn try_completion(&self) -> *mut Request {
        self.completed.try_pop()
    }

    /// Deliver `request` on the completion queue directly, bypassing every
    /// socket's pending queue. [`crate::task::Service`] is the only caller:
    /// a posted task or a fired timer is "completed" the moment it is due,
    /// with no socket or syscall involved.
    ///
    /// # Safety
    /// Same as [`Reactor::enqueue`]: `request` must be valid, idle, and not
    /// linked into any other container.
    pub(crate) unsafe fn post_immediate(&self, request: *mut Request) {
        self.completed.push(request);
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::net::{Endpoint as Ep, Socket, SocketType};

    #[test]
    fn udp_send_receive_round_trip_through_reactor() {
        let reactor = Reactor::new().unwrap();

        let a = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        a.bind(Ep::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let a_addr = a.local_endpoint().unwrap();
        let a_token = reactor.register(a.native_handle().raw()).unwrap();

        let b = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        b.bind(Ep::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let b_token = reactor.register(b.native_handle().raw()).unwrap();

        let mut send_req = Request::new();
        let payload = b"ping";
        unsafe {
            reactor
                .start_send_to(b_token, &mut send_req, &[Buffer::from_slice(payload)], a_addr)
                .unwrap();
        }

        let mut recv_buf = [0u8; 16];
        let mut recv_req = Request::new();
        unsafe {
            reactor
                .start_receive_from(a_token, &mut recv_req, &[Buffer::from_mut_slice(&mut recv_buf)])
                .unwrap();
        }

        let mut seen_send = false;
        let mut seen_recv = false;
        for _ in 0..10 {
            if seen_send && seen_recv {
                break;
            }
            reactor.poll(Some(Duration::from_millis(200))).unwrap();
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

        assert!(seen_send, "send never completed");
        assert!(seen_recv, "receive never completed");
        assert!(recv_req.error().is_none());
        match recv_req.op() {
            Op::ReceiveFrom(op) => assert_eq!(op.transferred, payload.len()),
            other => panic!("unexpected op: {other:?}"),
        }

        reactor.deregister(a_token).unwrap();
        reactor.deregister(b_token).unwrap();
    }

    #[test]
    fn cork_send_delays_completion_until_uncorked() {
        let reactor = Reactor::new().unwrap();

        let a = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        a.bind(Ep::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let a_addr = a.local_endpoint().unwrap();

        let b = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        b.bind(Ep::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let b_token = reactor.register(b.native_handle().raw()).unwrap();

        reactor.cork_send(b_token).unwrap();

        let mut send_req = Request::new();
        unsafe {
            reactor.start_send_to(b_token, &mut send_req, &[Buffer::from_slice(b"x")], a_addr).unwrap();
        }

        reactor.poll(Some(Duration::from_millis(50))).unwrap();
        assert!(reactor.try_completion().is_null(), "corked send completed anyway");

        reactor.uncork_send(b_token).unwrap();
        let completed = reactor.try_completion();
        assert!(!completed.is_null(), "uncork did not drive the pending send");

        reactor.deregister(b_token).unwrap();
    }
}
