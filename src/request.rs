//! The per-operation state a socket carries while an asynchronous send,
//! receive, connect, or accept is in flight.
//!
//! A [`Request`] is a closed set of operation shapes rather than a trait
//! object: every backend (epoll, kqueue, IOCP) needs to downcast to the
//! concrete shape to drive the right syscall, and a fixed-size enum keeps
//! requests poolable in a caller-owned free list instead of going through
//! the allocator per operation. `Request` also carries the intrusive
//! [`Link`] that lets it live in a [`Fifo`](crate::intrusive::fifo::Fifo) or
//! [`Mpsc`](crate::intrusive::mpsc::Mpsc) queue without a second allocation.

use std::cell::Cell;
use std::time::Instant;

use crate::error::Error;
use crate::intrusive::{Hook, Link};
use crate::net::endpoint::Endpoint;
use crate::net::handle::NativeHandle;

pub use crate::net::buffer::{Buffer, BufferList};

#[derive(Debug, Clone, Copy, Default)]
pub struct Send {
    pub buffers: BufferList,
    pub transferred: usize,
    /// Scratch `WSABUF` array the overlapped `WSASend` call writes through;
    /// must outlive `issue()` the same way `buffers`' own backing storage
    /// does, so it lives in the request rather than on `issue`'s stack.
    #[cfg(windows)]
    pub(crate) wsabufs: crate::reactor::sys::iocp::WsaBufArray,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Receive {
    pub buffers: BufferList,
    pub transferred: usize,
    /// Set when the datagram was larger than `buffers`' total capacity and
    /// got truncated to fit; `transferred` is then that capacity, not the
    /// original message's size. Stream sockets never set this.
    pub truncated: bool,
    #[cfg(windows)]
    pub(crate) wsabufs: crate::reactor::sys::iocp::WsaBufArray,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendTo {
    pub buffers: BufferList,
    pub to: Option<Endpoint>,
    pub transferred: usize,
    #[cfg(windows)]
    pub(crate) wsabufs: crate::reactor::sys::iocp::WsaBufArray,
    /// Destination address storage for the overlapped `WSASendTo` call; see
    /// `wsabufs`'s doc for why this lives here instead of on `issue`'s stack.
    #[cfg(windows)]
    pub(crate) to_storage: crate::reactor::sys::iocp::SockAddrStorage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveFrom {
    pub buffers: BufferList,
    pub from: Option<Endpoint>,
    pub transferred: usize,
    /// See [`Receive::truncated`].
    pub truncated: bool,
    #[cfg(windows)]
    pub(crate) wsabufs: crate::reactor::sys::iocp::WsaBufArray,
    /// Sender address storage the overlapped `WSARecvFrom` call writes into
    /// on completion; see `wsabufs`'s doc for why this lives here instead of
    /// on `issue`'s stack.
    #[cfg(windows)]
    pub(crate) from_storage: crate::reactor::sys::iocp::SockAddrStorage,
    #[cfg(windows)]
    pub(crate) from_storage_len: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Connect {
    pub to: Option<Endpoint>,
}

#[derive(Debug, Default)]
pub struct Accept {
    pub accepted: Option<NativeHandle>,
    pub from: Option<Endpoint>,
    /// Output buffer for `AcceptEx`'s packed local/remote address pair.
    /// Unused on the readiness-based backends.
    pub(crate) addr_buf: Option<Buffer>,
}

/// Which operation (if any) this request currently represents.
#[derive(Debug)]
pub enum Op {
    None,
    Send(Send),
    Receive(Receive),
    SendTo(SendTo),
    ReceiveFrom(ReceiveFrom),
    Connect(Connect),
    Accept(Accept),
}

impl Default for Op {
    fn default() -> Self {
        Op::None
    }
}

/// One outstanding asynchronous operation on one socket.
///
/// Completion is reported through `error`/`op`: a reactor backend fills in
/// `op`'s transferred-bytes/peer-endpoint/accepted-handle fields (or sets
/// `error`) before handing the request back to its owner via the
/// completion queue. A freshly constructed or reset `Request` holds
/// `Op::None` and no error — pushing it into a pending queue without first
/// setting a real `op` is a programmer mistake the caller is expected not
/// to make, not a recoverable runtime condition.
///
/// `#[repr(C)]` with the Windows overlapped control block as the first field
/// lets the IOCP backend recover a `*mut Request` directly from the
/// `OVERLAPPED*` a completion packet carries, with no side table.
///
/// `deadline`/`seq` are unused by any reactor backend; they exist so
/// [`crate::task::Service`] can reuse `Request` itself as the unit posted
/// into the timer set, rather than introducing a second caller-owned node
/// type with its own intrusive hook.
#[repr(C)]
pub struct Request {
    #[cfg(windows)]
    pub(crate) overlapped: crate::reactor::sys::iocp::Overlapped,
    link: Link<Request>,
    op: Op,
    error: Cell<Option<Error>>,
    deadline: Cell<Option<Instant>>,
    seq: Cell<u64>,
}

impl Request {
    pub fn new() -> Self {
        Request {
            #[cfg(windows)]
            overlapped: crate::reactor::sys::iocp::Overlapped::new(),
            link: Link::new(),
            op: Op::None,
            error: Cell::new(None),
            deadline: Cell::new(None),
            seq: Cell::new(0),
        }
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn op_mut(&mut self) -> &mut Op {
        &mut self.op
    }

    pub fn set_op(&mut self, op: Op) {
        self.op = op;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.op, Op::None)
    }

    pub fn error(&self) -> Option<Error> {
        self.error.get()
    }

    pub fn set_error(&self, error: Error) {
        self.error.set(Some(error));
    }

    pub fn clear_error(&self) {
        self.error.set(None);
    }

    /// The absolute instant [`crate::task::Service::post_after`] scheduled
    /// this request for, if it is currently linked into a timer set.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    pub(crate) fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadline.set(deadline);
    }

    /// Insertion sequence number, used only to break deadline ties in
    /// [`crate::task::Service`]'s timer set in post order.
    pub(crate) fn seq(&self) -> u64 {
        self.seq.get()
    }

    pub(crate) fn set_seq(&self, seq: u64) {
        self.seq.set(seq);
    }

    /// Return this request to its idle state, ready to be reused from a
    /// free list. Does not touch any caller-supplied buffer contents.
    pub fn reset(&mut self) {
        self.op = Op::None;
        self.error.set(None);
        self.deadline.set(None);
        self.seq.set(0);
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Hook for Request {
    fn link(&self) -> &Link<Request> {
        &self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_is_idle_and_error_free() {
        let r = Request::new();
        assert!(r.is_idle());
        assert!(r.error().is_none());
    }

    #[test]
    fn set_op_then_reset_returns_to_idle() {
        let mut r = Request::new();
        r.set_op(Op::Send(Send::default()));
        assert!(!r.is_idle());
        r.set_error(Error::System(crate::error::ErrorKind::WouldBlock));
        r.reset();
        assert!(r.is_idle());
        assert!(r.error().is_none());
    }

    #[test]
    fn buffer_round_trips_through_raw_parts() {
        let mut data = [1u8, 2, 3];
        let buffer = Buffer::from_mut_slice(&mut data);
        assert_eq!(buffer.len(), 3);
        unsafe {
            assert_eq!(buffer.as_slice(), &[1, 2, 3]);
        }
    }
}
