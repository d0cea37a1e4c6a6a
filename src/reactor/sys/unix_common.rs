//! Draining logic shared by the epoll and kqueue backends: both are
//! readiness-based, so "a socket became readable/writable" reduces to the
//! same "run pending requests until one would block" loop either way. Only
//! how readiness is discovered differs between the two backends.

use log::trace;

use crate::error::{Error, ErrorKind};
use crate::intrusive::mpsc::Mpsc;
use crate::net::handle::RawHandle;
use crate::net::sys as net_sys;
use crate::reactor::state::Side;
use crate::request::{Op, Request};

fn remap_connection_error(error: Error) -> Error {
    match error {
        Error::System(ErrorKind::Other(code))
            if code == libc::EPIPE || code == libc::EDESTADDRREQ =>
        {
            Error::System(ErrorKind::NotConnected)
        }
        other => other,
    }
}

/// Drive one `Request`'s operation as far as it will go without blocking.
/// Returns `true` if the request is now complete (success or hard error,
/// including a connection failure), `false` if it must wait for the next
/// readiness notification.
pub(crate) fn execute_op(handle: RawHandle, request: &mut Request) -> bool {
    match request.op_mut() {
        Op::None => {
            debug_assert!(false, "executed an idle request");
            true
        }
        Op::Send(op) => {
            let buffers = unsafe { op.buffers.as_slice() };
            match net_sys::send_vectored(handle, buffers, net_sys::SEND_FLAGS) {
                Ok(n) => {
                    op.transferred = n;
                    request.clear_error();
                    true
                }
                Err(e) if e.is_would_block() => false,
                Err(e) => {
                    request.set_error(remap_connection_error(e));
                    true
                }
            }
        }
        Op::Receive(op) => {
            let buffers = unsafe { op.buffers.as_slice() };
            match net_sys::receive_vectored(handle, buffers, net_sys::RECV_FLAGS) {
                Ok((n, truncated)) => {
                    op.transferred = n;
                    op.truncated = truncated;
                    request.clear_error();
                    true
                }
                Err(e) if e.is_would_block() => false,
                Err(e) => {
                    request.set_error(e);
                    true
                }
            }
        }
        Op::SendTo(op) => {
            let buffers = unsafe { op.buffers.as_slice() };
            let to = op.to.expect("send_to request missing its destination");
            match net_sys::send_to_vectored(handle, buffers, net_sys::SEND_FLAGS, &to) {
                Ok(n) => {
                    op.transferred = n;
                    request.clear_error();
                    true
                }
                Err(e) if e.is_would_block() => false,
                Err(e) => {
                    request.set_error(remap_connection_error(e));
                    true
                }
            }
        }
        Op::ReceiveFrom(op) => {
            let buffers = unsafe { op.buffers.as_slice() };
            match net_sys::receive_from_vectored(handle, buffers, net_sys::RECV_FLAGS) {
                Ok((n, from, truncated)) => {
                    op.transferred = n;
                    op.from = Some(from);
                    op.truncated = truncated;
                    request.clear_error();
                    true
                }
                Err(e) if e.is_would_block() => false,
                Err(e) => {
                    request.set_error(e);
                    true
                }
            }
        }
        Op::Connect(op) => match op.to.take() {
            // First attempt: actually issue the connect. A non-blocking
            // connect almost always returns `EINPROGRESS`, in which case the
            // request stays queued until the socket reports writable; a
            // loopback connect can also complete (or fail) immediately.
            Some(to) => match net_sys::connect(handle, &to) {
                Ok(()) => {
                    request.clear_error();
                    true
                }
                Err(e) if net_sys::is_connect_in_progress(&e) => false,
                Err(e) => {
                    request.set_error(remap_connection_error(e));
                    true
                }
            },
            // Second attempt, driven by writable readiness: the connect was
            // already issued, so this is purely "did it succeed".
            None => match net_sys::take_pending_error(handle) {
                Ok(()) => {
                    request.clear_error();
                    true
                }
                Err(e) => {
                    request.set_error(e);
                    true
                }
            },
        },
        Op::Accept(op) => match net_sys::accept(handle) {
            Ok((accepted, from)) => {
                op.accepted = Some(accepted);
                op.from = Some(from);
                request.clear_error();
                true
            }
            Err(e) if e.is_would_block() => false,
            Err(e) => {
                request.set_error(e);
                true
            }
        },
    }
}

/// Run `side`'s pending queue until it empties or the head request would
/// block, pushing every completed request onto `completed`.
pub(crate) fn drain(handle: RawHandle, side: &mut Side, completed: &Mpsc<Request>) {
    trace!("draining pending queue");
    loop {
        let head = side.pending.head();
        if head.is_null() {
            break;
        }
        let request = unsafe { &mut *head };
        if execute_op(handle, request) {
            trace!("dispatching completion");
            side.pending.pop();
            unsafe {
                completed.push(head);
            }
        } else {
            break;
        }
    }
}

/// Fail every request currently pending on `side` with `error`, used when
/// the socket itself reports a hard error or hangup.
pub(crate) fn cancel_all(side: &mut Side, error: Error, completed: &Mpsc<Request>) {
    loop {
        let node = side.pending.pop();
        if node.is_null() {
            break;
        }
        unsafe {
            (*node).set_error(error);
            completed.push(node);
        }
    }
}
