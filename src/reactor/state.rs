//! Per-socket bookkeeping the reactor keeps between registration and
//! deregistration: one pending-request queue per direction, each
//! independently corkable.

use crate::intrusive::fifo::Fifo;
use crate::net::handle::RawHandle;
use crate::request::Request;

/// Opaque handle a caller holds onto after [`crate::reactor::Reactor::register`]
/// and passes back into every `start_*`/`cork`/`uncork`/`deregister` call.
/// Backed by an index into the reactor's socket table, never a raw pointer,
/// so moving or growing that table can't invalidate a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub(crate) u64);

/// One direction's worth of in-flight requests on a socket.
#[derive(Default)]
pub struct Side {
    pub(crate) pending: Fifo<Request>,
    pub(crate) corked: bool,
}

impl Side {
    fn new() -> Self {
        Side { pending: Fifo::new(), corked: false }
    }
}

/// Everything the reactor tracks for one registered socket.
pub struct SocketState {
    pub(crate) handle: RawHandle,
    pub(crate) send: Side,
    pub(crate) receive: Side,
}

impl SocketState {
    pub(crate) fn new(handle: RawHandle) -> Self {
        SocketState { handle, send: Side::new(), receive: Side::new() }
    }
}
