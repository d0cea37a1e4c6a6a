//! Vortex: a cross-platform, single-threaded asynchronous socket runtime.
//!
//! A [`reactor::Reactor`] owns one native readiness/completion primitive —
//! epoll on Linux, kqueue on BSD/macOS, an I/O completion port on Windows —
//! behind one contract. Applications issue socket operations through
//! caller-owned [`request::Request`] storage (never heap-allocated by this
//! crate on the hot path), register sockets with a reactor, and drive
//! completions by polling it. [`task::Service`] layers deferred and
//! timer-scheduled invocation on top, reusing the same `Request`/completion
//! queue machinery rather than inventing a second delivery path.
//!
//! Module map, leaves first:
//!
//! - [`intrusive`] — the non-owning FIFO, MPSC, and LIFO containers every
//!   pending/completion queue in this crate is built from.
//! - [`error`] — the portable error taxonomy every fallible operation
//!   returns, plus the system-error translation tables.
//! - [`net`] — native handles, endpoints, the synchronous socket surface,
//!   socket options, and the `reuse_port` load-balancing hook.
//! - [`request`] — the caller-owned, per-operation state a send, receive,
//!   connect, or accept is tracked through while in flight.
//! - [`reactor`] — registers sockets, drives the platform poller, dispatches
//!   completions; the three backends live under `reactor::sys`.
//! - [`task`] — `post`/`post_after`/`run`/`run_once`/`run_for`, a thin layer
//!   on top of a reactor for deferred and timer-scheduled work.
//!
//! Process-wide one-time setup ([`init`]) is internal: it runs lazily, the
//! first time anything needs it, rather than requiring an explicit call.

pub mod error;
pub(crate) mod init;
pub mod intrusive;
pub mod net;
pub mod reactor;
pub mod request;
pub mod task;

pub use error::{Error, ErrorKind, LogicError, Result};
pub use net::{Buffer, BufferList, Endpoint, NativeHandle, Shutdown, Socket, SocketType};
pub use reactor::{Direction, Reactor, Token};
pub use request::{Op, Request};
pub use task::Service;
