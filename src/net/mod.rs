//! Addressing, native handles, and the synchronous socket surface.
//!
//! Everything under [`reactor`](crate::reactor) and [`request`](crate::request)
//! builds on top of [`Socket`] and [`NativeHandle`] rather than duplicating
//! platform syscalls.

pub mod buffer;
pub mod endpoint;
pub mod handle;
pub mod options;
pub mod reuse_port;
pub mod socket;
pub(crate) mod sys;

pub use buffer::{Buffer, BufferList};
pub use endpoint::Endpoint;
pub use handle::NativeHandle;
pub use socket::{Shutdown, Socket, SocketType};
