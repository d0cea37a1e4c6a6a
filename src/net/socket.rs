//! Synchronous socket surface: the blocking-by-default operations a socket
//! supports before it is ever handed to a reactor. Registering a [`Socket`]
//! with a reactor switches it to non-blocking mode and routes send/receive/
//! accept/connect through the request machinery instead of these direct
//! calls; these remain usable for setup (bind/listen) and for sockets that
//! are never registered at all.

use std::net::SocketAddr;

use crate::error::{Error, LogicError, Result};
use crate::net::buffer::{validate_iov_len, Buffer};
use crate::net::endpoint::Endpoint;
use crate::net::handle::NativeHandle;
use crate::net::options::{self, Option as SockOption};
use crate::net::sys;

/// Transport-layer shape of a socket. Determines whether `connect` is
/// required before data can flow and whether peer addresses travel with
/// every datagram or are fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

impl From<Shutdown> for sys::Shutdown {
    fn from(s: Shutdown) -> Self {
        match s {
            Shutdown::Read => sys::Shutdown::Read,
            Shutdown::Write => sys::Shutdown::Write,
            Shutdown::Both => sys::Shutdown::Both,
        }
    }
}

/// A socket not yet (or no longer) registered with a reactor.
#[derive(Debug)]
pub struct Socket {
    handle: NativeHandle,
    kind: SocketType,
}

impl Socket {
    /// Create a new socket for `addr`'s address family and `kind`.
    pub fn open(addr: SocketAddr, kind: SocketType) -> Result<Self> {
        let family = sys::family_of(&addr);
        let handle = sys::open(family, kind)?;
        Ok(Socket { handle, kind })
    }

    /// Adopt an already-open native handle, e.g. one returned by `accept`.
    ///
    /// # Safety
    /// `handle` must be a valid, otherwise-unowned socket handle of the
    /// given `kind`.
    pub unsafe fn from_native(handle: NativeHandle, kind: SocketType) -> Self {
        Socket { handle, kind }
    }

    pub fn kind(&self) -> SocketType {
        self.kind
    }

    pub fn native_handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn bind(&self, endpoint: Endpoint) -> Result<()> {
        sys::bind(self.handle.raw(), &endpoint)
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        if self.kind != SocketType::Stream {
            return Err(Error::Logic(LogicError::Unsupported));
        }
        sys::listen(self.handle.raw(), backlog)
    }

    pub fn connect(&self, endpoint: Endpoint) -> Result<()> {
        sys::connect(self.handle.raw(), &endpoint)
    }

    pub fn accept(&self) -> Result<(Socket, Endpoint)> {
        if self.kind != SocketType::Stream {
            return Err(Error::Logic(LogicError::Unsupported));
        }
        let (handle, endpoint) = sys::accept(self.handle.raw())?;
        Ok((unsafe { Socket::from_native(handle, SocketType::Stream) }, endpoint))
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        self.send_vectored(&[Buffer::from_slice(buf)])
    }

    pub fn send_to(&self, buf: &[u8], to: Endpoint) -> Result<usize> {
        self.send_to_vectored(&[Buffer::from_slice(buf)], to)
    }

    pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        let (n, _truncated) = self.receive_vectored(&[Buffer::from_mut_slice(buf)])?;
        Ok(n)
    }

    pub fn receive_from(&self, buf: &mut [u8]) -> Result<(usize, Endpoint)> {
        let (n, from, _truncated) = self.receive_from_vectored(&[Buffer::from_mut_slice(buf)])?;
        Ok((n, from))
    }

    /// Scatter/gather send: `buffers` is capped at
    /// [`crate::net::buffer::MAX_IOV_LEN`], checked before the syscall runs.
    pub fn send_vectored(&self, buffers: &[Buffer]) -> Result<usize> {
        validate_iov_len(buffers.len())?;
        sys::send_vectored(self.handle.raw(), buffers, 0)
    }

    pub fn send_to_vectored(&self, buffers: &[Buffer], to: Endpoint) -> Result<usize> {
        validate_iov_len(buffers.len())?;
        sys::send_to_vectored(self.handle.raw(), buffers, 0, &to)
    }

    /// Returns `(bytes_received, truncated)`; see [`crate::request::Receive::truncated`].
    pub fn receive_vectored(&self, buffers: &[Buffer]) -> Result<(usize, bool)> {
        validate_iov_len(buffers.len())?;
        sys::receive_vectored(self.handle.raw(), buffers, 0)
    }

    pub fn receive_from_vectored(&self, buffers: &[Buffer]) -> Result<(usize, Endpoint, bool)> {
        validate_iov_len(buffers.len())?;
        sys::receive_from_vectored(self.handle.raw(), buffers, 0)
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        sys::shutdown(self.handle.raw(), how.into())
    }

    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }

    pub fn local_endpoint(&self) -> Result<Endpoint> {
        sys::local_endpoint(self.handle.raw())
    }

    pub fn remote_endpoint(&self) -> Result<Endpoint> {
        sys::remote_endpoint(self.handle.raw())
    }

    pub fn set_option(&self, option: SockOption) -> Result<()> {
        options::set(&self.handle, option)
    }

    /// Query the option named by `option`'s discriminant; its carried value
    /// is ignored on the way in.
    pub fn get_option(&self, option: SockOption) -> Result<SockOption> {
        options::get(&self.handle, option)
    }

    pub fn set_non_blocking(&self, non_blocking: bool) -> Result<()> {
        self.set_option(SockOption::NonBlockingIo(non_blocking))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_loopback_round_trip() {
        let a = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        a.bind(Endpoint::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let a_addr = a.local_endpoint().unwrap();

        let b = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        b.bind(Endpoint::new("127.0.0.1:0".parse().unwrap())).unwrap();
        let b_addr = b.local_endpoint().unwrap();

        b.send_to(b"hello", a_addr).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = a.receive_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.port(), b_addr.port());
    }

    #[test]
    fn tcp_accept_connect_exchanges_bytes() {
        let listener = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Stream).unwrap();
        listener.bind(Endpoint::new("127.0.0.1:0".parse().unwrap())).unwrap();
        listener.listen(8).unwrap();
        let listen_addr = listener.local_endpoint().unwrap();

        let client = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Stream).unwrap();
        client.connect(listen_addr).unwrap();

        let (server_side, _peer) = listener.accept().unwrap();
        client.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = server_side.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn accept_on_datagram_socket_is_unsupported() {
        let s = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        match s.accept() {
            Err(Error::Logic(LogicError::Unsupported)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }
}
