//! Tagged address + port storage.
//!
//! Formatting follows the platform's textual convention: dotted-decimal for
//! v4, RFC 5952 bracketed for v6 when a port is present. `Endpoint` wraps
//! `std::net::SocketAddr` and adds the `to_chars`/`from_chars` contract,
//! including the boundary behavior for undersized output buffers.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

/// Large enough for the textual form of any IPv6 endpoint with a port:
/// `[xxxx:xxxx:xxxx:xxxx:xxxx:xxxx:255.255.255.255]:65535`.
pub const MAX_CHARS: usize = 64;

/// A tagged address (v4 or v6) plus port plus (for v6) scope id.
///
/// Invariant: a textual rendering never exceeds [`MAX_CHARS`]; `to_chars`
/// checks the caller-supplied output buffer against the rendered length and
/// reports an error rather than truncating (see [`Endpoint::to_chars`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    pub const fn new(addr: SocketAddr) -> Self {
        Endpoint { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_v6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// IPv6 zone/scope id, if this is a v6 endpoint carrying one. `std`'s
    /// `SocketAddrV6` always has a scope id field (0 when unused).
    pub fn scope_id(&self) -> u32 {
        match self.addr {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        }
    }

    /// Render into `buf`, returning the number of bytes written.
    ///
    /// Dotted-decimal for IPv4; RFC 5952 with brackets around the address
    /// when combined with a port for IPv6 (`[::1]:60000`) — exactly what
    /// `SocketAddr`'s `Display` impl already produces.
    pub fn to_chars<'a>(&self, buf: &'a mut [u8]) -> Result<&'a str> {
        let text = self.addr.to_string();
        if text.len() > buf.len() {
            return Err(Error::System(ErrorKind::InvalidArgument));
        }
        buf[..text.len()].copy_from_slice(text.as_bytes());
        // SAFETY: `text` was valid UTF-8 and we copied it byte-for-byte.
        Ok(unsafe { std::str::from_utf8_unchecked(&buf[..text.len()]) })
    }

    /// Parse any textual form the platform's `inet_pton`-equivalent accepts,
    /// rejecting trailing garbage.
    pub fn from_chars(text: &str) -> Result<Self> {
        SocketAddr::from_str(text.trim_end())
            .map(Endpoint::new)
            .map_err(|_| Error::System(ErrorKind::InvalidArgument))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.addr, f)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.addr)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        ep.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips() {
        let ep = Endpoint::from_chars("127.0.0.1:8080").unwrap();
        let mut buf = [0u8; MAX_CHARS];
        let text = ep.to_chars(&mut buf).unwrap();
        assert_eq!(text, "127.0.0.1:8080");
        assert_eq!(Endpoint::from_chars(text).unwrap(), ep);
    }

    #[test]
    fn v6_brackets_with_port() {
        let ep = Endpoint::from_chars("[::1]:60000").unwrap();
        let mut buf = [0u8; MAX_CHARS];
        let text = ep.to_chars(&mut buf).unwrap();
        assert_eq!(text, "[::1]:60000");
    }

    #[test]
    fn short_buffer_fails() {
        let ep = Endpoint::from_chars("[::1]:60000").unwrap();
        let mut buf = [0u8; 4];
        assert!(ep.to_chars(&mut buf).is_err());
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(Endpoint::from_chars("127.0.0.1:80 trailing").is_err());
    }
}
