//! WinSock syscall wrappers backing [`crate::net::socket`].
//!
//! Every wrapper here issues a blocking WinSock call; the reactor's IOCP
//! backend bypasses these entirely in favor of the overlapped `AcceptEx`/
//! `ConnectEx`/`WSASend`/`WSARecv` forms, which need the extension function
//! pointers [`crate::init`] resolves once at process startup.

use std::mem;
use std::net::SocketAddr;

use windows_sys::Win32::Networking::WinSock as ws;

use crate::error::{last_os_error, Error, ErrorKind, Result};
use crate::net::buffer::{Buffer, MAX_IOV_LEN};
use crate::net::endpoint::Endpoint;
use crate::net::handle::{NativeHandle, RawHandle, INVALID_HANDLE};
use crate::net::SocketType;

pub fn family_of(addr: &SocketAddr) -> i32 {
    if addr.is_ipv4() {
        ws::AF_INET as i32
    } else {
        ws::AF_INET6 as i32
    }
}

fn socket_type(kind: SocketType) -> i32 {
    match kind {
        SocketType::Stream => ws::SOCK_STREAM as i32,
        SocketType::Datagram => ws::SOCK_DGRAM as i32,
    }
}

pub fn open(family: i32, kind: SocketType) -> Result<NativeHandle> {
    crate::init::ensure();
    let handle = unsafe { ws::socket(family, socket_type(kind), 0) };
    if handle != INVALID_HANDLE {
        Ok(unsafe { NativeHandle::from_raw(handle) })
    } else {
        Err(last_os_error())
    }
}

pub(crate) fn sockaddr_of(endpoint: &Endpoint) -> (ws::SOCKADDR_STORAGE, i32) {
    let mut storage: ws::SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let len = match endpoint.addr() {
        SocketAddr::V4(v4) => {
            let raw = ws::SOCKADDR_IN {
                sin_family: ws::AF_INET as u16,
                sin_port: v4.port().to_be(),
                sin_addr: ws::IN_ADDR {
                    S_un: ws::IN_ADDR_0 { S_addr: u32::from_ne_bytes(v4.ip().octets()) },
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut ws::SOCKADDR_IN, raw);
            }
            mem::size_of::<ws::SOCKADDR_IN>()
        }
        SocketAddr::V6(v6) => {
            let raw = ws::SOCKADDR_IN6 {
                sin6_family: ws::AF_INET6 as u16,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: ws::IN6_ADDR { u: ws::IN6_ADDR_0 { Byte: v6.ip().octets() } },
                Anonymous: ws::SOCKADDR_IN6_0 { sin6_scope_id: v6.scope_id() },
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut ws::SOCKADDR_IN6, raw);
            }
            mem::size_of::<ws::SOCKADDR_IN6>()
        }
    };
    (storage, len as i32)
}

pub(crate) fn endpoint_of(storage: &ws::SOCKADDR_STORAGE) -> Result<Endpoint> {
    match storage.ss_family as i32 {
        x if x == ws::AF_INET as i32 => {
            let raw = unsafe { &*(storage as *const _ as *const ws::SOCKADDR_IN) };
            let ip = std::net::Ipv4Addr::from(unsafe { raw.sin_addr.S_un.S_addr.to_ne_bytes() });
            let port = u16::from_be(raw.sin_port);
            Ok(Endpoint::new(SocketAddr::V4(std::net::SocketAddrV4::new(ip, port))))
        }
        x if x == ws::AF_INET6 as i32 => {
            let raw = unsafe { &*(storage as *const _ as *const ws::SOCKADDR_IN6) };
            let ip = std::net::Ipv6Addr::from(unsafe { raw.sin6_addr.u.Byte });
            let port = u16::from_be(raw.sin6_port);
            let scope_id = unsafe { raw.Anonymous.sin6_scope_id };
            Ok(Endpoint::new(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                port,
                raw.sin6_flowinfo,
                scope_id,
            ))))
        }
        _ => Err(Error::System(ErrorKind::InvalidArgument)),
    }
}

pub fn bind(handle: RawHandle, endpoint: &Endpoint) -> Result<()> {
    let (storage, len) = sockaddr_of(endpoint);
    if unsafe { ws::bind(handle, &storage as *const _ as *const ws::SOCKADDR, len) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

/// Windows refuses to `listen` on a socket that was never explicitly bound;
/// callers that want an ephemeral listening port must `bind` to
/// `0.0.0.0:0`/`[::]:0` first, same as on POSIX.
pub fn listen(handle: RawHandle, backlog: i32) -> Result<()> {
    if unsafe { ws::listen(handle, backlog) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn connect(handle: RawHandle, endpoint: &Endpoint) -> Result<()> {
    let (storage, len) = sockaddr_of(endpoint);
    if unsafe { ws::connect(handle, &storage as *const _ as *const ws::SOCKADDR, len) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn accept(handle: RawHandle) -> Result<(NativeHandle, Endpoint)> {
    let mut storage: ws::SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<ws::SOCKADDR_STORAGE>() as i32;
    let accepted = unsafe {
        ws::accept(handle, &mut storage as *mut _ as *mut ws::SOCKADDR, &mut len)
    };
    if accepted == INVALID_HANDLE {
        return Err(last_os_error());
    }
    let endpoint = endpoint_of(&storage)?;
    Ok((unsafe { NativeHandle::from_raw(accepted) }, endpoint))
}

/// Build a fixed-size `WSABUF` array from a scatter/gather list. Callers
/// have already run the list past `validate_iov_len`, so `buffers.len()`
/// never exceeds `MAX_IOV_LEN` here.
fn wsabufs_of(buffers: &[Buffer]) -> [ws::WSABUF; MAX_IOV_LEN] {
    let mut wsabufs: [ws::WSABUF; MAX_IOV_LEN] = unsafe { mem::zeroed() };
    for (slot, buf) in wsabufs.iter_mut().zip(buffers) {
        *slot = ws::WSABUF { len: buf.len() as u32, buf: unsafe { buf.as_mut_slice().as_mut_ptr() } };
    }
    wsabufs
}

pub fn send_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32) -> Result<usize> {
    let mut wsabufs = wsabufs_of(buffers);
    let mut sent = 0u32;
    let rc = unsafe {
        ws::WSASend(handle, wsabufs.as_mut_ptr(), buffers.len() as u32, &mut sent, flags as u32, std::ptr::null_mut(), None)
    };
    if rc == 0 {
        Ok(sent as usize)
    } else {
        Err(last_os_error())
    }
}

pub fn send_to_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32, to: &Endpoint) -> Result<usize> {
    let (storage, len) = sockaddr_of(to);
    let mut wsabufs = wsabufs_of(buffers);
    let mut sent = 0u32;
    let rc = unsafe {
        ws::WSASendTo(
            handle,
            wsabufs.as_mut_ptr(),
            buffers.len() as u32,
            &mut sent,
            flags as u32,
            &storage as *const _ as *const ws::SOCKADDR,
            len,
            std::ptr::null_mut(),
            None,
        )
    };
    if rc == 0 {
        Ok(sent as usize)
    } else {
        Err(last_os_error())
    }
}

/// `WSARecv`, but `WSAEMSGSIZE` (the datagram didn't fit `buffers`) is
/// reported as success-with-truncation rather than an error: WinSock still
/// delivers the first `buffers`-worth of bytes of an oversized datagram
/// before raising that error code, matching `spec.md` §4.6's
/// "message_too_large (encoded as a flag on receive)".
pub fn receive_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32) -> Result<(usize, bool)> {
    let mut wsabufs = wsabufs_of(buffers);
    let mut received = 0u32;
    let mut out_flags = flags as u32;
    let rc = unsafe {
        ws::WSARecv(handle, wsabufs.as_mut_ptr(), buffers.len() as u32, &mut received, &mut out_flags, std::ptr::null_mut(), None)
    };
    if rc == 0 {
        return Ok((received as usize, false));
    }
    if is_message_too_large() {
        let total: usize = buffers.iter().map(Buffer::len).sum();
        return Ok((total, true));
    }
    Err(last_os_error())
}

/// See [`receive_vectored`]; same truncation handling, with the sender's
/// address filled in via `WSARecvFrom`.
pub fn receive_from_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32) -> Result<(usize, Endpoint, bool)> {
    let mut storage: ws::SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<ws::SOCKADDR_STORAGE>() as i32;
    let mut wsabufs = wsabufs_of(buffers);
    let mut received = 0u32;
    let mut out_flags = flags as u32;
    let rc = unsafe {
        ws::WSARecvFrom(
            handle,
            wsabufs.as_mut_ptr(),
            buffers.len() as u32,
            &mut received,
            &mut out_flags,
            &mut storage as *mut _ as *mut ws::SOCKADDR,
            &mut len,
            std::ptr::null_mut(),
            None,
        )
    };
    if rc == 0 {
        let endpoint = endpoint_of(&storage)?;
        return Ok((received as usize, endpoint, false));
    }
    if is_message_too_large() {
        // `WSARecvFrom` still fills in the sender's address on `WSAEMSGSIZE`.
        let endpoint = endpoint_of(&storage)?;
        let total: usize = buffers.iter().map(Buffer::len).sum();
        return Ok((total, endpoint, true));
    }
    Err(last_os_error())
}

fn is_message_too_large() -> bool {
    std::io::Error::last_os_error().raw_os_error() == Some(ws::WSAEMSGSIZE)
}

/// Remap `WSAEDESTADDRREQ` (a send on an unconnected datagram socket with
/// no destination) onto the portable `not_connected` kind, aligning with
/// the POSIX `EDESTADDRREQ`/`EPIPE` behavior `reactor::sys::unix_common`
/// already normalizes the same way (`spec.md` §4.2). Unlike the POSIX side,
/// WinSock has no broken-pipe equivalent of `EPIPE` to pair it with — a
/// send after the peer resets the connection surfaces as `WSAECONNRESET`,
/// which `ErrorKind::from(io::Error)` already maps to `ConnectionReset`
/// without help from this function. Operates on the already-captured
/// `Error` rather than re-reading the thread-local last error, since an
/// intervening call could have clobbered it.
pub fn remap_connection_error(error: Error) -> Error {
    match error {
        Error::System(ErrorKind::Other(code)) if code == ws::WSAEDESTADDRREQ as i32 => {
            Error::System(ErrorKind::NotConnected)
        }
        other => other,
    }
}

/// `spec.md` §4.3: "Invalid-socket errors are normalized to
/// `bad_file_descriptor`." Both `WSAENOTSOCK` and `WSA_INVALID_HANDLE` (the
/// two codes `__impl.iocp.cpp` remaps to `WSAEBADF` the same way) collapse
/// onto the portable kind.
pub fn remap_invalid_socket(error: Error) -> Error {
    match error {
        Error::System(ErrorKind::Other(code))
            if code == ws::WSAENOTSOCK as i32 || code == ws::WSA_INVALID_HANDLE as i32 =>
        {
            Error::System(ErrorKind::BadFileDescriptor)
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

pub fn shutdown(handle: RawHandle, how: Shutdown) -> Result<()> {
    let how = match how {
        Shutdown::Read => ws::SD_RECEIVE,
        Shutdown::Write => ws::SD_SEND,
        Shutdown::Both => ws::SD_BOTH,
    };
    if unsafe { ws::shutdown(handle, how) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn local_endpoint(handle: RawHandle) -> Result<Endpoint> {
    let mut storage: ws::SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<ws::SOCKADDR_STORAGE>() as i32;
    if unsafe { ws::getsockname(handle, &mut storage as *mut _ as *mut ws::SOCKADDR, &mut len) } != 0 {
        return Err(last_os_error());
    }
    endpoint_of(&storage)
}

pub fn remote_endpoint(handle: RawHandle) -> Result<Endpoint> {
    let mut storage: ws::SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<ws::SOCKADDR_STORAGE>() as i32;
    if unsafe { ws::getpeername(handle, &mut storage as *mut _ as *mut ws::SOCKADDR, &mut len) } != 0 {
        return Err(last_os_error());
    }
    endpoint_of(&storage)
}

pub fn set_non_blocking(handle: RawHandle) -> Result<()> {
    let mut mode: u32 = 1;
    if unsafe { ws::ioctlsocket(handle, ws::FIONBIO, &mut mode) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn is_connect_in_progress(error: &Error) -> bool {
    matches!(error, Error::System(ErrorKind::WouldBlock))
}

pub fn take_pending_error(handle: RawHandle) -> Result<()> {
    let mut error: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;
    let rc = unsafe {
        ws::getsockopt(
            handle,
            ws::SOL_SOCKET as i32,
            ws::SO_ERROR as i32,
            &mut error as *mut _ as *mut u8,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(last_os_error());
    }
    if error == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(error).into())
    }
}
