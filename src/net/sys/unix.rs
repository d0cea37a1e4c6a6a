//! POSIX syscall wrappers backing [`crate::net::socket`].
//!
//! `open` remaps the platform's generic "bad argument" errno into
//! `protocol_not_supported` the same way on every POSIX target this crate
//! supports: Linux reports `EINVAL` for an unsupported socket triple, macOS
//! reports `EAFNOSUPPORT`. Every other wrapper here is a thin, EINTR-retrying
//! shim around the matching libc call.

use std::mem;
use std::net::SocketAddr;

use crate::error::{last_os_error, Error, ErrorKind, Result};
use crate::net::buffer::{Buffer, MAX_IOV_LEN};
use crate::net::endpoint::Endpoint;
use crate::net::handle::{NativeHandle, RawHandle, INVALID_HANDLE};
use crate::net::SocketType;

pub fn family_of(addr: &SocketAddr) -> libc::c_int {
    if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    }
}

fn socket_type(kind: SocketType) -> libc::c_int {
    match kind {
        SocketType::Stream => libc::SOCK_STREAM,
        SocketType::Datagram => libc::SOCK_DGRAM,
    }
}

#[cfg(target_os = "macos")]
fn disable_sigpipe(handle: RawHandle) {
    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            handle,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &optval as *const _ as *const libc::c_void,
            mem::size_of_val(&optval) as libc::socklen_t,
        );
    }
}

pub fn open(family: libc::c_int, kind: SocketType) -> Result<NativeHandle> {
    let handle = unsafe { libc::socket(family, socket_type(kind) | libc::SOCK_CLOEXEC, 0) };
    if handle != INVALID_HANDLE {
        #[cfg(target_os = "macos")]
        disable_sigpipe(handle);
        return Ok(unsafe { NativeHandle::from_raw(handle) });
    }

    let mut error = std::io::Error::last_os_error();
    if let Some(code) = error.raw_os_error() {
        let remapped = if cfg!(target_os = "linux") && code == libc::EINVAL {
            Some(libc::EPROTONOSUPPORT)
        } else if cfg!(target_os = "macos") && code == libc::EAFNOSUPPORT {
            Some(libc::EPROTONOSUPPORT)
        } else {
            None
        };
        if let Some(remapped) = remapped {
            error = std::io::Error::from_raw_os_error(remapped);
        }
    }
    Err(error.into())
}

fn sockaddr_of(endpoint: &Endpoint) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match endpoint.addr() {
        SocketAddr::V4(v4) => {
            let raw = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, raw);
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let raw = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, raw);
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn endpoint_of(storage: &libc::sockaddr_storage) -> Result<Endpoint> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(raw.sin_port);
            Ok(Endpoint::new(SocketAddr::V4(std::net::SocketAddrV4::new(ip, port))))
        }
        libc::AF_INET6 => {
            let raw = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(raw.sin6_addr.s6_addr);
            let port = u16::from_be(raw.sin6_port);
            Ok(Endpoint::new(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                port,
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            ))))
        }
        _ => Err(Error::System(ErrorKind::InvalidArgument)),
    }
}

pub fn bind(handle: RawHandle, endpoint: &Endpoint) -> Result<()> {
    let (storage, len) = sockaddr_of(endpoint);
    let rc = unsafe { libc::bind(handle, &storage as *const _ as *const libc::sockaddr, len) };
    if rc == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn listen(handle: RawHandle, backlog: i32) -> Result<()> {
    if unsafe { libc::listen(handle, backlog) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn connect(handle: RawHandle, endpoint: &Endpoint) -> Result<()> {
    let (storage, len) = sockaddr_of(endpoint);
    let rc = unsafe { libc::connect(handle, &storage as *const _ as *const libc::sockaddr, len) };
    if rc == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn accept(handle: RawHandle) -> Result<(NativeHandle, Endpoint)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let accepted = unsafe {
        libc::accept4(
            handle,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC,
        )
    };
    if accepted == INVALID_HANDLE {
        return Err(last_os_error());
    }
    let endpoint = endpoint_of(&storage)?;
    Ok((unsafe { NativeHandle::from_raw(accepted) }, endpoint))
}

/// Build a fixed-size iovec array from a scatter/gather list. Callers have
/// already run the list past `validate_iov_len`, so `buffers.len()` never
/// exceeds `MAX_IOV_LEN` here.
fn iovecs_of(buffers: &[Buffer]) -> [libc::iovec; MAX_IOV_LEN] {
    let mut iov: [libc::iovec; MAX_IOV_LEN] = unsafe { mem::zeroed() };
    for (slot, buf) in iov.iter_mut().zip(buffers) {
        *slot = libc::iovec { iov_base: unsafe { buf.as_mut_slice().as_mut_ptr() as *mut libc::c_void }, iov_len: buf.len() };
    }
    iov
}

pub fn send_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32) -> Result<usize> {
    let iov = iovecs_of(buffers);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = buffers.len() as _;
    let rc = unsafe { libc::sendmsg(handle, &msg, flags) };
    if rc >= 0 {
        Ok(rc as usize)
    } else {
        Err(last_os_error())
    }
}

pub fn send_to_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32, to: &Endpoint) -> Result<usize> {
    let (storage, len) = sockaddr_of(to);
    let iov = iovecs_of(buffers);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &storage as *const _ as *mut libc::c_void;
    msg.msg_namelen = len;
    msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = buffers.len() as _;
    let rc = unsafe { libc::sendmsg(handle, &msg, flags) };
    if rc >= 0 {
        Ok(rc as usize)
    } else {
        Err(last_os_error())
    }
}

/// `recvmsg` over the whole scatter/gather list, used instead of plain
/// `recv` when the caller needs to know whether the datagram was truncated
/// to fit `buffers`: `recv`/`recvfrom`'s return value alone is ambiguous for
/// that on BSD (it reports the bytes copied, not the original message size,
/// so a short buffer and an exact fit look the same), while `msghdr::
/// msg_flags & MSG_TRUNC` after `recvmsg` is unambiguous on every POSIX
/// target.
pub fn receive_vectored(handle: RawHandle, buffers: &[Buffer], flags: i32) -> Result<(usize, bool)> {
    let iov = iovecs_of(buffers);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = buffers.len() as _;
    let rc = unsafe { libc::recvmsg(handle, &mut msg, flags) };
    if rc < 0 {
        return Err(last_os_error());
    }
    Ok((rc as usize, msg.msg_flags & libc::MSG_TRUNC != 0))
}

/// See [`receive_vectored`]; same truncation detection, with the sender's
/// address filled in via `msg_name`.
pub fn receive_from_vectored(
    handle: RawHandle,
    buffers: &[Buffer],
    flags: i32,
) -> Result<(usize, Endpoint, bool)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let iov = iovecs_of(buffers);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut storage as *mut _ as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = buffers.len() as _;
    let rc = unsafe { libc::recvmsg(handle, &mut msg, flags) };
    if rc < 0 {
        return Err(last_os_error());
    }
    let endpoint = endpoint_of(&storage)?;
    Ok((rc as usize, endpoint, msg.msg_flags & libc::MSG_TRUNC != 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

pub fn shutdown(handle: RawHandle, how: Shutdown) -> Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    if unsafe { libc::shutdown(handle, how) } == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub fn local_endpoint(handle: RawHandle) -> Result<Endpoint> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if unsafe { libc::getsockname(handle, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) } != 0 {
        return Err(last_os_error());
    }
    endpoint_of(&storage)
}

pub fn remote_endpoint(handle: RawHandle) -> Result<Endpoint> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if unsafe { libc::getpeername(handle, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) } != 0 {
        return Err(last_os_error());
    }
    endpoint_of(&storage)
}

pub fn set_non_blocking(handle: RawHandle) -> Result<()> {
    let flags = unsafe { libc::fcntl(handle, libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(last_os_error());
    }
    if unsafe { libc::fcntl(handle, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        Err(last_os_error())
    } else {
        Ok(())
    }
}

/// `EINPROGRESS` from a non-blocking `connect` isn't a terminal error: the
/// connection completes asynchronously and is reported through writable
/// readiness, same as a would-block send.
pub fn is_connect_in_progress(error: &Error) -> bool {
    matches!(error, Error::System(ErrorKind::Other(code)) if *code == libc::EINPROGRESS)
}

/// Read and clear `SO_ERROR`: the standard way to learn whether a
/// non-blocking `connect` succeeded once the socket becomes writable.
pub fn take_pending_error(handle: RawHandle) -> Result<()> {
    let mut error: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            handle,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut error as *mut _ as *mut libc::c_void,
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

pub const RECV_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

// macOS has no `MSG_NOSIGNAL`; `SO_NOSIGPIPE` (set once at socket creation,
// see `open`) covers the same SIGPIPE-suppression need there.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;
