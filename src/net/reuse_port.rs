//! Platform-specific load-balancing hook for `reuse_port`/`reuse_address`
//! groups of sockets bound to the same port (`spec.md` §6).
//!
//! Building the classifier program itself — deciding which bytes of a
//! packet hash to which socket — is an application concern (it depends on
//! the 5-tuple or custom key the caller wants steady routing on). This
//! module only does the plumbing to install one: a classic BPF program on
//! Linux, opt-in kernel-managed port sharing on Windows. BSD is left
//! unsupported, per spec.

use crate::error::{Error, LogicError, Result};
use crate::net::handle::NativeHandle;

#[cfg(target_os = "linux")]
pub use linux::attach_reuseport_cbpf;
#[cfg(target_os = "linux")]
pub use libc::sock_filter;

#[cfg(target_os = "linux")]
mod linux {
    use std::mem;

    use crate::error::{Error, Result};
    use crate::net::handle::NativeHandle;

    /// Install `program` as the socket's `SO_ATTACH_REUSEPORT_CBPF`
    /// classifier: every socket in the same `SO_REUSEPORT` group that
    /// shares this program will route packets for the same key to the
    /// same socket, as long as the program computes that key identically
    /// on each one.
    ///
    /// `program` must already be a valid classic BPF program ending in a
    /// `BPF_RET` instruction; the kernel verifies it at attach time and
    /// this call surfaces a verifier rejection as
    /// [`crate::error::ErrorKind::InvalidArgument`].
    pub fn attach_reuseport_cbpf(handle: &NativeHandle, program: &[libc::sock_filter]) -> Result<()> {
        if program.is_empty() || program.len() > u16::MAX as usize {
            return Err(Error::System(crate::error::ErrorKind::InvalidArgument));
        }
        let fprog = libc::sock_fprog {
            len: program.len() as u16,
            filter: program.as_ptr() as *mut libc::sock_filter,
        };
        let rc = unsafe {
            libc::setsockopt(
                handle.raw(),
                libc::SOL_SOCKET,
                libc::SO_ATTACH_REUSEPORT_CBPF,
                &fprog as *const _ as *const libc::c_void,
                mem::size_of_val(&fprog) as libc::socklen_t,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(crate::error::last_os_error())
        }
    }
}

/// Windows has no classifier concept for `SO_REUSE_UNICASTPORT`-style
/// sharing: every socket in the group simply becomes eligible to receive
/// traffic for the shared port, with the stack picking one, not a
/// caller-installed program. `program` is accepted for signature symmetry
/// with the Linux entry point and ignored.
#[cfg(windows)]
pub fn attach_reuseport_cbpf(handle: &NativeHandle, _program: &[u8]) -> Result<()> {
    use windows_sys::Win32::Networking::WinSock as ws;
    // Not present in the `windows-sys` binding set this crate depends on;
    // value taken from the documented WinSock option table (0x3007).
    const SO_REUSE_UNICASTPORT: i32 = 0x3007;
    let value: i32 = 1;
    let rc = unsafe {
        ws::setsockopt(
            handle.raw(),
            ws::SOL_SOCKET as i32,
            SO_REUSE_UNICASTPORT,
            &value as *const _ as *const u8,
            std::mem::size_of_val(&value) as i32,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(crate::error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn attach_reuseport_cbpf(_handle: &NativeHandle, _program: &[u8]) -> Result<()> {
    Err(Error::Logic(LogicError::Unsupported))
}
