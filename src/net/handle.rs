//! Native socket handle: an opaque OS identifier, exclusively owned by one
//! [`NativeHandle`], closed on drop unless explicitly released. Close is
//! retried across `EINTR`; double-close is reported as `bad_file_descriptor`,
//! not silently ignored.

use crate::error::{Error, ErrorKind, Result};

#[cfg(unix)]
pub type RawHandle = libc::c_int;
#[cfg(windows)]
pub type RawHandle = windows_sys::Win32::Networking::WinSock::SOCKET;

#[cfg(unix)]
pub const INVALID_HANDLE: RawHandle = -1;
#[cfg(windows)]
pub const INVALID_HANDLE: RawHandle = windows_sys::Win32::Networking::WinSock::INVALID_SOCKET;

/// Owning wrapper around a native socket handle.
///
/// Invariant: a non-invalid handle is always open; closing twice is an
/// error. `NativeHandle` enforces this by setting its stored value to
/// [`INVALID_HANDLE`] the moment it hands the descriptor to the OS `close`
/// call or to a caller via [`NativeHandle::release`].
#[derive(Debug)]
pub struct NativeHandle(RawHandle);

impl NativeHandle {
    /// # Safety
    /// `raw` must either be [`INVALID_HANDLE`] or a handle this object will
    /// uniquely own from now on (no other `NativeHandle` may close it).
    pub unsafe fn from_raw(raw: RawHandle) -> Self {
        NativeHandle(raw)
    }

    pub fn raw(&self) -> RawHandle {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != INVALID_HANDLE
    }

    /// Take ownership of `handle`, closing whatever this object previously
    /// held.
    pub fn assign(&mut self, handle: RawHandle) -> Result<()> {
        let previous = std::mem::replace(&mut self.0, handle);
        if previous != INVALID_HANDLE {
            close_raw(previous)
        } else {
            Ok(())
        }
    }

    /// Yield the handle to the caller; this object no longer owns it.
    pub fn release(&mut self) -> RawHandle {
        std::mem::replace(&mut self.0, INVALID_HANDLE)
    }

    /// Idempotent from the outside in the sense that calling `close` on an
    /// already-invalid handle reports `bad_file_descriptor` rather than
    /// panicking or silently succeeding.
    pub fn close(&mut self) -> Result<()> {
        let handle = self.release();
        if handle == INVALID_HANDLE {
            return Err(Error::System(ErrorKind::BadFileDescriptor));
        }
        close_raw(handle)
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE {
            let _ = close_raw(self.0);
        }
    }
}

#[cfg(unix)]
fn close_raw(handle: RawHandle) -> Result<()> {
    loop {
        let rc = unsafe { libc::close(handle) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err.into());
        }
    }
}

#[cfg(windows)]
fn close_raw(handle: RawHandle) -> Result<()> {
    use windows_sys::Win32::Networking::WinSock::closesocket;
    if unsafe { closesocket(handle) } == 0 {
        Ok(())
    } else {
        Err(crate::error::last_os_error())
    }
}
