//! Process-wide one-time setup.
//!
//! On Unix there is nothing to do: sockets are ready to use as soon as
//! they're created. On Windows, every socket API requires `WSAStartup` to
//! have run first, and the overlapped accept/connect machinery the reactor
//! uses needs two Microsoft-specific function pointers (`ConnectEx`,
//! `AcceptEx`) resolved once via `WSAIoctl` before the first registration.
//! `ensure` runs this exactly once per process, lazily, the first time
//! anything in the crate needs it — mirroring a lazily-initialized
//! Microsoft extension table rather than requiring callers to invoke an
//! explicit `init()` up front.

#[cfg(windows)]
pub(crate) use windows_impl::{ensure, extensions, Extensions};

#[cfg(not(windows))]
pub(crate) fn ensure() {}

#[cfg(windows)]
mod windows_impl {
    use std::mem;
    use std::sync::OnceLock;

    use windows_sys::Win32::Networking::WinSock as ws;

    use crate::net::handle::{NativeHandle, RawHandle};

    /// Extension function pointers resolved once per process. `None` means
    /// resolution failed; callers see that surface as `operation_not_supported`
    /// rather than panicking, since a broken WinSock install shouldn't bring
    /// down the whole process at first use.
    pub struct Extensions {
        pub connect_ex: Option<ws::LPFN_CONNECTEX>,
        pub accept_ex: Option<ws::LPFN_ACCEPTEX>,
    }

    static STATE: OnceLock<Extensions> = OnceLock::new();

    pub(crate) fn ensure() {
        STATE.get_or_init(load);
    }

    pub(crate) fn extensions() -> &'static Extensions {
        STATE.get_or_init(load)
    }

    fn load() -> Extensions {
        unsafe {
            let mut wsa: ws::WSADATA = mem::zeroed();
            ws::WSAStartup(0x0202, &mut wsa);
        }

        let scratch = match unsafe {
            ws::socket(ws::AF_INET as i32, ws::SOCK_STREAM as i32, 0)
        } {
            h if h != crate::net::handle::INVALID_HANDLE => unsafe { NativeHandle::from_raw(h) },
            _ => {
                return Extensions { connect_ex: None, accept_ex: None };
            }
        };

        Extensions {
            connect_ex: load_one(scratch.raw(), ws::WSAID_CONNECTEX),
            accept_ex: load_one(scratch.raw(), ws::WSAID_ACCEPTEX),
        }
    }

    fn load_one<F: Copy>(handle: RawHandle, id: windows_sys::core::GUID) -> Option<F> {
        let mut fn_ptr: usize = 0;
        let mut bytes: u32 = 0;
        let rv = unsafe {
            ws::WSAIoctl(
                handle,
                ws::SIO_GET_EXTENSION_FUNCTION_POINTER,
                &id as *const _ as *const std::ffi::c_void,
                mem::size_of_val(&id) as u32,
                &mut fn_ptr as *mut _ as *mut std::ffi::c_void,
                mem::size_of::<usize>() as u32,
                &mut bytes,
                std::ptr::null_mut(),
                None,
            )
        };
        if rv == 0 && fn_ptr != 0 {
            Some(unsafe { mem::transmute_copy::<usize, F>(&fn_ptr) })
        } else {
            None
        }
    }
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
    #[test]
    fn ensure_is_a_harmless_no_op_off_windows() {
        super::ensure();
        super::ensure();
    }
}
