//! Uniform socket option surface.
//!
//! One `Option` enum variant per concrete value shape (bool/numeric/
//! `Linger`/`Duration`) so callers can't mismatch a name with the wrong
//! decode. An option this crate or platform doesn't support returns
//! [`ErrorKind::NoProtocolOption`] or [`ErrorKind::OperationNotSupported`]
//! rather than silently succeeding.

use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::net::handle::{NativeHandle, RawHandle};

/// `SO_LINGER` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linger {
    pub enabled: bool,
    pub seconds: u16,
}

/// The socket options this surface supports. Each variant carries the value
/// for a `set`, or is filled in by a `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Option {
    ReuseAddress(bool),
    /// `SO_REUSEPORT`; returns `operation_not_supported` on platforms that
    /// lack it (Windows has no equivalent socket option).
    ReusePort(bool),
    Keepalive(bool),
    Broadcast(bool),
    Linger(Linger),
    DoNotRoute(bool),
    OutOfBandInline(bool),
    SendBufferSize(u32),
    ReceiveBufferSize(u32),
    ReceiveLowWatermark(u32),
    SendLowWatermark(u32),
    ReceiveTimeout(Duration),
    SendTimeout(Duration),
    Debug(bool),
    NonBlockingIo(bool),
}

impl Option {
    fn discriminant_name(&self) -> &'static str {
        match self {
            Option::ReuseAddress(_) => "reuse_address",
            Option::ReusePort(_) => "reuse_port",
            Option::Keepalive(_) => "keepalive",
            Option::Broadcast(_) => "broadcast",
            Option::Linger(_) => "linger",
            Option::DoNotRoute(_) => "do_not_route",
            Option::OutOfBandInline(_) => "out_of_band_inline",
            Option::SendBufferSize(_) => "send_buffer_size",
            Option::ReceiveBufferSize(_) => "receive_buffer_size",
            Option::ReceiveLowWatermark(_) => "receive_low_watermark",
            Option::SendLowWatermark(_) => "send_low_watermark",
            Option::ReceiveTimeout(_) => "receive_timeout",
            Option::SendTimeout(_) => "send_timeout",
            Option::Debug(_) => "debug",
            Option::NonBlockingIo(_) => "non_blocking_io",
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use std::mem;

    fn bool_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<bool> {
        let mut v: libc::c_int = 0;
        getsockopt(handle, level, name, &mut v as *mut _ as *mut _, mem::size_of_val(&v))?;
        Ok(v != 0)
    }

    fn u32_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<u32> {
        let mut v: libc::c_int = 0;
        getsockopt(handle, level, name, &mut v as *mut _ as *mut _, mem::size_of_val(&v))?;
        Ok(v as u32)
    }

    fn timeout_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<Duration> {
        let mut tv: libc::timeval = unsafe { mem::zeroed() };
        getsockopt(handle, level, name, &mut tv as *mut _ as *mut _, mem::size_of_val(&tv))?;
        Ok(Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32).saturating_mul(1_000)))
    }

    fn getsockopt(
        handle: RawHandle,
        level: i32,
        name: i32,
        value: *mut libc::c_void,
        len: usize,
    ) -> Result<()> {
        let mut actual_len = len as libc::socklen_t;
        let rc = unsafe { libc::getsockopt(handle, level, name, value, &mut actual_len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(crate::error::last_os_error())
        }
    }

    pub fn get(handle: &NativeHandle, name: super::Option) -> Result<super::Option> {
        use super::Option::*;
        let h = handle.raw();
        Ok(match name {
            ReuseAddress(_) => ReuseAddress(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_REUSEADDR)?),
            ReusePort(_) => {
                #[cfg(any(target_os = "linux", target_os = "android"))]
                {
                    ReusePort(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_REUSEPORT)?)
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                {
                    return Err(Error::System(ErrorKind::OperationNotSupported));
                }
            }
            Keepalive(_) => Keepalive(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_KEEPALIVE)?),
            Broadcast(_) => Broadcast(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_BROADCAST)?),
            Linger(_) => {
                let mut raw: libc::linger = unsafe { mem::zeroed() };
                getsockopt(
                    h,
                    libc::SOL_SOCKET,
                    libc::SO_LINGER,
                    &mut raw as *mut _ as *mut _,
                    mem::size_of_val(&raw),
                )?;
                Linger(super::Linger { enabled: raw.l_onoff != 0, seconds: raw.l_linger as u16 })
            }
            DoNotRoute(_) => DoNotRoute(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_DONTROUTE)?),
            OutOfBandInline(_) => OutOfBandInline(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_OOBINLINE)?),
            SendBufferSize(_) => SendBufferSize(u32_opt_get(h, libc::SOL_SOCKET, libc::SO_SNDBUF)?),
            ReceiveBufferSize(_) => ReceiveBufferSize(u32_opt_get(h, libc::SOL_SOCKET, libc::SO_RCVBUF)?),
            ReceiveLowWatermark(_) => ReceiveLowWatermark(u32_opt_get(h, libc::SOL_SOCKET, libc::SO_RCVLOWAT)?),
            SendLowWatermark(_) => SendLowWatermark(u32_opt_get(h, libc::SOL_SOCKET, libc::SO_SNDLOWAT)?),
            ReceiveTimeout(_) => ReceiveTimeout(timeout_opt_get(h, libc::SOL_SOCKET, libc::SO_RCVTIMEO)?),
            SendTimeout(_) => SendTimeout(timeout_opt_get(h, libc::SOL_SOCKET, libc::SO_SNDTIMEO)?),
            Debug(_) => Debug(bool_opt_get(h, libc::SOL_SOCKET, libc::SO_DEBUG)?),
            NonBlockingIo(_) => {
                let flags = unsafe { libc::fcntl(h, libc::F_GETFL, 0) };
                if flags == -1 {
                    return Err(crate::error::last_os_error());
                }
                NonBlockingIo(flags & libc::O_NONBLOCK != 0)
            }
        })
    }

    fn bool_opt(handle: RawHandle, level: i32, name: i32, value: bool) -> Result<()> {
        let v: libc::c_int = value as libc::c_int;
        setsockopt(handle, level, name, &v as *const _ as *const _, mem::size_of_val(&v))
    }

    fn u32_opt(handle: RawHandle, level: i32, name: i32, value: u32) -> Result<()> {
        let v: libc::c_int = value as libc::c_int;
        setsockopt(handle, level, name, &v as *const _ as *const _, mem::size_of_val(&v))
    }

    fn timeout_opt(handle: RawHandle, level: i32, name: i32, value: Duration) -> Result<()> {
        let tv = libc::timeval {
            tv_sec: value.as_secs() as libc::time_t,
            tv_usec: value.subsec_micros() as libc::suseconds_t,
        };
        setsockopt(handle, level, name, &tv as *const _ as *const _, mem::size_of_val(&tv))
    }

    fn setsockopt(
        handle: RawHandle,
        level: i32,
        name: i32,
        value: *const libc::c_void,
        len: usize,
    ) -> Result<()> {
        let rc = unsafe { libc::setsockopt(handle, level, name, value, len as libc::socklen_t) };
        if rc == 0 {
            Ok(())
        } else {
            Err(crate::error::last_os_error())
        }
    }

    pub fn set(handle: &NativeHandle, option: super::Option) -> Result<()> {
        use super::Option::*;
        let h = handle.raw();
        match option {
            ReuseAddress(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_REUSEADDR, v),
            ReusePort(v) => {
                #[cfg(any(target_os = "linux", target_os = "android"))]
                {
                    bool_opt(h, libc::SOL_SOCKET, libc::SO_REUSEPORT, v)
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                {
                    let _ = v;
                    Err(Error::System(ErrorKind::OperationNotSupported))
                }
            }
            Keepalive(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_KEEPALIVE, v),
            Broadcast(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_BROADCAST, v),
            Linger(l) => {
                let raw = libc::linger {
                    l_onoff: l.enabled as libc::c_int,
                    l_linger: l.seconds as libc::c_int,
                };
                setsockopt(
                    h,
                    libc::SOL_SOCKET,
                    libc::SO_LINGER,
                    &raw as *const _ as *const _,
                    mem::size_of_val(&raw),
                )
            }
            DoNotRoute(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_DONTROUTE, v),
            OutOfBandInline(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_OOBINLINE, v),
            SendBufferSize(v) => u32_opt(h, libc::SOL_SOCKET, libc::SO_SNDBUF, v),
            ReceiveBufferSize(v) => u32_opt(h, libc::SOL_SOCKET, libc::SO_RCVBUF, v),
            ReceiveLowWatermark(v) => u32_opt(h, libc::SOL_SOCKET, libc::SO_RCVLOWAT, v),
            SendLowWatermark(v) => u32_opt(h, libc::SOL_SOCKET, libc::SO_SNDLOWAT, v),
            ReceiveTimeout(v) => timeout_opt(h, libc::SOL_SOCKET, libc::SO_RCVTIMEO, v),
            SendTimeout(v) => timeout_opt(h, libc::SOL_SOCKET, libc::SO_SNDTIMEO, v),
            Debug(v) => bool_opt(h, libc::SOL_SOCKET, libc::SO_DEBUG, v),
            NonBlockingIo(v) => {
                let flags = unsafe { libc::fcntl(h, libc::F_GETFL, 0) };
                if flags == -1 {
                    return Err(crate::error::last_os_error());
                }
                let flags = if v { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
                if unsafe { libc::fcntl(h, libc::F_SETFL, flags) } == -1 {
                    Err(crate::error::last_os_error())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use std::mem;
    use windows_sys::Win32::Networking::WinSock as ws;

    fn bool_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<bool> {
        let mut v: i32 = 0;
        getsockopt(handle, level, name, &mut v as *mut _ as *mut u8, mem::size_of_val(&v))?;
        Ok(v != 0)
    }

    fn u32_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<u32> {
        let mut v: i32 = 0;
        getsockopt(handle, level, name, &mut v as *mut _ as *mut u8, mem::size_of_val(&v))?;
        Ok(v as u32)
    }

    fn timeout_opt_get(handle: RawHandle, level: i32, name: i32) -> Result<Duration> {
        let mut millis: i32 = 0;
        getsockopt(handle, level, name, &mut millis as *mut _ as *mut u8, mem::size_of_val(&millis))?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }

    fn getsockopt(handle: RawHandle, level: i32, name: i32, value: *mut u8, len: usize) -> Result<()> {
        let mut actual_len = len as i32;
        let rc = unsafe { ws::getsockopt(handle, level, name, value, &mut actual_len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(crate::error::last_os_error())
        }
    }

    pub fn get(handle: &NativeHandle, name: super::Option) -> Result<super::Option> {
        use super::Option::*;
        let h = handle.raw();
        Ok(match name {
            ReuseAddress(_) => ReuseAddress(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_REUSEADDR as i32)?),
            ReusePort(_) => return Err(Error::System(ErrorKind::OperationNotSupported)),
            Keepalive(_) => Keepalive(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_KEEPALIVE as i32)?),
            Broadcast(_) => Broadcast(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_BROADCAST as i32)?),
            Linger(_) => {
                let mut raw: ws::LINGER = unsafe { mem::zeroed() };
                getsockopt(
                    h,
                    ws::SOL_SOCKET as i32,
                    ws::SO_LINGER as i32,
                    &mut raw as *mut _ as *mut u8,
                    mem::size_of_val(&raw),
                )?;
                Linger(super::Linger { enabled: raw.l_onoff != 0, seconds: raw.l_linger })
            }
            DoNotRoute(_) => DoNotRoute(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_DONTROUTE as i32)?),
            OutOfBandInline(_) => {
                OutOfBandInline(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_OOBINLINE as i32)?)
            }
            SendBufferSize(_) => SendBufferSize(u32_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_SNDBUF as i32)?),
            ReceiveBufferSize(_) => {
                ReceiveBufferSize(u32_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_RCVBUF as i32)?)
            }
            ReceiveLowWatermark(_) | SendLowWatermark(_) => {
                return Err(Error::System(ErrorKind::NoProtocolOption))
            }
            ReceiveTimeout(_) => ReceiveTimeout(timeout_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_RCVTIMEO as i32)?),
            SendTimeout(_) => SendTimeout(timeout_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_SNDTIMEO as i32)?),
            Debug(_) => Debug(bool_opt_get(h, ws::SOL_SOCKET as i32, ws::SO_DEBUG as i32)?),
            NonBlockingIo(_) => {
                // Windows has no query-side FIONBIO; WinSock doesn't expose a
                // way to read back a socket's blocking mode once set.
                return Err(Error::System(ErrorKind::NoProtocolOption));
            }
        })
    }

    fn bool_opt(handle: RawHandle, level: i32, name: i32, value: bool) -> Result<()> {
        let v: i32 = value as i32;
        setsockopt(handle, level, name, &v as *const _ as *const u8, mem::size_of_val(&v))
    }

    fn u32_opt(handle: RawHandle, level: i32, name: i32, value: u32) -> Result<()> {
        let v: i32 = value as i32;
        setsockopt(handle, level, name, &v as *const _ as *const u8, mem::size_of_val(&v))
    }

    fn timeout_opt(handle: RawHandle, level: i32, name: i32, value: Duration) -> Result<()> {
        let millis: i32 = value.as_millis().min(i32::MAX as u128) as i32;
        setsockopt(handle, level, name, &millis as *const _ as *const u8, mem::size_of_val(&millis))
    }

    fn setsockopt(handle: RawHandle, level: i32, name: i32, value: *const u8, len: usize) -> Result<()> {
        let rc = unsafe { ws::setsockopt(handle, level, name, value, len as i32) };
        if rc == 0 {
            Ok(())
        } else {
            Err(crate::error::last_os_error())
        }
    }

    pub fn set(handle: &NativeHandle, option: super::Option) -> Result<()> {
        use super::Option::*;
        let h = handle.raw();
        match option {
            ReuseAddress(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_REUSEADDR as i32, v),
            ReusePort(_) => Err(Error::System(ErrorKind::OperationNotSupported)),
            Keepalive(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_KEEPALIVE as i32, v),
            Broadcast(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_BROADCAST as i32, v),
            Linger(l) => {
                let raw = ws::LINGER {
                    l_onoff: l.enabled as u16,
                    l_linger: l.seconds,
                };
                setsockopt(
                    h,
                    ws::SOL_SOCKET as i32,
                    ws::SO_LINGER as i32,
                    &raw as *const _ as *const u8,
                    mem::size_of_val(&raw),
                )
            }
            DoNotRoute(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_DONTROUTE as i32, v),
            OutOfBandInline(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_OOBINLINE as i32, v),
            SendBufferSize(v) => u32_opt(h, ws::SOL_SOCKET as i32, ws::SO_SNDBUF as i32, v),
            ReceiveBufferSize(v) => u32_opt(h, ws::SOL_SOCKET as i32, ws::SO_RCVBUF as i32, v),
            // Windows has no low-watermark socket options.
            ReceiveLowWatermark(_) | SendLowWatermark(_) => {
                Err(Error::System(ErrorKind::NoProtocolOption))
            }
            ReceiveTimeout(v) => timeout_opt(h, ws::SOL_SOCKET as i32, ws::SO_RCVTIMEO as i32, v),
            SendTimeout(v) => timeout_opt(h, ws::SOL_SOCKET as i32, ws::SO_SNDTIMEO as i32, v),
            Debug(v) => bool_opt(h, ws::SOL_SOCKET as i32, ws::SO_DEBUG as i32, v),
            NonBlockingIo(v) => {
                let mut mode: u32 = if v { 1 } else { 0 };
                if unsafe { ws::ioctlsocket(h, ws::FIONBIO, &mut mode) } == 0 {
                    Ok(())
                } else {
                    Err(crate::error::last_os_error())
                }
            }
        }
    }
}

/// Apply `option` to `handle`. Unsupported combinations return
/// [`ErrorKind::NoProtocolOption`] or [`ErrorKind::OperationNotSupported`],
/// never silently succeed.
pub fn set(handle: &NativeHandle, option: Option) -> Result<()> {
    let _ = option.discriminant_name();
    sys::set(handle, option)
}

/// Query the option named by `option`'s discriminant (its carried value is
/// ignored on the way in) and return it filled with the current value.
/// Unsupported combinations return [`ErrorKind::NoProtocolOption`] or
/// [`ErrorKind::OperationNotSupported`], never a fabricated default.
pub fn get(handle: &NativeHandle, option: Option) -> Result<Option> {
    sys::get(handle, option)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Socket, SocketType};

    #[test]
    fn reuse_address_round_trips() {
        let socket = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        socket.set_option(Option::ReuseAddress(true)).unwrap();
        let read_back = socket.get_option(Option::ReuseAddress(false)).unwrap();
        assert_eq!(read_back, Option::ReuseAddress(true));
    }

    #[test]
    fn send_buffer_size_round_trips_to_a_platform_clamped_value() {
        let socket = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        socket.set_option(Option::SendBufferSize(64 * 1024)).unwrap();
        match socket.get_option(Option::SendBufferSize(0)).unwrap() {
            Option::SendBufferSize(n) => assert!(n > 0),
            other => panic!("unexpected option: {other:?}"),
        }
    }

    #[test]
    fn unsupported_low_watermark_set_reports_no_protocol_option_on_non_posix() {
        // Exercises the discriminant plumbing on every platform; POSIX
        // accepts SO_SNDLOWAT, so this is a smoke test there rather than a
        // not-supported assertion.
        let socket = Socket::open("127.0.0.1:0".parse().unwrap(), SocketType::Datagram).unwrap();
        let _ = socket.set_option(Option::SendLowWatermark(1));
    }
}
