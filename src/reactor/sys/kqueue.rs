//! BSD/macOS backend: one kqueue instance per reactor, sockets registered
//! for `EVFILT_READ`/`EVFILT_WRITE` with `EV_CLEAR` (edge-triggered, same
//! shape as the Linux backend's `EPOLLET`).
//!
//! Deliberately does not batch `recvmsg`/`sendmsg` across ready sockets the
//! way the Linux backend could with `recvmmsg`/`sendmmsg`: the private
//! `recvmsg_x`/`sendmsg_x` syscalls this platform would need for that fail
//! the whole batch on a single message's error and don't report per-message
//! truncation, so every drain here runs one message at a time until
//! `EWOULDBLOCK`.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::trace;

use crate::error::{last_os_error, Error, ErrorKind, Result};
use crate::intrusive::mpsc::Mpsc;
use crate::net::handle::RawHandle;
use crate::reactor::state::{SocketState, Token};
use crate::reactor::sys::unix_common::{cancel_all, drain};
use crate::request::Request;

const MAX_EVENTS: usize = 256;

pub struct Reactor {
    kqueue_fd: RawFd,
    sockets: std::cell::RefCell<HashMap<u64, SocketState>>,
    next_token: std::cell::Cell<u64>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::kqueue() };
        if fd == -1 {
            return Err(last_os_error());
        }
        Ok(Reactor {
            kqueue_fd: fd,
            sockets: std::cell::RefCell::new(HashMap::new()),
            next_token: std::cell::Cell::new(0),
        })
    }

    pub fn register(&self, handle: RawHandle) -> Result<Token> {
        crate::net::sys::set_non_blocking(handle)?;

        let id = self.next_token.get();
        self.next_token.set(id + 1);

        let mut changes = [unsafe { std::mem::zeroed::<libc::kevent>() }; 2];
        set_kevent(&mut changes[0], handle, libc::EVFILT_WRITE, id);
        set_kevent(&mut changes[1], handle, libc::EVFILT_READ, id);
        let rc = unsafe {
            libc::kevent(self.kqueue_fd, changes.as_ptr(), 2, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if rc == -1 {
            return Err(last_os_error());
        }
        trace!("registering; fd={}; token={}", handle, id);
        self.sockets.borrow_mut().insert(id, SocketState::new(handle));
        Ok(Token(id))
    }

    /// See [`crate::reactor::sys::epoll::Reactor::deregister`]: same
    /// bad_file_descriptor-on-close contract. No explicit `EV_DELETE`:
    /// closing the socket (the caller's responsibility after deregistering)
    /// drops its kqueue interest.
    pub fn deregister(&self, token: Token, completed: &Mpsc<Request>) -> Result<()> {
        let mut state = self
            .sockets
            .borrow_mut()
            .remove(&token.0)
            .ok_or(Error::Logic(crate::error::LogicError::NotRegistered))?;
        trace!("deregistering; token={}", token.0);
        let error = Error::System(ErrorKind::BadFileDescriptor);
        cancel_all(&mut state.receive, error, completed);
        cancel_all(&mut state.send, error, completed);
        Ok(())
    }

    pub fn with_socket<R>(&self, token: Token, f: impl FnOnce(&mut SocketState) -> R) -> Result<R> {
        let mut sockets = self.sockets.borrow_mut();
        let state = sockets
            .get_mut(&token.0)
            .ok_or(Error::Logic(crate::error::LogicError::NotRegistered))?;
        Ok(f(state))
    }

    pub fn drain_now(&self, token: Token, completed: &Mpsc<Request>) {
        let mut sockets = self.sockets.borrow_mut();
        if let Some(state) = sockets.get_mut(&token.0) {
            let handle = state.handle;
            if !state.send.corked {
                drain(handle, &mut state.send, completed);
            }
            if !state.receive.corked {
                drain(handle, &mut state.receive, completed);
            }
        }
    }

    pub fn poll(&self, timeout: Option<Duration>, completed: &Mpsc<Request>) -> Result<()> {
        let mut events: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(std::ptr::null());
        trace!("kevent; timeout={:?}", timeout);
        let n = unsafe {
            libc::kevent(
                self.kqueue_fd,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                MAX_EVENTS as i32,
                ts_ptr,
            )
        };
        if n == -1 {
            let err = last_os_error();
            if err.kind() == Some(ErrorKind::Interrupted) {
                return Ok(());
            }
            return Err(err);
        }

        let mut sockets = self.sockets.borrow_mut();
        for event in &events[..n.max(0) as usize] {
            let token = event.udata as u64;
            let Some(state) = sockets.get_mut(&token) else { continue };
            let handle = state.handle;

            if event.filter == libc::EVFILT_READ && !state.receive.corked {
                drain(handle, &mut state.receive, completed);
            } else if event.filter == libc::EVFILT_WRITE && !state.send.corked {
                drain(handle, &mut state.send, completed);
            }

            if event.flags & libc::EV_EOF != 0 {
                let error = Error::System(ErrorKind::ConnectionAborted);
                cancel_all(&mut state.receive, error, completed);
                cancel_all(&mut state.send, error, completed);
            }
        }
        Ok(())
    }
}

fn set_kevent(ev: &mut libc::kevent, handle: RawHandle, filter: i16, token: u64) {
    ev.ident = handle as usize;
    ev.filter = filter;
    ev.flags = libc::EV_ADD | libc::EV_CLEAR;
    ev.fflags = 0;
    ev.data = 0;
    ev.udata = token as *mut libc::c_void;
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqueue_fd);
        }
    }
}
