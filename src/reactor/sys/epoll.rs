//! Linux backend: one epoll instance per reactor, sockets registered edge-
//! triggered for both directions so a single `epoll_wait` wakeup can drain
//! both queues without re-arming in between.

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
    epoll_fd: RawFd,
    sockets: std::cell::RefCell<HashMap<u64, SocketState>>,
    next_token: std::cell::Cell<u64>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            return Err(last_os_error());
        }
        Ok(Reactor {
            epoll_fd: fd,
            sockets: std::cell::RefCell::new(HashMap::new()),
            next_token: std::cell::Cell::new(0),
        })
    }

    pub fn register(&self, handle: RawHandle) -> Result<Token> {
        crate::net::sys::set_non_blocking(handle)?;

        let id = self.next_token.get();
        self.next_token.set(id + 1);

        let mut ev = libc::epoll_event {
            events: (libc::EPOLLET | libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP) as u32,
            u64: id,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, handle, &mut ev) } == -1 {
            return Err(last_os_error());
        }
        trace!("epoll_ctl add; fd={}; token={}", handle, id);
        self.sockets.borrow_mut().insert(id, SocketState::new(handle));
        Ok(Token(id))
    }

    /// Remove `token` from the epoll set and fail everything still pending
    /// on it with `bad_file_descriptor`: `spec.md` §8 requires every
    /// previously started, not-yet-delivered request on a closed socket to
    /// be delivered exactly once, and deregistration is this backend's only
    /// hook for "this socket is going away" (the kernel already dropped its
    /// epoll interest the moment the caller closed the handle).
    pub fn deregister(&self, token: Token, completed: &Mpsc<Request>) -> Result<()> {
        let mut state = self
            .sockets
            .borrow_mut()
            .remove(&token.0)
            .ok_or(Error::Logic(crate::error::LogicError::NotRegistered))?;
        unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, state.handle, std::ptr::null_mut());
        }
        trace!("epoll_ctl del; token={}", token.0);
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
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let timeout_ms = timeout.map(|d| d.as_millis().min(i32::MAX as u128) as i32).unwrap_or(-1);
        trace!("epoll_wait; timeout_ms={}", timeout_ms);
        let n = unsafe { libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms) };
        if n == -1 {
            let err = last_os_error();
            if err.kind() == Some(ErrorKind::Interrupted) {
                return Ok(());
            }
            return Err(err);
        }

        let mut sockets = self.sockets.borrow_mut();
        for event in &events[..n.max(0) as usize] {
            let Some(state) = sockets.get_mut(&event.u64) else { continue };
            let handle = state.handle;
            let flags = event.events as i32;

            if flags & libc::EPOLLERR != 0 {
                let error = crate::net::sys::take_pending_error(handle).err().unwrap_or(last_os_error());
                cancel_all(&mut state.receive, error, completed);
                cancel_all(&mut state.send, error, completed);
                continue;
            }

            if flags & libc::EPOLLIN != 0 && !state.receive.corked {
                drain(handle, &mut state.receive, completed);
            }
            if flags & libc::EPOLLOUT != 0 && !state.send.corked {
                drain(handle, &mut state.send, completed);
            }
            if flags & (libc::EPOLLRDHUP | libc::EPOLLHUP) != 0 {
                let error = Error::System(ErrorKind::ConnectionAborted);
                cancel_all(&mut state.receive, error, completed);
                cancel_all(&mut state.send, error, completed);
            }
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}
