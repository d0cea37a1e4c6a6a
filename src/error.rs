//! Portable error taxonomy.
//!
//! Every fallible public operation returns [`Result<T>`], an alias over
//! `std::result::Result<T, Error>`. [`Error`] keeps programmer mistakes
//! (double-registration, starting an op on an unregistered socket) in a
//! separate variant from system errors: a logic error and "the kernel said
//! X" are never the same kind of failure.

use std::io;

/// Portable system error kinds. Platform-specific aliases (two errnos
/// meaning the same thing, a Windows code with a POSIX equivalent) are
/// normalized into these before they ever reach application code; see
/// `net::sys::{unix,windows}` for the mapping tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("not enough memory")]
    NotEnoughMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("protocol not supported")]
    ProtocolNotSupported,
    #[error("address in use")]
    AddressInUse,
    #[error("address not available")]
    AddressNotAvailable,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("connection reset")]
    ConnectionReset,
    #[error("timed out")]
    TimedOut,
    #[error("operation would block")]
    WouldBlock,
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("no protocol option")]
    NoProtocolOption,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not supported")]
    OperationNotSupported,
    /// Not a terminal error by itself: carried by `EINTR` internally and
    /// always retried before it can escape to a caller. Kept in the enum so
    /// the system-error translation table has a total mapping target.
    Interrupted,
    /// Catch-all for a system error without a named portable kind. Carries
    /// the raw OS error code for diagnostics.
    Other(i32),
}

/// Programmer errors, reported distinctly from system errors. Debug builds
/// additionally `debug_assert!` at the call site so these are caught during
/// development rather than propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LogicError {
    #[error("socket already registered with a reactor")]
    AlreadyRegistered,
    #[error("socket is not registered with a reactor")]
    NotRegistered,
    #[error("socket already closed")]
    AlreadyClosed,
    #[error("reactor dropped with sockets still registered")]
    ReactorDroppedWithRegistrations,
    #[error("operation not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("system error: {0}")]
    System(#[from] ErrorKind),
    #[error("logic error: {0}")]
    Logic(#[from] LogicError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::System(kind) => Some(*kind),
            Error::Logic(_) => None,
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::System(ErrorKind::WouldBlock))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::System(ErrorKind::from(e))
    }
}

impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
            io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            io::ErrorKind::AddrInUse => ErrorKind::AddressInUse,
            io::ErrorKind::AddrNotAvailable => ErrorKind::AddressNotAvailable,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidArgument,
            io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            io::ErrorKind::OutOfMemory => ErrorKind::NotEnoughMemory,
            _ => ErrorKind::Other(e.raw_os_error().unwrap_or(0)),
        }
    }
}

/// Capture the calling thread's last OS error and translate it into
/// [`ErrorKind`], applying the per-backend errno-alias normalization.
pub(crate) fn last_os_error() -> Error {
    Error::System(ErrorKind::from(io::Error::last_os_error()))
}
