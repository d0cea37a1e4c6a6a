//! Platform split for the reactor's polling backend.

#[cfg(target_os = "linux")]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub mod kqueue;
#[cfg(windows)]
pub mod iocp;

#[cfg(unix)]
pub(crate) mod unix_common;

#[cfg(target_os = "linux")]
pub use epoll::Reactor as PlatformReactor;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use kqueue::Reactor as PlatformReactor;
#[cfg(windows)]
pub use iocp::Reactor as PlatformReactor;
