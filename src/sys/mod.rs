//! Platform-specific plumbing.
//!
//! Everything above this module speaks one dialect: a [`RawSocket`] handle,
//! normalized [`ErrorClass`]es, an [`FdSet`]/[`select`] pair, and a
//! [`FileMapping`] primitive. The `unix` and `windows` backends translate
//! that dialect to BSD sockets and Winsock respectively.

use std::io;
use std::net::SocketAddr;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;
#[cfg(unix)]
pub use self::unix::{RawSocket, INVALID_SOCKET};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;
#[cfg(windows)]
pub use self::windows::{RawSocket, INVALID_SOCKET};

/// Normalized classes of OS socket errors.
///
/// The two socket dialects report the same conditions through different
/// codes; `classify` folds both into this enum so the layers above never
/// compare raw errno values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// The operation would have blocked.
    WouldBlock,
    /// A non-blocking connect is underway.
    InProgress,
    /// A signal interrupted the call.
    Interrupted,
    /// The peer reset the connection.
    ConnReset,
    /// The datagram did not fit the buffer.
    MsgSize,
    /// Anything else.
    Other,
}

pub(crate) fn classify_io(err: &io::Error) -> ErrorClass {
    err.raw_os_error().map(classify).unwrap_or(ErrorClass::Other)
}

/// Address family of a socket, chosen from the resolved peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    V4,
    V6,
}

impl Family {
    pub(crate) fn of(addr: &SocketAddr) -> Family {
        match addr {
            SocketAddr::V4(..) => Family::V4,
            SocketAddr::V6(..) => Family::V6,
        }
    }
}

/// Transport kind of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Stream,
    Datagram,
}
