use std::fmt;
use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by buffer and selector operations.
///
/// Carries the failure stage as an [`ErrorKind`] plus, where one exists, the
/// underlying OS error. Per-cycle socket I/O never produces an `Error`; those
/// failures collapse into [`Transfer`](crate::Transfer) so the caller can
/// cancel the offending socket and keep looping.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    sys: Option<io::Error>,
}

/// The stage at which an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The process-wide network stack could not be started.
    InitFailed,
    /// `socket()` failed.
    SocketCreate,
    /// `bind()` failed.
    Bind,
    /// `listen()` failed.
    Listen,
    /// `accept()` failed.
    Accept,
    /// A connection attempt failed outright (not merely in progress).
    Connect,
    /// Name resolution failed or returned no addresses.
    Resolve,
    /// A mandatory socket option could not be applied.
    SetOption,
    /// The readiness wait failed for a reason other than an interrupt.
    SelectFailed,
    /// A buffer operation would cross `limit` or violate `position <= limit`.
    OutOfRange,
    /// An API contract was violated by the caller.
    Invariant,
    /// A zero-length file cannot be mapped.
    EmptyFile,
    /// The backing file could not be opened or mapped.
    Map,
    /// The allocator could not provide the requested capacity.
    AllocFailed,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error { kind, sys: None }
    }

    pub(crate) fn from_sys(kind: ErrorKind, sys: io::Error) -> Error {
        Error {
            kind,
            sys: Some(sys),
        }
    }

    /// The stage at which the operation failed.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The captured OS error, if the failure came from a system call.
    pub fn sys(&self) -> Option<&io::Error> {
        self.sys.as_ref()
    }

    /// Returns true for buffer range violations.
    pub fn is_out_of_range(&self) -> bool {
        self.kind == ErrorKind::OutOfRange
    }

    /// Returns true for caller contract violations.
    pub fn is_invariant(&self) -> bool {
        self.kind == ErrorKind::Invariant
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ErrorKind::InitFailed => "network stack initialization failed",
            ErrorKind::SocketCreate => "failed to create a socket",
            ErrorKind::Bind => "failed to bind to port",
            ErrorKind::Listen => "failed to listen",
            ErrorKind::Accept => "failed to accept",
            ErrorKind::Connect => "failed to connect",
            ErrorKind::Resolve => "failed to resolve address",
            ErrorKind::SetOption => "failed to set socket option",
            ErrorKind::SelectFailed => "readiness wait failed",
            ErrorKind::OutOfRange => "buffer position/limit out of range",
            ErrorKind::Invariant => "operation violates an API invariant",
            ErrorKind::EmptyFile => "zero-length file cannot be mapped",
            ErrorKind::Map => "failed to open or map the backing file",
            ErrorKind::AllocFailed => "allocation failed",
        };
        match self.sys {
            Some(ref sys) => write!(f, "{}: {}", what, sys),
            None => f.write_str(what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.sys.as_ref().map(|e| e as _)
    }
}
