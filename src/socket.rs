//! Socket endpoints and their per-wait state.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::buffer::{ByteBuffer, Storage};
use crate::error::{Error, ErrorKind, Result};
use crate::interest::Interest;
use crate::sys::{self, ErrorClass, RawSocket};

/// What a socket is for. The role decides which readiness flags the
/// selector writes and which I/O shorthands apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A listening stream socket; read readiness means a client to accept.
    StreamServer,
    /// A connecting or accepted stream socket.
    StreamClient,
    /// A bound datagram socket with no fixed peer.
    DatagramEndpoint,
    /// A datagram socket that remembers its resolved peer address.
    DatagramClient {
        /// The resolved peer, reused by the peered send/receive shorthands.
        peer: SocketAddr,
    },
}

/// Post-wait observation flags.
#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    acceptable: bool,
    readable: bool,
    writable: bool,
}

/// Where a non-blocking connect stands. Transitions happen only inside
/// [`Selector::select`](crate::Selector::select) dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectPhase {
    Idle,
    Pending,
    Failed,
    Succeeded,
}

/// Outcome of one non-blocking transfer.
///
/// The two socket dialects report "peer gone" and "try again later"
/// through different channels; every I/O operation folds both into this
/// one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Bytes moved; the buffer position advanced past them.
    Done(usize),
    /// Nothing moved and nothing changed; retry after the next wait.
    WouldBlock,
    /// The peer closed (gracefully or not) or the socket hit an
    /// unrecoverable error. The caller should cancel the socket.
    Disconnected,
}

impl Transfer {
    /// Returns true if the transfer should be retried later.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Transfer::WouldBlock)
    }

    /// Returns true if the socket is no longer usable.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Transfer::Disconnected)
    }

    /// Number of bytes moved, if any were.
    pub fn bytes(&self) -> Option<usize> {
        match self {
            Transfer::Done(n) => Some(*n),
            _ => None,
        }
    }
}

/// One OS socket endpoint.
///
/// A `Socket` is created by one of the [`Selector`](crate::Selector)
/// factories, lives in that selector's registry until cancelled, and owns
/// its OS handle (closed on drop). Interests say what the next wait should
/// watch; the `is_*` state flags say what the last wait observed.
///
/// All I/O is non-blocking and reported through [`Transfer`]; a `Socket`
/// never blocks the caller.
pub struct Socket {
    handle: RawSocket,
    role: Role,
    interest: Cell<Option<Interest>>,
    readiness: Cell<Readiness>,
    connect: Cell<ConnectPhase>,
    attachment: RefCell<Option<Rc<dyn Any>>>,
}

impl Socket {
    pub(crate) fn new(handle: RawSocket, role: Role) -> Socket {
        Socket {
            handle,
            role,
            interest: Cell::new(None),
            readiness: Cell::new(Readiness::default()),
            connect: Cell::new(ConnectPhase::Idle),
            attachment: RefCell::new(None),
        }
    }

    /// The raw OS handle. Also the socket's ordering key.
    pub fn handle(&self) -> RawSocket {
        self.handle
    }

    /// What this socket is for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The peer a datagram client socket was resolved against.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self.role {
            Role::DatagramClient { peer } => Some(peer),
            _ => None,
        }
    }

    /// Current interest set, if the socket is watched at all.
    pub fn interest(&self) -> Option<Interest> {
        self.interest.get()
    }

    fn watch(&self, interest: Interest, on: bool) {
        let current = self.interest.get();
        let next = if on {
            Some(current.map_or(interest, |c| c | interest))
        } else {
            current.and_then(|c| c.remove(interest))
        };
        self.interest.set(next);
    }

    /// Ask the next wait to watch for clients waiting to be accepted.
    pub fn watch_acceptable(&self, on: bool) {
        self.watch(Interest::ACCEPTABLE, on);
    }

    /// Ask the next wait to watch for readable data.
    pub fn watch_readable(&self, on: bool) {
        self.watch(Interest::READABLE, on);
    }

    /// Ask the next wait to watch for writable space.
    pub fn watch_writable(&self, on: bool) {
        self.watch(Interest::WRITABLE, on);
    }

    /// True if accept readiness is being watched.
    pub fn is_watching_acceptable(&self) -> bool {
        self.interest.get().map_or(false, |i| i.is_acceptable())
    }

    /// True if read readiness is being watched.
    pub fn is_watching_readable(&self) -> bool {
        self.interest.get().map_or(false, |i| i.is_readable())
    }

    /// True if write readiness is being watched.
    pub fn is_watching_writable(&self) -> bool {
        self.interest.get().map_or(false, |i| i.is_writable())
    }

    /// True if the last wait saw a client waiting to be accepted.
    pub fn is_acceptable(&self) -> bool {
        self.readiness.get().acceptable
    }

    /// True if the last wait saw readable data.
    pub fn is_readable(&self) -> bool {
        self.readiness.get().readable
    }

    /// True if the last wait saw writable space.
    pub fn is_writable(&self) -> bool {
        self.readiness.get().writable
    }

    pub(crate) fn set_acceptable(&self, on: bool) {
        let mut r = self.readiness.get();
        r.acceptable = on;
        self.readiness.set(r);
    }

    pub(crate) fn set_readable(&self, on: bool) {
        let mut r = self.readiness.get();
        r.readable = on;
        self.readiness.set(r);
    }

    pub(crate) fn set_writable(&self, on: bool) {
        let mut r = self.readiness.get();
        r.writable = on;
        self.readiness.set(r);
    }

    /// True while a non-blocking connect has not resolved yet.
    pub fn is_connection_pending(&self) -> bool {
        self.connect.get() == ConnectPhase::Pending
    }

    /// True once a pending connect has failed. The socket should be
    /// cancelled.
    pub fn is_connection_failed(&self) -> bool {
        self.connect.get() == ConnectPhase::Failed
    }

    /// True for exactly one wait cycle after a pending connect succeeds.
    pub fn is_connection_success(&self) -> bool {
        self.connect.get() == ConnectPhase::Succeeded
    }

    pub(crate) fn set_connect_phase(&self, phase: ConnectPhase) {
        self.connect.set(phase);
    }

    /// Attaches an opaque shared payload to the socket.
    ///
    /// The registry holds a strong reference to every socket, so a payload
    /// that points back at its socket or selector must do so through
    /// [`Weak`](std::rc::Weak); a strong back-edge would keep the pair
    /// alive forever.
    pub fn set_attachment(&self, attachment: Rc<dyn Any>) {
        *self.attachment.borrow_mut() = Some(attachment);
    }

    /// The attachment, downcast to the concrete type the caller supplied.
    /// Returns `None` if nothing is attached or the type does not match.
    pub fn attachment<T: Any>(&self) -> Option<Rc<T>> {
        self.attachment
            .borrow()
            .clone()
            .and_then(|a| a.downcast::<T>().ok())
    }

    /// Reads up to `buf.remaining()` bytes into the buffer at its position.
    ///
    /// On [`Transfer::Done`] the position moves past the bytes read; flip
    /// the buffer before draining it. A full buffer is a caller bug
    /// (`Invariant`).
    pub fn read<S: Storage>(&self, buf: &mut ByteBuffer<S>) -> Result<Transfer> {
        if !buf.has_remaining() {
            return Err(Error::new(ErrorKind::Invariant));
        }
        match sys::recv(self.handle, buf.window_mut()) {
            // A zero-length read is how a stream reports the peer closing.
            Ok(0) => Ok(Transfer::Disconnected),
            Ok(n) => {
                buf.advance(n)?;
                Ok(Transfer::Done(n))
            }
            Err(ref e) if sys::classify_io(e) == ErrorClass::WouldBlock => {
                Ok(Transfer::WouldBlock)
            }
            Err(_) => Ok(Transfer::Disconnected),
        }
    }

    /// Writes the buffer's remaining bytes, advancing past what was sent.
    ///
    /// A non-blocking socket commonly takes only part of the buffer; the
    /// cursor keeps track, so the same buffer can be written again until
    /// `has_remaining()` turns false. An empty buffer is a caller bug
    /// (`Invariant`).
    pub fn write<S: Storage>(&self, buf: &mut ByteBuffer<S>) -> Result<Transfer> {
        if !buf.has_remaining() {
            return Err(Error::new(ErrorKind::Invariant));
        }
        match sys::send(self.handle, buf.as_slice()) {
            Ok(0) => Ok(Transfer::Disconnected),
            Ok(n) => {
                buf.advance(n)?;
                Ok(Transfer::Done(n))
            }
            Err(ref e) if sys::classify_io(e) == ErrorClass::WouldBlock => {
                Ok(Transfer::WouldBlock)
            }
            Err(_) => Ok(Transfer::Disconnected),
        }
    }

    /// Receives one datagram into the buffer, reporting the peer address.
    ///
    /// A datagram bigger than the buffer is truncated to the bytes that
    /// fit on every platform; the excess is dropped by the OS. An empty
    /// buffer is a caller bug (`Invariant`).
    pub fn recv_from<S: Storage>(
        &self,
        buf: &mut ByteBuffer<S>,
    ) -> Result<(Transfer, Option<SocketAddr>)> {
        if !buf.has_remaining() {
            return Err(Error::new(ErrorKind::Invariant));
        }
        match sys::recv_from(self.handle, buf.window_mut()) {
            Ok((0, _)) => Ok((Transfer::Disconnected, None)),
            Ok((n, addr)) => {
                buf.advance(n)?;
                Ok((Transfer::Done(n), Some(addr)))
            }
            Err(ref e) if sys::classify_io(e) == ErrorClass::WouldBlock => {
                Ok((Transfer::WouldBlock, None))
            }
            Err(_) => Ok((Transfer::Disconnected, None)),
        }
    }

    /// Sends the buffer's remaining bytes as one datagram to `addr`.
    pub fn send_to<S: Storage>(
        &self,
        buf: &mut ByteBuffer<S>,
        addr: &SocketAddr,
    ) -> Result<Transfer> {
        if !buf.has_remaining() {
            return Err(Error::new(ErrorKind::Invariant));
        }
        match sys::send_to(self.handle, buf.as_slice(), addr) {
            Ok(0) => Ok(Transfer::Disconnected),
            Ok(n) => {
                buf.advance(n)?;
                Ok(Transfer::Done(n))
            }
            Err(ref e) if sys::classify_io(e) == ErrorClass::WouldBlock => {
                Ok(Transfer::WouldBlock)
            }
            Err(_) => Ok(Transfer::Disconnected),
        }
    }

    /// Sends to the peer this datagram client was resolved against.
    ///
    /// The first send implicitly binds the socket, after which
    /// [`recv_from_peer`](Socket::recv_from_peer) receives from that peer.
    /// Calling this on any other role is a caller bug (`Invariant`).
    pub fn send_to_peer<S: Storage>(&self, buf: &mut ByteBuffer<S>) -> Result<Transfer> {
        match self.role {
            Role::DatagramClient { peer } => self.send_to(buf, &peer),
            _ => Err(Error::new(ErrorKind::Invariant)),
        }
    }

    /// Receives from the peer this datagram client was resolved against.
    pub fn recv_from_peer<S: Storage>(&self, buf: &mut ByteBuffer<S>) -> Result<Transfer> {
        match self.role {
            Role::DatagramClient { .. } => self.recv_from(buf).map(|(t, _)| t),
            _ => Err(Error::new(ErrorKind::Invariant)),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.handle != sys::INVALID_SOCKET {
            sys::close(self.handle);
        }
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Socket) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Socket {}

impl PartialOrd for Socket {
    fn partial_cmp(&self, other: &Socket) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Socket {
    fn cmp(&self, other: &Socket) -> std::cmp::Ordering {
        self.handle.cmp(&other.handle)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("handle", &self.handle)
            .field("role", &self.role)
            .field("interest", &self.interest.get())
            .field("readiness", &self.readiness.get())
            .field("connect", &self.connect.get())
            .finish()
    }
}
