//! The socket registry and its readiness wait.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::rc::Rc;

use log::{debug, trace};

use crate::error::{Error, ErrorKind, Result};
use crate::socket::{ConnectPhase, Role, Socket};
use crate::sys::{self, ErrorClass, Family, FdSet, Kind, RawSocket};

const LISTEN_BACKLOG: u32 = 10;

/// A registry of sockets and a single blocking readiness wait over all of
/// them.
///
/// Sockets are created through the `start_*` factories and stay registered
/// until cancelled; [`cancel_socket`](Selector::cancel_socket) defers the
/// removal to the start of the next [`select`](Selector::select), so
/// cancelling while iterating the registry is always safe. One `select`
/// call is the only place this library blocks.
///
/// A `Selector` is strictly single-threaded; it is not `Send` and no
/// operation may be invoked concurrently.
#[derive(Debug, Default)]
pub struct Selector {
    sockets: BTreeMap<RawSocket, Rc<Socket>>,
    canceled: BTreeSet<RawSocket>,
}

impl Selector {
    /// Creates an empty selector.
    pub fn new() -> Selector {
        Selector {
            sockets: BTreeMap::new(),
            canceled: BTreeSet::new(),
        }
    }

    /// Number of active sockets in the registry.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// True if no sockets are registered.
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Snapshot of the active registry, in handle order.
    ///
    /// The snapshot owns its references, so the caller may cancel sockets
    /// (or create new ones) while walking it.
    pub fn sockets(&self) -> Vec<Rc<Socket>> {
        self.sockets.values().cloned().collect()
    }

    fn register(&mut self, socket: Socket, attachment: Option<Rc<dyn Any>>) -> Rc<Socket> {
        if let Some(attachment) = attachment {
            socket.set_attachment(attachment);
        }
        trace!(
            "registering socket: handle={}, role={:?}",
            socket.handle(),
            socket.role()
        );
        let socket = Rc::new(socket);
        self.sockets.insert(socket.handle(), Rc::clone(&socket));
        socket
    }

    /// Starts a dual-stack TCP server listening on `port`.
    ///
    /// The socket binds to `in6addr_any` with `IPV6_V6ONLY` disabled, so
    /// clients reach it over IPv4 and IPv6 alike. Accept readiness is
    /// watched from the start; shut the server down by cancelling it.
    pub fn start_server(
        &mut self,
        port: u16,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        init()?;

        let handle = sys::new_socket(Family::V6, Kind::Stream)
            .map_err(|e| Error::from_sys(ErrorKind::SocketCreate, e))?;
        let server = Socket::new(handle, Role::StreamServer);

        sys::set_reuse(handle).map_err(|e| Error::from_sys(ErrorKind::SetOption, e))?;
        sys::set_dual_stack(handle).map_err(|e| Error::from_sys(ErrorKind::SetOption, e))?;
        sys::bind_any_v6(handle, port).map_err(|e| Error::from_sys(ErrorKind::Bind, e))?;
        sys::listen(handle, LISTEN_BACKLOG).map_err(|e| Error::from_sys(ErrorKind::Listen, e))?;

        server.watch_acceptable(true);

        Ok(self.register(server, attachment))
    }

    /// Starts a non-blocking TCP connect to `host:port`.
    ///
    /// `host` may be a name, an IPv4 address or an IPv6 address; the first
    /// resolved address is used. The connect is left pending; watch the
    /// socket through `select` until
    /// [`is_connection_success`](Socket::is_connection_success) or
    /// [`is_connection_failed`](Socket::is_connection_failed) fires before
    /// using it.
    pub fn start_client(
        &mut self,
        host: &str,
        port: u16,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        init()?;

        let addr = resolve(host, port)?;
        let handle = sys::new_socket(Family::of(&addr), Kind::Stream)
            .map_err(|e| Error::from_sys(ErrorKind::SocketCreate, e))?;
        let client = Socket::new(handle, Role::StreamClient);

        client.set_connect_phase(ConnectPhase::Pending);
        sys::connect(handle, &addr).map_err(|e| Error::from_sys(ErrorKind::Connect, e))?;

        Ok(self.register(client, attachment))
    }

    /// Starts a dual-stack UDP server bound to `port`.
    ///
    /// Read readiness is watched from the start, so the server can take
    /// request datagrams right away.
    pub fn start_udp_server(
        &mut self,
        port: u16,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        init()?;

        let handle = sys::new_socket(Family::V6, Kind::Datagram)
            .map_err(|e| Error::from_sys(ErrorKind::SocketCreate, e))?;
        let receiver = Socket::new(handle, Role::DatagramEndpoint);

        sys::set_reuse(handle).map_err(|e| Error::from_sys(ErrorKind::SetOption, e))?;
        sys::set_dual_stack(handle).map_err(|e| Error::from_sys(ErrorKind::SetOption, e))?;
        sys::bind_any_v6(handle, port).map_err(|e| Error::from_sys(ErrorKind::Bind, e))?;

        receiver.watch_readable(true);

        Ok(self.register(receiver, attachment))
    }

    /// Starts a UDP server on `port` joined to the multicast group at
    /// `group`, which may be an IPv4 or IPv6 address in text form.
    ///
    /// IPv4 groups are joined on `INADDR_ANY`, IPv6 groups on interface 0.
    pub fn start_multicast_server(
        &mut self,
        group: &str,
        port: u16,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        let group_addr: IpAddr = group
            .parse()
            .map_err(|_| Error::new(ErrorKind::Resolve))?;

        let receiver = self.start_udp_server(port, attachment)?;

        let joined = match group_addr {
            IpAddr::V4(ref v4) => sys::join_multicast_v4(receiver.handle(), v4),
            IpAddr::V6(ref v6) => sys::join_multicast_v6(receiver.handle(), v6),
        };
        if let Err(e) = joined {
            // Membership is mandatory; take the half-configured socket back
            // out of the registry before surfacing the failure.
            self.sockets.remove(&receiver.handle());
            return Err(Error::from_sys(ErrorKind::SetOption, e));
        }

        Ok(receiver)
    }

    /// Creates a UDP socket that remembers the resolved `host:port` peer.
    ///
    /// No bind or connect happens here; the first
    /// [`send_to_peer`](Socket::send_to_peer) binds the socket implicitly,
    /// after which [`recv_from_peer`](Socket::recv_from_peer) receives the
    /// peer's replies. Cancel the socket when the conversation is over.
    pub fn start_udp_client(
        &mut self,
        host: &str,
        port: u16,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        init()?;

        let peer = resolve(host, port)?;
        let handle = sys::new_socket(Family::of(&peer), Kind::Datagram)
            .map_err(|e| Error::from_sys(ErrorKind::SocketCreate, e))?;
        let client = Socket::new(handle, Role::DatagramClient { peer });

        Ok(self.register(client, attachment))
    }

    /// Accepts one client waiting on `server`, registering the new stream
    /// socket with no initial interests.
    ///
    /// Call this when a wait reports the server
    /// [`is_acceptable`](Socket::is_acceptable).
    pub fn accept(
        &mut self,
        server: &Socket,
        attachment: Option<Rc<dyn Any>>,
    ) -> Result<Rc<Socket>> {
        let handle =
            sys::accept(server.handle()).map_err(|e| Error::from_sys(ErrorKind::Accept, e))?;
        let client = Socket::new(handle, Role::StreamClient);

        Ok(self.register(client, attachment))
    }

    /// Marks `socket` for removal at the start of the next `select`.
    ///
    /// Until then the socket stays in the registry and keeps working, so a
    /// loop over [`sockets`](Selector::sockets) may cancel freely. The
    /// purge drops the registry's reference; once the caller's references
    /// are gone too, the handle is closed.
    pub fn cancel_socket(&mut self, socket: &Socket) {
        if self.sockets.contains_key(&socket.handle()) {
            self.canceled.insert(socket.handle());
        }
    }

    fn purge_canceled(&mut self) {
        for handle in mem::take(&mut self.canceled) {
            if self.sockets.remove(&handle).is_some() {
                debug!("purged canceled socket: handle={}", handle);
            }
        }
    }

    /// Waits for readiness on every registered socket and updates their
    /// state flags.
    ///
    /// `timeout_secs` is the maximum wait in whole seconds; zero or a
    /// negative value blocks indefinitely.
    ///
    /// Returns the number of ready sockets, `Ok(0)` on timeout, or a
    /// negative count when a signal interrupted the wait; the state flags
    /// are untouched in the last two cases and the call may simply be
    /// retried. Any other wait failure is `SelectFailed`.
    pub fn select(&mut self, timeout_secs: i64) -> Result<i32> {
        self.purge_canceled();

        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut except_set = FdSet::new();

        for socket in self.sockets.values() {
            if socket.is_watching_readable() || socket.is_watching_acceptable() {
                read_set.insert(socket.handle());
            }
            if socket.is_watching_writable() {
                write_set.insert(socket.handle());
            }
            if socket.is_connection_pending() {
                // Connect completion is signalled through write readiness;
                // Winsock reports a failed connect through the exception
                // set instead.
                write_set.insert(socket.handle());
                if cfg!(windows) {
                    except_set.insert(socket.handle());
                }
            }
        }

        let num_events =
            match sys::select(&mut read_set, &mut write_set, &mut except_set, timeout_secs) {
                Ok(n) => n,
                Err(e) => {
                    return match sys::classify_io(&e) {
                        // A handled signal; the caller may retry as-is.
                        ErrorClass::Interrupted | ErrorClass::InProgress => Ok(-1),
                        _ => Err(Error::from_sys(ErrorKind::SelectFailed, e)),
                    };
                }
            };

        if num_events == 0 {
            trace!("select timed out");
            return Ok(0);
        }

        trace!("select reported {} ready", num_events);

        for socket in self.sockets.values() {
            if socket.is_connection_pending() {
                resolve_pending_connect(socket, &write_set, &except_set)?;
            } else {
                // Connect success is visible for exactly one cycle.
                if socket.is_connection_success() {
                    socket.set_connect_phase(ConnectPhase::Idle);
                }

                // For a server socket, read readiness means a client is
                // waiting to be accepted.
                if socket.is_watching_acceptable() {
                    socket.set_acceptable(read_set.contains(socket.handle()));
                } else {
                    socket.set_readable(read_set.contains(socket.handle()));
                }
                socket.set_writable(write_set.contains(socket.handle()));
            }
        }

        Ok(num_events)
    }
}

/// Settles a pending connect from the sets the wait filled in. A socket in
/// neither set is still pending and keeps its state.
fn resolve_pending_connect(
    socket: &Socket,
    write_set: &FdSet,
    except_set: &FdSet,
) -> Result<()> {
    #[cfg(unix)]
    {
        let _ = except_set;
        if write_set.contains(socket.handle()) {
            // Write readiness alone does not distinguish success from
            // failure here; SO_ERROR does.
            let pending = sys::take_error(socket.handle())
                .map_err(|e| Error::from_sys(ErrorKind::SelectFailed, e))?;
            match pending {
                Some(err) => {
                    trace!(
                        "connect failed: handle={}, error={}",
                        socket.handle(),
                        err
                    );
                    socket.set_connect_phase(ConnectPhase::Failed);
                }
                None => socket.set_connect_phase(ConnectPhase::Succeeded),
            }
        }
    }

    #[cfg(windows)]
    {
        // A successful connect may appear in both sets, so the write set
        // must be checked before the exception set.
        if write_set.contains(socket.handle()) {
            socket.set_connect_phase(ConnectPhase::Succeeded);
        } else if except_set.contains(socket.handle()) {
            trace!("connect failed: handle={}", socket.handle());
            socket.set_connect_phase(ConnectPhase::Failed);
        }
    }

    Ok(())
}

fn init() -> Result<()> {
    sys::init().map_err(|e| Error::from_sys(ErrorKind::InitFailed, e))
}

/// Resolves `host:port` and keeps the first address, IPv4 or IPv6.
fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::from_sys(ErrorKind::Resolve, e))?;
    addrs.next().ok_or_else(|| Error::new(ErrorKind::Resolve))
}
