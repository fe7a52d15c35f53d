use std::fs::File;
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

use super::{ErrorClass, Family, Kind};

/// OS socket handle.
pub type RawSocket = RawFd;

/// Sentinel for "no socket".
pub const INVALID_SOCKET: RawSocket = -1;

// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Initialise the network stack. BSD sockets need no process-wide startup.
pub(crate) fn init() -> io::Result<()> {
    Ok(())
}

pub(crate) fn classify(raw: i32) -> ErrorClass {
    // EAGAIN and EWOULDBLOCK alias on most platforms but not all.
    if raw == libc::EAGAIN || raw == libc::EWOULDBLOCK {
        ErrorClass::WouldBlock
    } else if raw == libc::EINPROGRESS {
        ErrorClass::InProgress
    } else if raw == libc::EINTR {
        ErrorClass::Interrupted
    } else if raw == libc::ECONNRESET {
        ErrorClass::ConnReset
    } else if raw == libc::EMSGSIZE {
        ErrorClass::MsgSize
    } else {
        ErrorClass::Other
    }
}

/// Create a new non-blocking, close-on-exec socket.
pub(crate) fn new_socket(family: Family, kind: Kind) -> io::Result<RawSocket> {
    let domain = match family {
        Family::V4 => libc::AF_INET,
        Family::V6 => libc::AF_INET6,
    };
    let socket_type = match kind {
        Kind::Stream => libc::SOCK_STREAM,
        Kind::Datagram => libc::SOCK_DGRAM,
    };

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    let socket_type = socket_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;

    let socket = syscall!(socket(domain, socket_type, 0))?;

    // Darwin and Solaris do not have SOCK_NONBLOCK or SOCK_CLOEXEC; the
    // flags need a second round of `fcntl` calls. If one of those fails,
    // `close` keeps the fresh socket from leaking.
    #[cfg(any(target_os = "ios", target_os = "macos", target_os = "solaris"))]
    syscall!(fcntl(socket, libc::F_SETFL, libc::O_NONBLOCK))
        .and_then(|_| syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC)))
        .map_err(|e| {
            let _ = syscall!(close(socket));
            e
        })?;

    Ok(socket)
}

pub(crate) fn close(fd: RawSocket) {
    let _ = syscall!(close(fd));
}

pub(crate) fn set_nonblocking(fd: RawSocket) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)).map(|_| ())
}

fn set_opt<T>(fd: RawSocket, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    syscall!(setsockopt(
        fd,
        level,
        name,
        value as *const T as *const libc::c_void,
        mem::size_of::<T>() as libc::socklen_t,
    ))
    .map(|_| ())
}

/// Allow rebinding a recently-used address: `SO_REUSEADDR`, plus
/// `SO_REUSEPORT` where the platform has it.
pub(crate) fn set_reuse(fd: RawSocket) -> io::Result<()> {
    let on: libc::c_int = 1;
    set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &on)?;
    #[cfg(not(target_os = "solaris"))]
    set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, &on)?;
    Ok(())
}

/// Disable `IPV6_V6ONLY` so one v6 socket carries IPv4-mapped peers too.
pub(crate) fn set_dual_stack(fd: RawSocket) -> io::Result<()> {
    let off: libc::c_int = 0;
    set_opt(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, &off)
}

pub(crate) fn join_multicast_v4(fd: RawSocket, group: &Ipv4Addr) -> io::Result<()> {
    let mreq = libc::ip_mreq {
        imr_multiaddr: libc::in_addr {
            s_addr: u32::from_ne_bytes(group.octets()),
        },
        imr_interface: libc::in_addr {
            s_addr: libc::INADDR_ANY,
        },
    };
    set_opt(fd, libc::IPPROTO_IP, libc::IP_ADD_MEMBERSHIP, &mreq)
}

pub(crate) fn join_multicast_v6(fd: RawSocket, group: &Ipv6Addr) -> io::Result<()> {
    let mreq = libc::ipv6_mreq {
        ipv6mr_multiaddr: libc::in6_addr {
            s6_addr: group.octets(),
        },
        ipv6mr_interface: 0,
    };
    set_opt(fd, libc::IPPROTO_IPV6, libc::IPV6_ADD_MEMBERSHIP, &mreq)
}

/// Bind to `in6addr_any` on the given port.
pub(crate) fn bind_any_v6(fd: RawSocket, port: u16) -> io::Result<()> {
    let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sin6.sin6_port = port.to_be();
    syscall!(bind(
        fd,
        &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
        mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn listen(fd: RawSocket, backlog: u32) -> io::Result<()> {
    syscall!(listen(fd, backlog as libc::c_int)).map(|_| ())
}

/// Start a non-blocking connect. An in-progress result is not an error;
/// completion is observed through write readiness later.
pub(crate) fn connect(fd: RawSocket, addr: &SocketAddr) -> io::Result<()> {
    let (raw, len) = socket_addr(addr);
    match syscall!(connect(fd, raw.as_ptr(), len)) {
        Err(ref e)
            if matches!(
                super::classify_io(e),
                ErrorClass::InProgress | ErrorClass::WouldBlock
            ) =>
        {
            Ok(())
        }
        res => res.map(|_| ()),
    }
}

/// Accept one pending connection; the returned fd is non-blocking.
pub(crate) fn accept(listener: RawSocket) -> io::Result<RawSocket> {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    let stream = syscall!(accept4(
        listener,
        ptr::null_mut(),
        ptr::null_mut(),
        libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
    ))?;

    #[cfg(any(target_os = "ios", target_os = "macos", target_os = "solaris"))]
    let stream = {
        let stream = syscall!(accept(listener, ptr::null_mut(), ptr::null_mut()))?;
        syscall!(fcntl(stream, libc::F_SETFL, libc::O_NONBLOCK))
            .and_then(|_| syscall!(fcntl(stream, libc::F_SETFD, libc::FD_CLOEXEC)))
            .map_err(|e| {
                let _ = syscall!(close(stream));
                e
            })?;
        stream
    };

    Ok(stream)
}

/// Drain the pending socket error, if any (`SO_ERROR`).
pub(crate) fn take_error(fd: RawSocket) -> io::Result<Option<io::Error>> {
    let mut val: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut val as *mut libc::c_int as *mut libc::c_void,
        &mut len,
    ))?;
    if val == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(val)))
    }
}

#[cfg(any(target_os = "android", target_os = "linux"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "android", target_os = "linux")))]
const SEND_FLAGS: libc::c_int = 0;

pub(crate) fn recv(fd: RawSocket, buf: &mut [u8]) -> io::Result<usize> {
    syscall!(recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)).map(|n| n as usize)
}

pub(crate) fn send(fd: RawSocket, buf: &[u8]) -> io::Result<usize> {
    syscall!(send(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        SEND_FLAGS,
    ))
    .map(|n| n as usize)
}

pub(crate) fn recv_from(fd: RawSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = syscall!(recvfrom(
        fd,
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
        0,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    let addr = unsafe { to_socket_addr(storage.as_ptr()) }?;
    Ok((n as usize, addr))
}

pub(crate) fn send_to(fd: RawSocket, buf: &[u8], addr: &SocketAddr) -> io::Result<usize> {
    let (raw, len) = socket_addr(addr);
    syscall!(sendto(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        SEND_FLAGS,
        raw.as_ptr(),
        len,
    ))
    .map(|n| n as usize)
}

/// A level-triggered readiness set over the platform `fd_set`.
pub(crate) struct FdSet {
    raw: libc::fd_set,
}

impl FdSet {
    pub(crate) fn new() -> FdSet {
        let mut raw = MaybeUninit::<libc::fd_set>::zeroed();
        unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            FdSet {
                raw: raw.assume_init(),
            }
        }
    }

    pub(crate) fn insert(&mut self, fd: RawSocket) {
        unsafe { libc::FD_SET(fd, &mut self.raw) }
    }

    pub(crate) fn contains(&self, fd: RawSocket) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.raw) }
    }
}

/// Block until one of the sets is ready.
///
/// `timeout_secs <= 0` blocks indefinitely; the resolution is whole
/// seconds. The nfds argument stays pinned at `FD_SETSIZE`, the ceiling of
/// this backend.
pub(crate) fn select(
    read: &mut FdSet,
    write: &mut FdSet,
    except: &mut FdSet,
    timeout_secs: i64,
) -> io::Result<i32> {
    let mut tv = libc::timeval {
        tv_sec: timeout_secs as libc::time_t,
        tv_usec: 0,
    };
    let tv_ptr = if timeout_secs > 0 {
        &mut tv as *mut libc::timeval
    } else {
        ptr::null_mut()
    };
    syscall!(select(
        libc::FD_SETSIZE as libc::c_int,
        &mut read.raw,
        &mut write.raw,
        &mut except.raw,
        tv_ptr,
    ))
}

#[repr(C)]
pub(crate) union SocketAddrCRepr {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

impl SocketAddrCRepr {
    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const SocketAddrCRepr as *const libc::sockaddr
    }
}

/// Convert a standard address into something `bind`/`connect`/`sendto` take.
pub(crate) fn socket_addr(addr: &SocketAddr) -> (SocketAddrCRepr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(ref addr) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = addr.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            };
            (
                SocketAddrCRepr { v4: sin },
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(ref addr) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = addr.port().to_be();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: addr.ip().octets(),
            };
            sin6.sin6_flowinfo = addr.flowinfo();
            sin6.sin6_scope_id = addr.scope_id();
            (
                SocketAddrCRepr { v6: sin6 },
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}

/// Decode a `sockaddr_storage` filled in by the kernel.
///
/// `storage` must hold an initialised `sockaddr_in` or `sockaddr_in6`.
pub(crate) unsafe fn to_socket_addr(
    storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = &*(storage as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = &*(storage as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

/// An owned `mmap` view over an open file.
///
/// A read-only view is mapped private (copy-on-write) so writing through the
/// buffer stays memory-local instead of faulting; a writable view is shared
/// and carried through to disk.
pub(crate) struct FileMapping {
    ptr: *mut u8,
    len: usize,
}

impl FileMapping {
    pub(crate) fn new(file: &File, len: usize, read_only: bool) -> io::Result<FileMapping> {
        let flags = if read_only {
            libc::MAP_PRIVATE
        } else {
            libc::MAP_SHARED
        };
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(FileMapping {
            ptr: ptr as *mut u8,
            len,
        })
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ErrorClass;
    use super::classify;

    #[test]
    fn classify_known_codes() {
        assert_eq!(classify(libc::EAGAIN), ErrorClass::WouldBlock);
        assert_eq!(classify(libc::EWOULDBLOCK), ErrorClass::WouldBlock);
        assert_eq!(classify(libc::EINPROGRESS), ErrorClass::InProgress);
        assert_eq!(classify(libc::EINTR), ErrorClass::Interrupted);
        assert_eq!(classify(libc::ECONNRESET), ErrorClass::ConnReset);
        assert_eq!(classify(libc::EMSGSIZE), ErrorClass::MsgSize);
    }

    #[test]
    fn classify_unknown_is_other() {
        assert_eq!(classify(libc::ENOENT), ErrorClass::Other);
        assert_eq!(classify(0), ErrorClass::Other);
    }
}
