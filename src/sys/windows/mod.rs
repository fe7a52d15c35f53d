use std::cmp;
use std::fs::File;
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::windows::io::AsRawHandle;
use std::ptr;
use std::sync::Once;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Networking::WinSock::{
    self, AF_INET, AF_INET6, FD_SET, FIONBIO, IN6_ADDR, IN6_ADDR_0, IN_ADDR,
    IN_ADDR_0, IPPROTO_IP, IPPROTO_IPV6, IPV6_JOIN_GROUP, IPV6_MREQ, IPV6_V6ONLY,
    IP_ADD_MEMBERSHIP, IP_MREQ, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE,
    SOCKET_ERROR, SOCK_DGRAM, SOCK_STREAM, SOL_SOCKET, SO_ERROR, SO_REUSEADDR, TIMEVAL,
    WSAGetLastError, WSAECONNRESET, WSAEINPROGRESS, WSAEINTR, WSAEMSGSIZE, WSAEWOULDBLOCK,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_COPY, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE, PAGE_WRITECOPY,
};

use super::{ErrorClass, Family, Kind};

/// OS socket handle.
pub type RawSocket = WinSock::SOCKET;

/// Sentinel for "no socket".
pub const INVALID_SOCKET: RawSocket = WinSock::INVALID_SOCKET;

fn last_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

// Helper macro to execute a Winsock call that reports failure through
// `SOCKET_ERROR`.
macro_rules! wsa {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { WinSock::$fn($($arg, )*) };
        if res == SOCKET_ERROR {
            Err(last_error())
        } else {
            Ok(res)
        }
    }};
}

/// Initialise the network stack.
///
/// The standard library runs `WSAStartup` the first time anything in
/// `std::net` is touched and owns the matching cleanup at process exit, so
/// a throwaway bind is all that is needed here.
pub(crate) fn init() -> io::Result<()> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        drop(std::net::UdpSocket::bind("127.0.0.1:0"));
    });
    Ok(())
}

pub(crate) fn classify(raw: i32) -> ErrorClass {
    if raw == WSAEWOULDBLOCK {
        ErrorClass::WouldBlock
    } else if raw == WSAEINPROGRESS {
        ErrorClass::InProgress
    } else if raw == WSAEINTR {
        ErrorClass::Interrupted
    } else if raw == WSAECONNRESET {
        ErrorClass::ConnReset
    } else if raw == WSAEMSGSIZE {
        ErrorClass::MsgSize
    } else {
        ErrorClass::Other
    }
}

/// Create a new non-blocking socket.
pub(crate) fn new_socket(family: Family, kind: Kind) -> io::Result<RawSocket> {
    let domain = match family {
        Family::V4 => AF_INET,
        Family::V6 => AF_INET6,
    };
    let socket_type = match kind {
        Kind::Stream => SOCK_STREAM,
        Kind::Datagram => SOCK_DGRAM,
    };

    let socket = unsafe { WinSock::socket(domain as i32, socket_type as i32, 0) };
    if socket == INVALID_SOCKET {
        return Err(last_error());
    }
    set_nonblocking(socket).map_err(|e| {
        close(socket);
        e
    })?;
    Ok(socket)
}

pub(crate) fn close(socket: RawSocket) {
    let _ = wsa!(closesocket(socket));
}

pub(crate) fn set_nonblocking(socket: RawSocket) -> io::Result<()> {
    let mut nonblocking: u32 = 1;
    wsa!(ioctlsocket(socket, FIONBIO, &mut nonblocking)).map(|_| ())
}

fn set_opt<T>(socket: RawSocket, level: i32, name: i32, value: &T) -> io::Result<()> {
    wsa!(setsockopt(
        socket,
        level,
        name,
        value as *const T as *const u8,
        mem::size_of::<T>() as i32,
    ))
    .map(|_| ())
}

/// Allow rebinding a recently-used address. Winsock has no `SO_REUSEPORT`;
/// `SO_REUSEADDR` alone carries that meaning here.
pub(crate) fn set_reuse(socket: RawSocket) -> io::Result<()> {
    let on: i32 = 1;
    set_opt(socket, SOL_SOCKET as i32, SO_REUSEADDR as i32, &on)
}

/// Disable `IPV6_V6ONLY` so one v6 socket carries IPv4-mapped peers too.
pub(crate) fn set_dual_stack(socket: RawSocket) -> io::Result<()> {
    let off: i32 = 0;
    set_opt(socket, IPPROTO_IPV6 as i32, IPV6_V6ONLY as i32, &off)
}

pub(crate) fn join_multicast_v4(socket: RawSocket, group: &Ipv4Addr) -> io::Result<()> {
    let mreq = IP_MREQ {
        imr_multiaddr: IN_ADDR {
            S_un: IN_ADDR_0 {
                S_addr: u32::from_ne_bytes(group.octets()),
            },
        },
        imr_interface: IN_ADDR {
            S_un: IN_ADDR_0 { S_addr: 0 },
        },
    };
    set_opt(socket, IPPROTO_IP as i32, IP_ADD_MEMBERSHIP as i32, &mreq)
}

pub(crate) fn join_multicast_v6(socket: RawSocket, group: &Ipv6Addr) -> io::Result<()> {
    let mreq = IPV6_MREQ {
        ipv6mr_multiaddr: IN6_ADDR {
            u: IN6_ADDR_0 {
                Byte: group.octets(),
            },
        },
        ipv6mr_interface: 0,
    };
    set_opt(socket, IPPROTO_IPV6 as i32, IPV6_JOIN_GROUP as i32, &mreq)
}

/// Bind to `in6addr_any` on the given port.
pub(crate) fn bind_any_v6(socket: RawSocket, port: u16) -> io::Result<()> {
    let mut sin6: SOCKADDR_IN6 = unsafe { mem::zeroed() };
    sin6.sin6_family = AF_INET6;
    sin6.sin6_port = port.to_be();
    wsa!(bind(
        socket,
        &sin6 as *const SOCKADDR_IN6 as *const SOCKADDR,
        mem::size_of::<SOCKADDR_IN6>() as i32,
    ))
    .map(|_| ())
}

pub(crate) fn listen(socket: RawSocket, backlog: u32) -> io::Result<()> {
    wsa!(listen(socket, backlog as i32)).map(|_| ())
}

/// Start a non-blocking connect. An in-progress result is not an error;
/// completion is observed through write (or exception) readiness later.
pub(crate) fn connect(socket: RawSocket, addr: &SocketAddr) -> io::Result<()> {
    let (raw, len) = socket_addr(addr);
    match wsa!(connect(socket, raw.as_ptr(), len)) {
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

/// Accept one pending connection; the returned socket is non-blocking.
pub(crate) fn accept(listener: RawSocket) -> io::Result<RawSocket> {
    let stream = unsafe { WinSock::accept(listener, ptr::null_mut(), ptr::null_mut()) };
    if stream == INVALID_SOCKET {
        return Err(last_error());
    }
    set_nonblocking(stream).map_err(|e| {
        close(stream);
        e
    })?;
    Ok(stream)
}

/// Drain the pending socket error, if any (`SO_ERROR`).
#[allow(dead_code)]
pub(crate) fn take_error(socket: RawSocket) -> io::Result<Option<io::Error>> {
    let mut val: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;
    wsa!(getsockopt(
        socket,
        SOL_SOCKET as i32,
        SO_ERROR as i32,
        &mut val as *mut i32 as *mut u8,
        &mut len,
    ))?;
    if val == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(val)))
    }
}

fn clamp_len(len: usize) -> i32 {
    cmp::min(len, i32::MAX as usize) as i32
}

pub(crate) fn recv(socket: RawSocket, buf: &mut [u8]) -> io::Result<usize> {
    wsa!(recv(socket, buf.as_mut_ptr(), clamp_len(buf.len()), 0)).map(|n| n as usize)
}

pub(crate) fn send(socket: RawSocket, buf: &[u8]) -> io::Result<usize> {
    wsa!(send(socket, buf.as_ptr(), clamp_len(buf.len()), 0)).map(|n| n as usize)
}

pub(crate) fn recv_from(socket: RawSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let mut storage: MaybeUninit<SOCKADDR_STORAGE> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
    match wsa!(recvfrom(
        socket,
        buf.as_mut_ptr(),
        clamp_len(buf.len()),
        0,
        storage.as_mut_ptr() as *mut SOCKADDR,
        &mut len,
    )) {
        Ok(n) => {
            let addr = unsafe { to_socket_addr(storage.as_ptr()) }?;
            Ok((n as usize, addr))
        }
        // Winsock flags a datagram bigger than the buffer as an error even
        // though the buffer was filled; fold it back into the number of
        // bytes that fit, which is what BSD sockets report.
        Err(ref e) if super::classify_io(e) == ErrorClass::MsgSize => {
            let addr = unsafe { to_socket_addr(storage.as_ptr()) }?;
            Ok((buf.len(), addr))
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn send_to(socket: RawSocket, buf: &[u8], addr: &SocketAddr) -> io::Result<usize> {
    let (raw, len) = socket_addr(addr);
    wsa!(sendto(
        socket,
        buf.as_ptr(),
        clamp_len(buf.len()),
        0,
        raw.as_ptr(),
        len,
    ))
    .map(|n| n as usize)
}

/// A level-triggered readiness set over the Winsock `fd_set`.
///
/// Winsock's variant is an array of handles, not a bitmask; membership is a
/// linear scan and inserts beyond `FD_SETSIZE` slots are dropped, exactly
/// as the `FD_SET` macro does.
pub(crate) struct FdSet {
    raw: FD_SET,
}

impl FdSet {
    pub(crate) fn new() -> FdSet {
        FdSet {
            raw: unsafe { mem::zeroed() },
        }
    }

    pub(crate) fn insert(&mut self, socket: RawSocket) {
        let n = self.raw.fd_count as usize;
        if n < self.raw.fd_array.len() {
            self.raw.fd_array[n] = socket;
            self.raw.fd_count += 1;
        }
    }

    pub(crate) fn contains(&self, socket: RawSocket) -> bool {
        self.raw.fd_array[..self.raw.fd_count as usize].contains(&socket)
    }
}

/// Block until one of the sets is ready.
///
/// `timeout_secs <= 0` blocks indefinitely; the resolution is whole
/// seconds. Winsock ignores the nfds argument.
pub(crate) fn select(
    read: &mut FdSet,
    write: &mut FdSet,
    except: &mut FdSet,
    timeout_secs: i64,
) -> io::Result<i32> {
    let tv = TIMEVAL {
        tv_sec: cmp::min(timeout_secs, i32::MAX as i64) as i32,
        tv_usec: 0,
    };
    let tv_ptr = if timeout_secs > 0 {
        &tv as *const TIMEVAL
    } else {
        ptr::null()
    };
    wsa!(select(
        0,
        &mut read.raw,
        &mut write.raw,
        &mut except.raw,
        tv_ptr,
    ))
}

#[repr(C)]
pub(crate) union SocketAddrCRepr {
    v4: SOCKADDR_IN,
    v6: SOCKADDR_IN6,
}

impl SocketAddrCRepr {
    pub(crate) fn as_ptr(&self) -> *const SOCKADDR {
        self as *const SocketAddrCRepr as *const SOCKADDR
    }
}

/// Convert a standard address into something `bind`/`connect`/`sendto` take.
pub(crate) fn socket_addr(addr: &SocketAddr) -> (SocketAddrCRepr, i32) {
    match addr {
        SocketAddr::V4(ref addr) => {
            let mut sin: SOCKADDR_IN = unsafe { mem::zeroed() };
            sin.sin_family = AF_INET;
            sin.sin_port = addr.port().to_be();
            sin.sin_addr.S_un.S_addr = u32::from_ne_bytes(addr.ip().octets());
            (
                SocketAddrCRepr { v4: sin },
                mem::size_of::<SOCKADDR_IN>() as i32,
            )
        }
        SocketAddr::V6(ref addr) => {
            let mut sin6: SOCKADDR_IN6 = unsafe { mem::zeroed() };
            sin6.sin6_family = AF_INET6;
            sin6.sin6_port = addr.port().to_be();
            sin6.sin6_addr.u.Byte = addr.ip().octets();
            sin6.sin6_flowinfo = addr.flowinfo();
            sin6.Anonymous.sin6_scope_id = addr.scope_id();
            (
                SocketAddrCRepr { v6: sin6 },
                mem::size_of::<SOCKADDR_IN6>() as i32,
            )
        }
    }
}

/// Decode a `SOCKADDR_STORAGE` filled in by Winsock.
///
/// `storage` must hold an initialised `SOCKADDR_IN` or `SOCKADDR_IN6`.
pub(crate) unsafe fn to_socket_addr(
    storage: *const SOCKADDR_STORAGE,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family {
        AF_INET => {
            let addr: &SOCKADDR_IN = &*(storage as *const SOCKADDR_IN);
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.S_un.S_addr));
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        AF_INET6 => {
            let addr: &SOCKADDR_IN6 = &*(storage as *const SOCKADDR_IN6);
            let ip = Ipv6Addr::from(addr.sin6_addr.u.Byte);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.Anonymous.sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

/// An owned file-mapping view.
///
/// Acquisition is mapping-object then view; release runs in reverse on
/// every path, including construction failures. A read-only view is mapped
/// copy-on-write so writing through the buffer stays memory-local; a
/// writable view is carried through to disk.
pub(crate) struct FileMapping {
    ptr: *mut u8,
    len: usize,
    mapping: HANDLE,
}

impl FileMapping {
    pub(crate) fn new(file: &File, len: usize, read_only: bool) -> io::Result<FileMapping> {
        let (protect, access) = if read_only {
            (PAGE_WRITECOPY, FILE_MAP_COPY)
        } else {
            (PAGE_READWRITE, FILE_MAP_WRITE)
        };

        let mapping = unsafe {
            CreateFileMappingW(
                file.as_raw_handle() as HANDLE,
                ptr::null(),
                protect,
                0,
                0,
                ptr::null(),
            )
        };
        if mapping.is_null() {
            return Err(io::Error::last_os_error());
        }

        let view = unsafe { MapViewOfFile(mapping, access, 0, 0, len) };
        if view.Value.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(mapping) };
            return Err(err);
        }

        Ok(FileMapping {
            ptr: view.Value as *mut u8,
            len,
            mapping,
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
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.ptr as _,
            });
            CloseHandle(self.mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ErrorClass;
    use super::classify;
    use windows_sys::Win32::Networking::WinSock::{
        WSAECONNRESET, WSAEINPROGRESS, WSAEINTR, WSAEMSGSIZE, WSAEWOULDBLOCK,
    };

    #[test]
    fn classify_known_codes() {
        assert_eq!(classify(WSAEWOULDBLOCK), ErrorClass::WouldBlock);
        assert_eq!(classify(WSAEINPROGRESS), ErrorClass::InProgress);
        assert_eq!(classify(WSAEINTR), ErrorClass::Interrupted);
        assert_eq!(classify(WSAECONNRESET), ErrorClass::ConnReset);
        assert_eq!(classify(WSAEMSGSIZE), ErrorClass::MsgSize);
    }

    #[test]
    fn classify_unknown_is_other() {
        assert_eq!(classify(0), ErrorClass::Other);
    }
}
