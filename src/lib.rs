//! Lightweight level-triggered non-blocking socket I/O with cursor buffers.
//!
//! Muxio puts the three things a single-threaded network program needs
//! behind one event-driven facade:
//!
//! * a [`Selector`] that registers sockets of mixed role (listening
//!   servers, in-progress clients, accepted streams, datagram endpoints,
//!   multicast members) and waits for readiness on all of them with one
//!   blocking [`select`](Selector::select) call;
//! * a [`Socket`] type whose I/O is always non-blocking and reports
//!   through the three-way [`Transfer`] contract, smoothing over the
//!   differences between the BSD-sockets and Winsock dialects;
//! * a [`ByteBuffer`] family: position/limit cursor buffers over heap,
//!   inline, borrowed or file-mapped storage, with big-endian typed I/O.
//!
//! # Examples
//!
//! A minimal echo server:
//!
//! ```no_run
//! use muxio::{HeapByteBuffer, Selector};
//!
//! fn main() -> muxio::Result<()> {
//!     let mut selector = Selector::new();
//!     selector.start_server(2024, None)?;
//!     let mut buf = HeapByteBuffer::new(1024)?;
//!
//!     loop {
//!         if selector.select(5)? <= 0 {
//!             continue;
//!         }
//!         for socket in selector.sockets() {
//!             if socket.is_acceptable() {
//!                 let client = selector.accept(&socket, None)?;
//!                 client.watch_readable(true);
//!             } else if socket.is_readable() {
//!                 buf.clear();
//!                 if socket.read(&mut buf)?.is_disconnected() {
//!                     selector.cancel_socket(&socket);
//!                     continue;
//!                 }
//!                 buf.flip();
//!                 while buf.has_remaining() {
//!                     if socket.write(&mut buf)?.is_disconnected() {
//!                         selector.cancel_socket(&socket);
//!                         break;
//!                     }
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! # Scheduling model
//!
//! Everything here is single-threaded and cooperative. The one place the
//! library blocks is [`Selector::select`]; every other operation returns
//! immediately. Cancellation is deferred: a cancelled socket stays alive
//! and reachable until the next wait begins, which makes it safe to cancel
//! while iterating the registry.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))))]

mod buffer;
mod error;
mod interest;
mod selector;
mod socket;
mod sys;

pub use buffer::{
    ByteBuffer, Heap, HeapByteBuffer, Inline, Mapped, MappedByteBuffer, StaticByteBuffer, Storage,
    WrappedByteBuffer,
};
pub use error::{Error, ErrorKind, Result};
pub use interest::Interest;
pub use selector::Selector;
pub use socket::{Role, Socket, Transfer};
pub use sys::{RawSocket, INVALID_SOCKET};
