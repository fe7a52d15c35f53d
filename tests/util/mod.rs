// Not all functions are used by all tests.
#![allow(dead_code)]

use std::net;
use std::sync::Once;

use muxio::Selector;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

/// Upper bound on wait cycles before a test gives up on a condition.
pub const MAX_CYCLES: usize = 50;

/// Runs one-second waits until `cond` holds, panicking after `MAX_CYCLES`.
pub fn drive<F: Fn() -> bool>(selector: &mut Selector, cond: F) {
    for _ in 0..MAX_CYCLES {
        if cond() {
            return;
        }
        // An interrupted wait returns a negative count; just go around.
        selector.select(1).expect("readiness wait failed");
    }
    panic!("condition not reached within {} wait cycles", MAX_CYCLES);
}

/// A TCP port that was free a moment ago.
pub fn free_tcp_port() -> u16 {
    let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A UDP port that was free a moment ago.
pub fn free_udp_port() -> u16 {
    free_udp_ports(1)[0]
}

/// `n` distinct UDP ports that were free a moment ago.
pub fn free_udp_ports(n: usize) -> Vec<u16> {
    let sockets: Vec<_> = (0..n)
        .map(|_| net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    sockets
        .iter()
        .map(|s| s.local_addr().unwrap().port())
        .collect()
}
