//! Network helpers

use std::io;
use std::net::{Ipv4Addr, TcpListener};

/// Highest loopback TCP port that can currently be bound, scanning down from
/// 65535. The check socket is closed again, so another process may grab the
/// port before the caller binds it.
pub fn available_port() -> io::Result<u16> {
    (1..=u16::MAX)
        .rev()
        .find(|&port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no bindable loopback port"))
}
