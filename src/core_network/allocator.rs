// Backchannel socket allocator.
//
// Every data-channel socket the proxy owns is bound inside the configured
// ephemeral range: the listen sockets standing in for either peer's
// advertised data port, and the range-bound sockets used for the outbound
// leg of a bridge. The cursor starts at a random port and advances past
// every successful bind, so ports handed out within one session are
// distinct until the range wraps.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};

use log::trace;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpSocket;

use crate::constants::DATA_BACKLOG;

#[derive(Debug)]
pub struct PortAllocator {
    lo: u16,
    hi: u16,
    next: u16,
}

impl PortAllocator {
    pub fn new(lo: u16, hi: u16) -> Self {
        let next = rand::thread_rng().gen_range(lo..=hi);
        PortAllocator { lo, hi, next }
    }

    fn advance(&mut self) {
        self.next = if self.next >= self.hi {
            self.lo
        } else {
            self.next + 1
        };
    }

    fn span(&self) -> u32 {
        u32::from(self.hi) - u32::from(self.lo) + 1
    }

    fn exhausted() -> io::Error {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "backchannel port range exhausted",
        )
    }

    /// Binds a listen socket on `ip` at the next free port in the range.
    /// The socket is listening (backlog 5) and non-blocking, ready for
    /// `tokio::net::TcpListener::from_std`.
    pub fn bind_listener(&mut self, ip: Ipv4Addr) -> io::Result<TcpListener> {
        for _ in 0..self.span() {
            let port = self.next;
            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
            match socket.bind(&SocketAddr::V4(SocketAddrV4::new(ip, port)).into()) {
                Ok(()) => {
                    socket.listen(DATA_BACKLOG)?;
                    socket.set_nonblocking(true)?;
                    self.advance();
                    trace!("backchannel listener bound on {ip}:{port}");
                    return Ok(socket.into());
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    self.advance();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Self::exhausted())
    }

    /// Binds an unconnected socket on `ip` at the next free port, for the
    /// outbound leg of a data-channel bridge.
    pub fn bind_socket(&mut self, ip: Ipv4Addr) -> io::Result<TcpSocket> {
        for _ in 0..self.span() {
            let port = self.next;
            let socket = TcpSocket::new_v4()?;
            match socket.bind(SocketAddr::V4(SocketAddrV4::new(ip, port))) {
                Ok(()) => {
                    self.advance();
                    trace!("outbound data socket bound on {ip}:{port}");
                    return Ok(socket);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    self.advance();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Self::exhausted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

    #[test]
    fn listener_lands_inside_the_range() {
        let mut alloc = PortAllocator::new(45000, 45099);
        let listener = alloc.bind_listener(LOOPBACK).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!((45000..=45099).contains(&port));
    }

    #[test]
    fn successive_allocations_use_distinct_ports() {
        let mut alloc = PortAllocator::new(45100, 45199);
        let a = alloc.bind_listener(LOOPBACK).unwrap();
        let b = alloc.bind_listener(LOOPBACK).unwrap();
        let c = alloc.bind_listener(LOOPBACK).unwrap();
        let ports = [
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port(),
            c.local_addr().unwrap().port(),
        ];
        assert_ne!(ports[0], ports[1]);
        assert_ne!(ports[1], ports[2]);
        assert_ne!(ports[0], ports[2]);
    }

    #[test]
    fn fully_busy_range_reports_exhaustion() {
        let busy = 46600;
        let _blocker = TcpListener::bind((LOOPBACK, busy)).unwrap();
        let mut alloc = PortAllocator::new(busy, busy);
        let err = alloc.bind_listener(LOOPBACK).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[test]
    fn busy_port_is_skipped() {
        let busy = 46700;
        let _blocker = TcpListener::bind((LOOPBACK, busy)).unwrap();
        let mut alloc = PortAllocator::new(busy, busy + 1);
        // Whatever the random start, the busy port must be skipped and the
        // free one taken within one pass.
        let listener = alloc.bind_listener(LOOPBACK).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), busy + 1);
    }

    #[test]
    fn outbound_socket_binds_in_range() {
        let mut alloc = PortAllocator::new(45200, 45299);
        let socket = alloc.bind_socket(LOOPBACK).unwrap();
        let port = socket.local_addr().unwrap().port();
        assert!((45200..=45299).contains(&port));
    }
}
