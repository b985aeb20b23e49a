//! Datagram transport for heartbeats.
//!
//! Outbound heartbeats go through one connected socket per peer, so that an
//! unreachable peer only ever fails its own sends. Inbound heartbeats arrive
//! on a single listener bound to the configured address.

use crate::peer::Peer;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::error;

/// Receive buffer size; anything longer than a payload is rejected anyway
pub const RECV_BUFFER_SIZE: usize = 128;

/// Connected datagram socket used to send heartbeats to a single peer
pub struct PeerSocket {
    socket: Socket,
    remote: SocketAddrV4,
}

impl PeerSocket {
    /// Create a socket bound to `local` (ephemeral port) and connected to `remote`
    pub fn connect(local: Ipv4Addr, remote: SocketAddrV4) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        socket.bind(&SocketAddr::from((local, 0)).into())?;
        socket.connect(&SocketAddr::V4(remote).into())?;

        // Sends never wait on a slow peer
        socket.set_nonblocking(true)?;

        Ok(Self { socket, remote })
    }

    /// Write one datagram to the peer
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    /// Remote address
    pub fn remote(&self) -> SocketAddrV4 {
        self.remote
    }
}

/// Socket receiving heartbeats from every peer
pub struct HeartbeatListener {
    socket: tokio::net::UdpSocket,
}

impl HeartbeatListener {
    /// Bind the listener
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

        // Allow a restarted daemon to rebind immediately
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = tokio::net::UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

/// Outcome of one advertisement pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send `payload` to every peer, logging failures per peer
pub fn broadcast<'a>(peers: impl IntoIterator<Item = &'a Peer>, payload: &[u8]) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for peer in peers {
        match peer.send(payload) {
            Ok(_) => report.sent += 1,
            Err(e) => {
                error!(
                    peer = %peer.addr(),
                    nic = %peer.nic_id(),
                    error = %e,
                    "Failure sending heartbeat to peer"
                );
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NicId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_peer_socket_reaches_listener() {
        let listener = HeartbeatListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let SocketAddr::V4(target) = listener.local_addr().unwrap() else {
            panic!("listener should be IPv4");
        };

        let socket = PeerSocket::connect(Ipv4Addr::LOCALHOST, target).unwrap();
        assert_eq!(socket.remote(), target);
        assert_eq!(socket.send(b"hello").unwrap(), 5);

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, src) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("datagram should arrive")
            .unwrap();

        assert_eq!(&buf[..len], b"hello");
        assert_eq!(src.ip(), std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let first = HeartbeatListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let second = HeartbeatListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let peers: Vec<Peer> = [&first, &second]
            .iter()
            .map(|l| match l.local_addr().unwrap() {
                SocketAddr::V4(addr) => Peer::new(addr, NicId::nil(), Ipv4Addr::LOCALHOST).unwrap(),
                SocketAddr::V6(_) => unreachable!(),
            })
            .collect();

        let report = broadcast(&peers, b"heartbeat");
        assert_eq!(report, BroadcastReport { sent: 2, failed: 0 });

        for listener in [&first, &second] {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
                .await
                .expect("datagram should arrive")
                .unwrap();
            assert_eq!(&buf[..len], b"heartbeat");
        }
    }
}
