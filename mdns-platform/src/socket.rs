use std::net::{Ipv4Addr, SocketAddrV4};

use mdns_core::SocketFactory;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Builds the IPv4 multicast socket the interface layer needs: `SO_REUSEADDR`
/// and `socket2`-level multicast options that `tokio::net::UdpSocket` cannot
/// set before bind.
#[derive(Debug, Default)]
pub struct StdSocketFactory;

impl StdSocketFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SocketFactory for StdSocketFactory {
    fn bind_multicast_v4(
        &self,
        bind_addr: SocketAddrV4,
        outgoing_interface: Option<Ipv4Addr>,
    ) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(255)?;
        socket.set_nonblocking(true)?;
        if let Some(interface) = outgoing_interface {
            socket.set_multicast_if_v4(&interface)?;
        }
        socket.bind(&socket2::SockAddr::from(bind_addr))?;
        UdpSocket::from_std(socket.into())
    }

    fn join_multicast_v4(&self, socket: &UdpSocket, group: Ipv4Addr, interface: Ipv4Addr) -> std::io::Result<()> {
        socket.join_multicast_v4(group, interface)
    }
}
