use std::collections::HashMap;
use std::net::{IpAddr, SocketAddrV4, Ipv4Addr};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

#[derive(Debug, Clone)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub family: AddressFamily,
    pub internal: bool,
}

/// The single capability the core needs from the host to enumerate network
/// interfaces. Implemented by `mdns-platform`; called on demand, never
/// cached by the core itself.
pub trait PlatformInterfaces: Send + Sync {
    fn interfaces(&self) -> HashMap<String, Vec<InterfaceAddress>>;
}

/// Fires an opaque wake event whenever the process has likely been
/// suspended (wall clock jumped ahead of the monotonic clock by more than a
/// fudge factor). Probes and Queries restart and Responders reprobe from a
/// clean cache on receipt.
pub trait SleepWakeSource: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<()>;
}

/// Binds a UDP socket with the multicast options the interface layer needs
/// (`SO_REUSEADDR`, loopback, TTL/hop-limit, outgoing interface). The
/// options that `tokio::net::UdpSocket` does not expose directly (notably
/// `SO_REUSEADDR` before bind) are set with `socket2` in `mdns-platform`.
pub trait SocketFactory: Send + Sync {
    fn bind_multicast_v4(
        &self,
        bind_addr: SocketAddrV4,
        outgoing_interface: Option<Ipv4Addr>,
    ) -> std::io::Result<UdpSocket>;

    fn join_multicast_v4(
        &self,
        socket: &UdpSocket,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> std::io::Result<()>;
}
