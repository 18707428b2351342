use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mdns_proto::packet::MDNS_PORT;
use mdns_proto::Packet;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

use crate::cache::ExpiringCache;
use crate::error::CoreError;
use crate::platform::{AddressFamily, PlatformInterfaces, SleepWakeSource, SocketFactory};

pub const MULTICAST_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

#[derive(Debug, Clone)]
pub enum InterfaceEvent {
    Answer(Packet),
    Probe(Packet),
    Query(Packet),
    Error(String),
    /// The process was likely suspended and resumed (spec §5): Probes and
    /// Queries restart, Responders reprobe from a clean cache.
    Wake,
}

/// Owns the multicast-bound UDP sockets for one OS network interface (or the
/// catch-all "any"), the cache, and the send-suppression history.
///
/// Interfaces are process-wide singletons keyed by a normalized name — see
/// [`InterfaceRegistry`] — and reference-counted by their users via
/// [`NetworkInterface::bind`]/[`NetworkInterface::stop_using`].
pub struct NetworkInterface {
    key: String,
    sockets: Mutex<Vec<Arc<UdpSocket>>>,
    cache: ExpiringCache,
    history: ExpiringCache,
    events: broadcast::Sender<InterfaceEvent>,
    ref_count: AtomicUsize,
    bind_mutex: Mutex<()>,
    socket_factory: Arc<dyn SocketFactory>,
    platform: Arc<dyn PlatformInterfaces>,
    sleep_wake: Arc<dyn SleepWakeSource>,
}

impl NetworkInterface {
    fn new(
        key: String,
        socket_factory: Arc<dyn SocketFactory>,
        platform: Arc<dyn PlatformInterfaces>,
        sleep_wake: Arc<dyn SleepWakeSource>,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        let (cache, _cache_rx) = ExpiringCache::new();
        let (history, _history_rx) = ExpiringCache::new();
        Arc::new(Self {
            key,
            sockets: Mutex::new(Vec::new()),
            cache,
            history,
            events,
            ref_count: AtomicUsize::new(0),
            bind_mutex: Mutex::new(()),
            socket_factory,
            platform,
            sleep_wake,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cache(&self) -> &ExpiringCache {
        &self.cache
    }

    /// All addresses belonging to this interface (every address on every
    /// interface, for the catch-all "any" key). Used to tell a local origin
    /// apart from a genuine peer.
    pub fn local_addresses(&self) -> Vec<IpAddr> {
        let interfaces = self.platform.interfaces();
        if self.key == "any" {
            interfaces.values().flatten().map(|a| a.address).collect()
        } else {
            interfaces
                .get(&self.key)
                .map(|addrs| addrs.iter().map(|a| a.address).collect())
                .unwrap_or_default()
        }
    }

    pub fn events(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.events.subscribe()
    }

    pub fn is_bound(&self) -> bool {
        self.ref_count.load(Ordering::SeqCst) > 0
    }

    /// Brings the interface up on first use and increments the reference
    /// count on every call; the first successful bind opens the listening
    /// socket and joins every local IPv4 address to 224.0.0.251.
    pub async fn bind(self: &Arc<Self>) -> Result<(), CoreError> {
        let _guard = self.bind_mutex.lock().await;

        if self.is_bound() {
            self.ref_count.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let multicast_if = self.resolve_outgoing_interface();
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
        let socket = self
            .socket_factory
            .bind_multicast_v4(bind_addr, multicast_if)
            .map_err(CoreError::Bind)?;

        for (_name, addrs) in self.platform.interfaces() {
            for addr in addrs {
                if let (AddressFamily::V4, IpAddr::V4(v4)) = (addr.family, addr.address) {
                    if let Err(err) = self.socket_factory.join_multicast_v4(&socket, MULTICAST_GROUP_V4, v4) {
                        tracing::warn!(interface = %self.key, address = %v4, "failed to join multicast group: {err}");
                    }
                }
            }
        }

        self.sockets.lock().await.push(Arc::new(socket));
        self.ref_count.store(1, Ordering::SeqCst);
        self.spawn_receive_loop();
        self.spawn_wake_forwarder();

        Ok(())
    }

    fn spawn_wake_forwarder(self: &Arc<Self>) {
        let interface = self.clone();
        let mut wakes = self.sleep_wake.subscribe();
        tokio::spawn(async move {
            while wakes.recv().await.is_some() {
                let _ = interface.events.send(InterfaceEvent::Wake);
            }
        });
    }

    /// Resolves the IPv4 address tied to this interface's key, if any, to
    /// set as the outgoing multicast interface.
    fn resolve_outgoing_interface(&self) -> Option<Ipv4Addr> {
        if self.key == "any" {
            return None;
        }
        self.platform.interfaces().get(&self.key).and_then(|addrs| {
            addrs.iter().find_map(|a| match (a.family, a.address) {
                (AddressFamily::V4, IpAddr::V4(v4)) => Some(v4),
                _ => None,
            })
        })
    }

    fn spawn_receive_loop(self: &Arc<Self>) {
        let interface = self.clone();
        tokio::spawn(async move {
            let sockets = interface.sockets.lock().await.clone();
            for socket in sockets {
                let interface = interface.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 9000];
                    loop {
                        let (len, origin) = match socket.recv_from(&mut buf).await {
                            Ok(v) => v,
                            Err(err) => {
                                let _ = interface.events.send(InterfaceEvent::Error(err.to_string()));
                                break;
                            }
                        };
                        interface.on_datagram(&buf[..len], origin).await;
                    }
                });
            }
        });
    }

    async fn on_datagram(&self, bytes: &[u8], origin: SocketAddr) {
        let packet = match Packet::parse(bytes) {
            Ok(p) => p.with_origin(origin),
            Err(_) => return,
        };
        if !packet.is_valid() {
            return;
        }

        if packet.is_answer() && origin.port() == MDNS_PORT {
            self.merge_into_cache(&packet).await;
            let _ = self.events.send(InterfaceEvent::Answer(packet));
        } else if packet.is_probe() && origin.port() == MDNS_PORT {
            let _ = self.events.send(InterfaceEvent::Probe(packet));
        } else if packet.is_query() {
            let _ = self.events.send(InterfaceEvent::Query(packet));
        }
    }

    async fn merge_into_cache(&self, packet: &Packet) {
        for record in packet.answers.iter().chain(packet.additional.iter()) {
            if record.is_unique() {
                self.cache.flush_related(record).await;
            }
            self.cache.add(record.clone()).await;
        }
    }

    pub async fn has_recently_sent(&self, record: &mdns_proto::Record, window: Duration) -> bool {
        self.history.has_added_within(record, window).await
    }

    /// `send(packet, destination)`: destination `None` means "multicast to
    /// the group". No-op if unbound, the packet is empty, or the
    /// destination is present and not link-local.
    pub async fn send(&self, packet: &Packet, destination: Option<SocketAddr>) -> Result<(), CoreError> {
        if !self.is_bound() {
            return Ok(());
        }
        if packet.answers.is_empty() && packet.questions.is_empty() && packet.authorities.is_empty() {
            return Ok(());
        }
        if let Some(dest) = destination {
            if !is_link_local(dest.ip()) {
                return Ok(());
            }
        }

        if packet.is_answer() && destination.is_none() {
            for record in packet.answers.iter().chain(packet.additional.iter()) {
                self.history.add(record.clone()).await;
            }
        }

        let target = destination.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(MULTICAST_GROUP_V4), MDNS_PORT));
        let bytes = packet
            .encode()
            .map_err(|e| CoreError::Send(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

        let sockets = self.sockets.lock().await.clone();
        for socket in sockets {
            let socket_is_v6 = matches!(socket.local_addr(), Ok(SocketAddr::V6(_)));
            if matches!(target, SocketAddr::V6(_)) != socket_is_v6 {
                continue;
            }
            match socket.send_to(&bytes, target).await {
                Ok(_) => {}
                Err(err) if err.raw_os_error() == Some(libc_emsgsize()) => {
                    let (first, second) = packet.split();
                    Box::pin(self.send(&first, destination)).await?;
                    Box::pin(self.send(&second, destination)).await?;
                }
                Err(err) => {
                    let _ = self.events.send(InterfaceEvent::Error(err.to_string()));
                    return Err(CoreError::Send(err));
                }
            }
        }

        Ok(())
    }

    /// Decrements the reference count; at zero, every socket is dropped and
    /// the cache/history are cleared.
    pub async fn stop_using(self: &Arc<Self>) {
        let _guard = self.bind_mutex.lock().await;
        if self.ref_count.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        self.sockets.lock().await.clear();
        self.cache.clear().await;
        self.history.clear().await;
    }
}

#[cfg(unix)]
fn libc_emsgsize() -> i32 {
    90 // EMSGSIZE on Linux; see errno(3)
}

#[cfg(not(unix))]
fn libc_emsgsize() -> i32 {
    10040 // WSAEMSGSIZE on Windows
}

/// Private IPv4 ranges (10/8, 172.16/12, 192.168/16) and their IPv6
/// equivalents (loopback, fc00::/7, fe80::/10) — the destinations the
/// interface is willing to unicast a response to.
pub fn is_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00 || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Process-wide registry of interfaces keyed by normalized name, so callers
/// requesting the same key share one instance (RFC invariant: identical
/// specifiers yield identical handles).
pub struct InterfaceRegistry {
    interfaces: Mutex<HashMap<String, Arc<NetworkInterface>>>,
    socket_factory: Arc<dyn SocketFactory>,
    platform: Arc<dyn PlatformInterfaces>,
    sleep_wake: Arc<dyn SleepWakeSource>,
}

impl InterfaceRegistry {
    pub fn new(
        socket_factory: Arc<dyn SocketFactory>,
        platform: Arc<dyn PlatformInterfaces>,
        sleep_wake: Arc<dyn SleepWakeSource>,
    ) -> Self {
        Self {
            interfaces: Mutex::new(HashMap::new()),
            socket_factory,
            platform,
            sleep_wake,
        }
    }

    /// Accepted specifiers: empty string -> "any"; an IPv4 literal ->
    /// resolved to its OS interface name; an interface name -> used as-is
    /// (error if absent from the platform map).
    pub async fn resolve(&self, specifier: &str) -> Result<Arc<NetworkInterface>, CoreError> {
        let key = self.normalize(specifier)?;
        let mut guard = self.interfaces.lock().await;
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }
        let created = NetworkInterface::new(key.clone(), self.socket_factory.clone(), self.platform.clone(), self.sleep_wake.clone());
        guard.insert(key, created.clone());
        Ok(created)
    }

    fn normalize(&self, specifier: &str) -> Result<String, CoreError> {
        if specifier.is_empty() {
            return Ok("any".to_string());
        }
        if let Ok(literal) = specifier.parse::<Ipv4Addr>() {
            let interfaces = self.platform.interfaces();
            return interfaces
                .iter()
                .find(|(_, addrs)| {
                    addrs
                        .iter()
                        .any(|a| matches!(a.address, IpAddr::V4(v4) if v4 == literal))
                })
                .map(|(name, _)| name.clone())
                .ok_or_else(|| CoreError::UnknownInterface(specifier.to_string()));
        }
        let interfaces = self.platform.interfaces();
        if interfaces.contains_key(specifier) {
            Ok(specifier.to_string())
        } else {
            Err(CoreError::UnknownInterface(specifier.to_string()))
        }
    }
}

/// Fakes for constructing an unbound `NetworkInterface` in other modules'
/// unit tests, where only the event broadcast matters and no real socket or
/// host interface enumeration is needed.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    struct NoInterfaces;
    impl PlatformInterfaces for NoInterfaces {
        fn interfaces(&self) -> HashMap<String, Vec<InterfaceAddress>> {
            HashMap::new()
        }
    }

    struct NoWakes;
    impl SleepWakeSource for NoWakes {
        fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<()> {
            tokio::sync::mpsc::unbounded_channel().1
        }
    }

    struct NoSockets;
    impl SocketFactory for NoSockets {
        fn bind_multicast_v4(&self, _bind_addr: SocketAddrV4, _outgoing_interface: Option<Ipv4Addr>) -> std::io::Result<UdpSocket> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "test_support interface is never bound"))
        }
        fn join_multicast_v4(&self, _socket: &UdpSocket, _group: Ipv4Addr, _interface: Ipv4Addr) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn unbound(key: &str) -> Arc<NetworkInterface> {
        NetworkInterface::new(key.to_string(), Arc::new(NoSockets), Arc::new(NoInterfaces), Arc::new(NoWakes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local_recognizes_private_ranges() {
        assert!(is_link_local("10.1.2.3".parse().unwrap()));
        assert!(is_link_local("172.16.0.1".parse().unwrap()));
        assert!(is_link_local("192.168.1.1".parse().unwrap()));
        assert!(!is_link_local("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn link_local_recognizes_ipv6_ranges() {
        assert!(is_link_local("::1".parse().unwrap()));
        assert!(is_link_local("fe80::1".parse().unwrap()));
        assert!(is_link_local("fc00::1".parse().unwrap()));
        assert!(!is_link_local("2001:4860:4860::8888".parse().unwrap()));
    }
}
