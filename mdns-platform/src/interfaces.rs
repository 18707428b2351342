use std::collections::HashMap;
use std::net::IpAddr;

use mdns_core::{AddressFamily, InterfaceAddress, PlatformInterfaces};

/// Enumerates the host's network interfaces via `if-addrs`, the one platform
/// capability `mdns-core` needs to resolve interface specifiers and to bind
/// multicast membership on every local address.
#[derive(Debug, Default)]
pub struct HostInterfaces;

impl HostInterfaces {
    pub fn new() -> Self {
        Self
    }
}

impl PlatformInterfaces for HostInterfaces {
    fn interfaces(&self) -> HashMap<String, Vec<InterfaceAddress>> {
        let found = match if_addrs::get_if_addrs() {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "failed to enumerate network interfaces");
                return HashMap::new();
            }
        };

        let mut map: HashMap<String, Vec<InterfaceAddress>> = HashMap::new();
        for iface in found {
            let address = iface.addr.ip();
            let family = match address {
                IpAddr::V4(_) => AddressFamily::V4,
                IpAddr::V6(_) => AddressFamily::V6,
            };
            let internal = iface.addr.is_loopback();
            map.entry(iface.name).or_default().push(InterfaceAddress {
                address,
                family,
                internal,
            });
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_at_least_the_loopback_interface() {
        let interfaces = HostInterfaces::new().interfaces();
        let has_loopback = interfaces.values().flatten().any(|addr| addr.address.is_loopback());
        assert!(has_loopback, "expected at least a loopback address among {interfaces:?}");
    }
}
