use std::sync::Arc;

use mdns_core::{InterfaceRegistry, NetworkInterface};
use mdns_platform::{HostInterfaces, StdSocketFactory, WallClockSleepWakeSource};

use crate::config::InterfaceConfig;

/// Builds the platform-backed interface registry and resolves the interface
/// named in the configuration, binding it for the caller's use.
pub async fn bind_interface(config: &InterfaceConfig) -> Arc<NetworkInterface> {
    let registry = InterfaceRegistry::new(
        Arc::new(StdSocketFactory::new()),
        Arc::new(HostInterfaces::new()),
        Arc::new(WallClockSleepWakeSource::new()),
    );
    let interface = registry
        .resolve(&config.name)
        .await
        .expect("unable to resolve the configured network interface");
    interface.bind().await.expect("unable to bind the network interface");
    interface
}
