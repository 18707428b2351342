//! Concrete host bindings for `mdns-core`'s two narrow platform traits:
//! interface enumeration ([`HostInterfaces`]) and suspend/resume detection
//! ([`WallClockSleepWakeSource`]), plus a [`StdSocketFactory`] that opens the
//! multicast sockets `tokio::net::UdpSocket` cannot configure before bind.

mod interfaces;
mod sleep_wake;
mod socket;

pub use interfaces::HostInterfaces;
pub use sleep_wake::WallClockSleepWakeSource;
pub use socket::StdSocketFactory;
