pub mod cache;
pub mod cancellation;
pub mod collection;
pub mod error;
pub mod interface;
pub mod platform;
pub mod probe;
pub mod query;
pub mod responder;
pub mod resolver;
pub mod response;

pub use cache::{CacheEvent, ExpiringCache};
pub use cancellation::{OffSwitch, StopSignal};
pub use collection::RecordCollection;
pub use error::CoreError;
pub use interface::{InterfaceEvent, InterfaceRegistry, NetworkInterface};
pub use platform::{AddressFamily, InterfaceAddress, PlatformInterfaces, SleepWakeSource, SocketFactory};
pub use probe::{Probe, ProbeEvent};
pub use query::{Query, QueryEvent, QueryHandle};
pub use responder::{Responder, ResponderEvent, ResponderHandle};
pub use resolver::{ResolverEvent, ResolverHandle, Service, ServiceResolver};
pub use response::{MulticastResponse, UnicastResponse};
