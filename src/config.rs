use std::path::Path;

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub interface: InterfaceConfig,
}

/// Which network interface to bind for mDNS traffic.
#[derive(Debug, serde::Deserialize)]
pub struct InterfaceConfig {
    /// Empty string, an interface name, or an IPv4 literal — see
    /// `mdns_core::InterfaceRegistry::resolve`.
    #[serde(default)]
    pub name: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self { name: String::new() }
    }
}

impl Config {
    pub fn load(path: &Path) -> Self {
        let conf = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(::config::Environment::default().separator("_"))
            .build()
            .expect("unable to build configuration");
        conf.try_deserialize().expect("configuration format invalid")
    }
}
