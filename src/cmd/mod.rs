pub mod advertise;
pub mod browse;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multicast DNS and DNS-Based Service Discovery (RFC 6762/6763) command line
/// tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/mdnsd/mdnsd.toml", env = "CONFIG_PATH")]
    config_path: PathBuf,
    #[command(subcommand)]
    inner: Commands,
}

impl Args {
    pub async fn run(self) {
        let config = crate::config::Config::load(&self.config_path);
        match self.inner {
            Commands::Advertise(inner) => inner.run(config).await,
            Commands::Browse(inner) => inner.run(config).await,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Advertise(advertise::Command),
    Browse(browse::Command),
}
