use std::net::Ipv4Addr;

use clap::Args;
use mdns_core::{RecordCollection, Responder, ResponderEvent};
use mdns_proto::{Record, RecordData, TxtEntry, TxtValue};

const DEFAULT_TTL: u32 = 4500;

/// Advertises a service instance on the link until interrupted.
#[derive(Args, Debug)]
pub struct Command {
    /// Instance name, e.g. "Office Printer"
    #[arg(long)]
    name: String,
    /// Service type, e.g. "_http._tcp"
    #[arg(long)]
    service: String,
    /// Domain the service is published under
    #[arg(long, default_value = "local")]
    domain: String,
    /// Hostname the SRV record points at (without the domain suffix)
    #[arg(long)]
    host: String,
    /// IPv4 address to publish for the host
    #[arg(long)]
    address: Ipv4Addr,
    /// TCP/UDP port of the service
    #[arg(long)]
    port: u16,
    /// Repeatable `key=value` TXT entry
    #[arg(long = "txt")]
    txt: Vec<String>,
}

impl Command {
    pub async fn run(self, config: crate::config::Config) {
        let interface = crate::setup::bind_interface(&config.interface).await;

        let service_fqdn = format!("{}.{}.", self.service, self.domain);
        let instance_fqdn = format!("{}.{}.", self.name, service_fqdn);
        let host_fqdn = format!("{}.{}.", self.host, self.domain);

        let ptr = Record::new(service_fqdn, DEFAULT_TTL, RecordData::Ptr(instance_fqdn.clone()));
        let srv = Record::new(
            instance_fqdn.clone(),
            DEFAULT_TTL,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: self.port,
                target: host_fqdn.clone(),
            },
        );
        let txt = Record::new(instance_fqdn, DEFAULT_TTL, RecordData::Txt(parse_txt_entries(&self.txt)));
        let a = Record::new(host_fqdn, DEFAULT_TTL, RecordData::A(self.address));

        let records = vec![ptr, srv, txt, a];
        let handle = Responder::spawn(interface, self.name.clone(), records, RecordCollection::new());
        tracing::info!(name = %self.name, service = %self.service, "advertising service");

        let mut events = handle.events;
        while let Some(event) = events.recv().await {
            match event {
                ResponderEvent::ProbingComplete => tracing::info!("probing complete, announcing"),
                ResponderEvent::Rename(new_name) => tracing::warn!(%new_name, "name conflict, renamed"),
                ResponderEvent::Error(err) => tracing::error!(%err, "responder error"),
            }
        }
    }
}

fn parse_txt_entries(pairs: &[String]) -> Vec<TxtEntry> {
    if pairs.is_empty() {
        return vec![TxtEntry {
            key: String::new(),
            value: TxtValue::Empty,
        }];
    }
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => TxtEntry {
                key: key.to_string(),
                value: TxtValue::Text(value.to_string()),
            },
            None => TxtEntry {
                key: pair.clone(),
                value: TxtValue::Flag,
            },
        })
        .collect()
}
