use std::collections::HashSet;

use clap::Args;
use mdns_core::{Query, QueryEvent, ResolverEvent, ServiceResolver};
use mdns_proto::packet::Question;
use mdns_proto::RecordType;

/// Browses for instances of a service type and resolves each one found.
#[derive(Args, Debug)]
pub struct Command {
    /// Service type to browse, e.g. "_http._tcp"
    #[arg(long)]
    service: String,
    /// Domain the service is published under
    #[arg(long, default_value = "local")]
    domain: String,
}

impl Command {
    pub async fn run(self, config: crate::config::Config) {
        let interface = crate::setup::bind_interface(&config.interface).await;

        let service_fqdn = format!("{}.{}.", self.service, self.domain);
        tracing::info!(service = %service_fqdn, "browsing for instances");

        let question = Question::new(&service_fqdn, RecordType::Ptr);
        let handle = Query::spawn(interface.clone(), vec![question], true, false, None);

        let mut seen = HashSet::new();
        let mut events = handle.events;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::signal::ctrl_c() => break,
            };
            let Some(event) = event else { break };

            match event {
                QueryEvent::Answer { record, .. } if record.record_type() == RecordType::Ptr => {
                    if let mdns_proto::RecordData::Ptr(fullname) = &record.data {
                        if seen.insert(fullname.clone()) {
                            spawn_resolver(interface.clone(), fullname.clone());
                        }
                    }
                }
                QueryEvent::Answer { .. } => {}
                QueryEvent::Timeout => tracing::debug!("browse query timed out"),
            }
        }

        interface.stop_using().await;
    }
}

fn spawn_resolver(interface: std::sync::Arc<mdns_core::NetworkInterface>, fullname: String) {
    tokio::spawn(async move {
        let handle = ServiceResolver::spawn(interface, fullname.clone());
        let mut events = handle.events;

        while let Some(event) = events.recv().await {
            match event {
                ResolverEvent::Resolved | ResolverEvent::Updated => {
                    tracing::info!(instance = %fullname, "service resolved, continuing");
                }
                ResolverEvent::Down => {
                    tracing::info!(instance = %fullname, "service went down");
                    break;
                }
            }
        }
    });
}
