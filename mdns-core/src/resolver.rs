use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_proto::packet::Question;
use mdns_proto::{Record, RecordData, RecordType, TxtEntry, TxtValue};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::cache::CacheEvent;
use crate::cancellation::{OffSwitch, StopSignal};
use crate::interface::NetworkInterface;
use crate::query::{Query, QueryEvent};

const UNRESOLVED_TIMEOUT: Duration = Duration::from_secs(10);
const REISSUE_BATCH_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unresolved,
    Resolved,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum ResolverEvent {
    Resolved,
    Updated,
    Down,
}

/// A resolved or resolving service instance. Collections are defensive
/// copies of the resolver's internal state.
#[derive(Debug, Clone)]
pub struct Service {
    pub fullname: String,
    pub name: String,
    pub type_name: String,
    pub protocol: String,
    pub domain: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub addresses: Vec<IpAddr>,
    pub txt: Vec<TxtEntry>,
    pub txt_raw: Vec<u8>,
}

impl Service {
    fn new(fullname: &str) -> Self {
        let (name, type_name, protocol, domain) = split_fullname(fullname);
        Self {
            fullname: fullname.to_string(),
            name,
            type_name,
            protocol,
            domain,
            host: None,
            port: None,
            addresses: Vec::new(),
            txt: Vec::new(),
            txt_raw: Vec::new(),
        }
    }

    fn is_resolved(&self) -> bool {
        self.host.is_some() && self.port.is_some() && !self.txt_raw.is_empty() && !self.addresses.is_empty()
    }
}

/// Aggregates SRV + TXT + A/AAAA into a [`Service`] and keeps it fresh as the
/// interface cache reissues or expires the underlying records (spec §4.9).
pub struct ServiceResolver {
    interface: Arc<NetworkInterface>,
    service: Mutex<Service>,
    state: Mutex<State>,
    off_switch: OffSwitch,
    events_tx: mpsc::UnboundedSender<ResolverEvent>,
    active_query: Mutex<Option<OffSwitch>>,
}

pub struct ResolverHandle {
    pub off_switch: OffSwitch,
    pub events: mpsc::UnboundedReceiver<ResolverEvent>,
}

impl ServiceResolver {
    pub fn spawn(interface: Arc<NetworkInterface>, fullname: String) -> ResolverHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let off_switch = OffSwitch::new();

        let resolver = Arc::new(Self {
            interface,
            service: Mutex::new(Service::new(&fullname)),
            state: Mutex::new(State::Unresolved),
            off_switch: off_switch.clone(),
            events_tx,
            active_query: Mutex::new(None),
        });

        tokio::spawn(resolver.clone().run());
        ResolverHandle { off_switch, events }
    }

    pub fn stop(&self) {
        self.off_switch.stop();
    }

    pub async fn service(&self) -> Service {
        self.service.lock().await.clone()
    }

    async fn run(self: Arc<Self>) {
        let mut stop: StopSignal = self.off_switch.listener();
        let cache_events = self.interface.cache().subscribe();

        let timeout_deadline = tokio::time::sleep(UNRESOLVED_TIMEOUT);
        tokio::pin!(timeout_deadline);

        self.check_cache().await;
        if *self.state.lock().await != State::Resolved {
            self.issue_query_for_missing().await;
        }

        tokio::spawn(self.clone().watch_reissues(cache_events));

        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    self.transition_to(State::Stopped).await;
                    return;
                }
                _ = &mut timeout_deadline, if *self.state.lock().await == State::Unresolved => {
                    self.transition_to(State::Stopped).await;
                    let _ = self.events_tx.send(ResolverEvent::Down);
                    return;
                }
            }
        }
    }

    async fn check_cache(&self) {
        let fullname = self.service.lock().await.fullname.clone();
        let srv = self.interface.cache().find(&fullname, RecordType::Srv, 1).await;
        let txt = self.interface.cache().find(&fullname, RecordType::Txt, 1).await;
        for record in srv.into_iter().chain(txt) {
            self.apply_record(&record).await;
        }
    }

    async fn issue_query_for_missing(self: &Arc<Self>) {
        let questions = self.missing_questions().await;
        if questions.is_empty() {
            return;
        }

        if let Some(existing) = self.active_query.lock().await.take() {
            existing.stop();
        }

        let handle = Query::spawn(self.interface.clone(), questions, true, false, None);
        *self.active_query.lock().await = Some(handle.off_switch);

        let resolver = self.clone();
        let mut events = handle.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let QueryEvent::Answer { record, .. } = event {
                    resolver.apply_record(&record).await;
                }
            }
        });
    }

    async fn missing_questions(&self) -> Vec<Question> {
        let service = self.service.lock().await;
        let mut questions = Vec::new();
        if service.port.is_none() {
            questions.push(Question::new(&service.fullname, RecordType::Srv));
        }
        if service.txt_raw.is_empty() {
            questions.push(Question::new(&service.fullname, RecordType::Txt));
        }
        if let Some(host) = &service.host {
            if service.addresses.is_empty() {
                questions.push(Question::new(host, RecordType::A));
                questions.push(Question::new(host, RecordType::Aaaa));
            }
        }
        questions
    }

    /// Batches cache `reissue` events relevant to this service into a single
    /// non-continuous, cache-bypassing query per one-second window.
    async fn watch_reissues(self: Arc<Self>, mut cache_events: broadcast::Receiver<CacheEvent>) {
        loop {
            let first = match cache_events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };

            let mut batch = vec![first];
            let window = tokio::time::sleep(REISSUE_BATCH_WINDOW);
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    event = cache_events.recv() => {
                        match event {
                            Ok(e) => batch.push(e),
                            Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                }
            }

            if self.handle_batch(batch).await {
                return;
            }
        }
    }

    /// Returns true once the resolver has terminated (goes `stopped`).
    async fn handle_batch(self: &Arc<Self>, batch: Vec<CacheEvent>) -> bool {
        let fullname = self.service.lock().await.fullname.clone();
        let mut relevant_reissue = Vec::new();

        for event in batch {
            match event {
                CacheEvent::Reissue(record) => {
                    if self.record_is_relevant(&record, &fullname).await {
                        relevant_reissue.push(record);
                    }
                }
                CacheEvent::Expired(record) => {
                    if self.handle_expired(&record, &fullname).await {
                        return true;
                    }
                }
            }
        }

        if !relevant_reissue.is_empty() {
            let questions: Vec<Question> = relevant_reissue
                .iter()
                .map(|r| Question::new(&r.name, r.record_type()))
                .collect();
            let handle = Query::spawn(self.interface.clone(), questions, false, true, None);
            let resolver = self.clone();
            let mut events = handle.events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let QueryEvent::Answer { record, .. } = event {
                        resolver.apply_record(&record).await;
                    }
                }
            });
        }
        false
    }

    async fn record_is_relevant(&self, record: &Record, fullname: &str) -> bool {
        let service = self.service.lock().await;
        record.name.eq_ignore_ascii_case(fullname) || service.host.as_deref().is_some_and(|h| record.name.eq_ignore_ascii_case(h))
    }

    /// SRV or PTR expiry ends the service; A/AAAA expiry drops one address;
    /// TXT expiry clears txt and reopens the resolver.
    async fn handle_expired(self: &Arc<Self>, record: &Record, fullname: &str) -> bool {
        let mut service = self.service.lock().await;
        if !record.name.eq_ignore_ascii_case(fullname) && service.host.as_deref() != Some(record.name.as_str()) {
            return false;
        }

        match record.record_type() {
            RecordType::Srv | RecordType::Ptr if record.name.eq_ignore_ascii_case(fullname) => {
                drop(service);
                self.transition_to(State::Stopped).await;
                let _ = self.events_tx.send(ResolverEvent::Down);
                return true;
            }
            RecordType::A | RecordType::Aaaa => {
                if let RecordData::A(addr) = &record.data {
                    service.addresses.retain(|a| a != &IpAddr::V4(*addr));
                }
                if let RecordData::Aaaa(addr) = &record.data {
                    service.addresses.retain(|a| a != &IpAddr::V6(*addr));
                }
                if service.addresses.is_empty() {
                    drop(service);
                    self.transition_to(State::Unresolved).await;
                    self.issue_query_for_missing().await;
                }
            }
            RecordType::Txt => {
                service.txt.clear();
                service.txt_raw.clear();
                drop(service);
                self.transition_to(State::Unresolved).await;
                self.issue_query_for_missing().await;
            }
            _ => {}
        }
        false
    }

    async fn apply_record(self: &Arc<Self>, record: &Record) {
        if record.ttl == 0 {
            return;
        }
        let mut service = self.service.lock().await;
        if !record.name.eq_ignore_ascii_case(&service.fullname) && service.host.as_deref() != Some(record.name.as_str()) {
            return;
        }

        match &record.data {
            RecordData::Srv { port, target, .. } => {
                if service.host.as_deref() != Some(target.as_str()) {
                    service.host = Some(target.clone());
                    service.addresses.clear();
                }
                service.port = Some(*port);
            }
            RecordData::Txt(entries) => {
                let raw = txt_raw_bytes(entries);
                if raw != service.txt_raw {
                    service.txt = entries.clone();
                    service.txt_raw = raw;
                }
            }
            RecordData::A(addr) => {
                let ip = IpAddr::V4(*addr);
                if !service.addresses.contains(&ip) {
                    service.addresses.push(ip);
                }
            }
            RecordData::Aaaa(addr) => {
                let ip = IpAddr::V6(*addr);
                if !service.addresses.contains(&ip) {
                    service.addresses.push(ip);
                }
            }
            _ => return,
        }

        let now_resolved = service.is_resolved();
        let fullname = service.fullname.clone();
        drop(service);

        let was_resolved = *self.state.lock().await == State::Resolved;
        if now_resolved && !was_resolved {
            tracing::debug!(%fullname, "service resolved");
            self.transition_to(State::Resolved).await;
            let _ = self.events_tx.send(ResolverEvent::Resolved);
        } else if now_resolved {
            let _ = self.events_tx.send(ResolverEvent::Updated);
        } else {
            self.issue_query_for_missing().await;
        }
    }

    async fn transition_to(&self, state: State) {
        *self.state.lock().await = state;
    }
}

fn split_fullname(fullname: &str) -> (String, String, String, String) {
    let trimmed = fullname.trim_end_matches('.');
    let parts: Vec<&str> = trimmed.split('.').collect();
    let proto_idx = parts.iter().position(|p| *p == "_tcp" || *p == "_udp");
    match proto_idx {
        Some(idx) if idx >= 1 => {
            let name = parts[..idx - 1].join(".");
            let type_name = parts[idx - 1].to_string();
            let protocol = parts[idx].to_string();
            let domain = parts[idx + 1..].join(".");
            (name, type_name, protocol, domain)
        }
        _ => (trimmed.to_string(), String::new(), String::new(), String::new()),
    }
}

fn txt_raw_bytes(entries: &[TxtEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let bytes = match &entry.value {
            TxtValue::Empty => Vec::new(),
            TxtValue::Flag => entry.key.clone().into_bytes(),
            TxtValue::Text(v) => format!("{}={}", entry.key, v).into_bytes(),
            TxtValue::Bytes(v) => {
                let mut b = entry.key.clone().into_bytes();
                b.push(b'=');
                b.extend_from_slice(v);
                b
            }
        };
        out.push(bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_fullname_extracts_components() {
        let (name, type_name, protocol, domain) = split_fullname("Printer._ipp._tcp.local.");
        assert_eq!(name, "Printer");
        assert_eq!(type_name, "_ipp");
        assert_eq!(protocol, "_tcp");
        assert_eq!(domain, "local");
    }

    #[test]
    fn txt_raw_bytes_is_length_prefixed() {
        let entries = vec![TxtEntry {
            key: "path".into(),
            value: TxtValue::Text("/".into()),
        }];
        let raw = txt_raw_bytes(&entries);
        assert_eq!(raw[0] as usize, raw.len() - 1);
    }
}
