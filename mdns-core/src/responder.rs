use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdns_proto::{Packet, Record, RecordData, RecordType};
use tokio::sync::{mpsc, Mutex};

use crate::cancellation::{OffSwitch, StopSignal};
use crate::collection::RecordCollection;
use crate::error::CoreError;
use crate::interface::{InterfaceEvent, NetworkInterface};
use crate::probe::{Probe, ProbeEvent};
use crate::response::{MulticastResponse, UnicastResponse};

const CONFLICT_BUDGET: u32 = 15;
const CONFLICT_WINDOW: Duration = Duration::from_secs(10);
const CONFLICT_QUIESCENCE: Duration = Duration::from_secs(15);
const CONFLICT_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive times the conflict budget may trip (i.e. 15 conflicts/10s
/// without 15s of quiet in between) before the rename budget is considered
/// exhausted and the responder gives up for good.
const MAX_BACKOFF_STRIKES: u32 = 3;
const ANNOUNCE_REPEAT: u32 = 1;
const KNOWN_ANSWER_FRACTION: f64 = 0.5;

#[derive(Debug, Clone)]
pub enum ResponderEvent {
    ProbingComplete,
    Rename(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Probing,
    Responding,
    Stopped,
}

/// Announces a set of records on an interface, probing first, renaming on
/// conflict, and answering live queries while responding (RFC 6762 §8/§6).
pub struct Responder {
    interface: Arc<NetworkInterface>,
    name: Mutex<String>,
    records: Mutex<RecordCollection>,
    bridgeable: RecordCollection,
    state: Mutex<State>,
    off_switch: OffSwitch,
    events_tx: mpsc::UnboundedSender<ResponderEvent>,
    conflicts: Mutex<Vec<Instant>>,
    rename_counter: AtomicU32,
    backoff_strikes: AtomicU32,
}

pub struct ResponderHandle {
    pub off_switch: OffSwitch,
    pub events: mpsc::UnboundedReceiver<ResponderEvent>,
}

impl Responder {
    pub fn spawn(
        interface: Arc<NetworkInterface>,
        name: String,
        records: Vec<Record>,
        bridgeable: RecordCollection,
    ) -> ResponderHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let off_switch = OffSwitch::new();

        let responder = Arc::new(Self {
            interface,
            name: Mutex::new(name),
            records: Mutex::new(records.into_iter().collect()),
            bridgeable,
            state: Mutex::new(State::Probing),
            off_switch: off_switch.clone(),
            events_tx,
            conflicts: Mutex::new(Vec::new()),
            rename_counter: AtomicU32::new(1),
            backoff_strikes: AtomicU32::new(0),
        });

        tokio::spawn(async move { responder.run().await });

        ResponderHandle { off_switch, events }
    }

    pub fn stop(&self) {
        self.off_switch.stop();
    }

    async fn run(self: Arc<Self>) {
        let mut stop: StopSignal = self.off_switch.listener();
        loop {
            if stop.is_stopped() {
                return;
            }
            match self.send_probe().await {
                Ok(true) => break,
                Ok(false) => continue, // renamed, probe again
                Err(()) => return,
            }
        }

        *self.state.lock().await = State::Responding;
        let _ = self.events_tx.send(ResponderEvent::ProbingComplete);
        self.announce().await;
        self.respond_loop(stop).await;
    }

    /// Drops already-owned or already-conflicting records from the probe set
    /// (spec: cache already holds an identical record -> skip; conflicting
    /// -> skip). Returns `Ok(true)` once probing (or a trivial empty probe)
    /// succeeds, `Ok(false)` if a rename happened and another round is
    /// needed, `Err(())` on fatal exhaustion.
    async fn send_probe(self: &Arc<Self>) -> Result<bool, ()> {
        if self.conflict_budget_tripped().await {
            let strikes = self.backoff_strikes.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if strikes > MAX_BACKOFF_STRIKES {
                let name = self.name.lock().await.clone();
                let err = CoreError::ProbeExhausted { name };
                tracing::error!(%err, "rename budget exhausted after repeated probe conflicts");
                *self.state.lock().await = State::Stopped;
                let _ = self.events_tx.send(ResponderEvent::Error(err.to_string()));
                return Err(());
            }
            tokio::time::sleep(CONFLICT_BACKOFF).await;
        } else {
            self.backoff_strikes.store(0, AtomicOrdering::SeqCst);
        }

        let all_records = self.records.lock().await.to_array();
        let mut to_probe = Vec::new();
        for record in &all_records {
            if !record.is_unique() {
                continue;
            }
            if self.interface.cache().has(record).await {
                continue;
            }
            if self.interface.cache().has_conflict_with(record).await {
                continue;
            }
            to_probe.push(record.clone());
        }

        if to_probe.is_empty() {
            return Ok(true);
        }

        let probe = Probe::new(self.interface.clone(), to_probe, self.bridgeable.clone());
        match probe.run().await {
            ProbeEvent::Complete { early: _ } => Ok(true),
            ProbeEvent::Conflict => {
                self.record_conflict().await;
                self.rename().await;
                Ok(false)
            }
            // A sleep/wake cycle, not a real collision: reprobe the same
            // name with no rename and no hit to the conflict budget.
            ProbeEvent::WokeUp => Ok(false),
        }
    }

    /// Keeps conflict timestamps until `CONFLICT_QUIESCENCE` of silence has
    /// passed (so a burst can be detected even if it straddles a window
    /// boundary), but only counts the ones within the trailing
    /// `CONFLICT_WINDOW` against the budget.
    async fn conflict_budget_tripped(&self) -> bool {
        let mut conflicts = self.conflicts.lock().await;
        let now = Instant::now();
        conflicts.retain(|t| now.duration_since(*t) <= CONFLICT_QUIESCENCE);
        if conflicts.is_empty() {
            return false;
        }
        let recent = conflicts.iter().filter(|t| now.duration_since(**t) <= CONFLICT_WINDOW).count();
        recent as u32 >= CONFLICT_BUDGET
    }

    async fn record_conflict(&self) {
        self.conflicts.lock().await.push(Instant::now());
    }

    /// Appends " (k)" to the instance name, bumping k on repeated renames,
    /// and rewrites every SRV/PTR record's owner/target that embeds it.
    async fn rename(&self) {
        let k = self.rename_counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let mut name = self.name.lock().await;
        let base = strip_rename_suffix(&name);
        let renamed = format!("{base} ({k})");
        tracing::info!(from = %name, to = %renamed, "renaming after probe conflict");
        *name = renamed.clone();
        drop(name);

        let mut records = self.records.lock().await;
        let rewritten: Vec<Record> = records
            .to_array()
            .into_iter()
            .map(|mut r| {
                if r.name.starts_with(&base) {
                    r.name = r.name.replacen(&base, &renamed, 1);
                }
                if let RecordData::Srv { target, .. } = &mut r.data {
                    if target.starts_with(&base) {
                        *target = target.replacen(&base, &renamed, 1);
                    }
                }
                r
            })
            .collect();
        records.clear();
        records.add_each(rewritten);

        let _ = self.events_tx.send(ResponderEvent::Rename(renamed));
    }

    async fn announce(&self) {
        let answers = self.records.lock().await.to_array();
        let response = MulticastResponse::new(self.interface.clone(), answers).repeat(ANNOUNCE_REPEAT);
        response.run().await;
    }

    async fn respond_loop(self: Arc<Self>, mut stop: StopSignal) {
        let mut events = self.interface.events();
        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    self.goodbye().await;
                    *self.state.lock().await = State::Stopped;
                    return;
                }
                event = events.recv() => {
                    let Ok(event) = event else { continue };
                    match event {
                        InterfaceEvent::Answer(packet) => self.handle_answer(&packet).await,
                        InterfaceEvent::Query(packet) => self.handle_query(&packet).await,
                        InterfaceEvent::Probe(packet) => self.handle_query(&packet).await,
                        InterfaceEvent::Error(err) => {
                            let _ = self.events_tx.send(ResponderEvent::Error(err));
                        }
                        InterfaceEvent::Wake => {
                            tracing::info!(interface = %self.interface.key(), "sleep/wake detected, reprobing from a clean cache");
                            self.interface.cache().clear().await;
                            *self.state.lock().await = State::Probing;
                            loop {
                                match self.send_probe().await {
                                    Ok(true) => break,
                                    Ok(false) => continue,
                                    Err(()) => return,
                                }
                            }
                            *self.state.lock().await = State::Responding;
                            self.announce().await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_answer(self: &Arc<Self>, packet: &Packet) {
        if packet.answers.is_empty() && packet.additional.is_empty() {
            return;
        }
        let incoming: RecordCollection = packet.answers.iter().chain(packet.additional.iter()).cloned().collect();
        let ours = self.records.lock().await.to_array();

        let mut conflicted = false;
        let mut bridged_reannounce = false;
        let mut defensive_goodbye_redo = false;

        for mine in &ours {
            if !mine.is_unique() {
                continue;
            }
            for theirs in incoming.iter() {
                if theirs.namehash() != mine.namehash() {
                    continue;
                }
                if theirs.hash() == mine.hash() {
                    if theirs.ttl == 0 {
                        defensive_goodbye_redo = true;
                    } else if self.bridgeable.has(theirs) {
                        bridged_reannounce = true;
                    }
                } else if !self.bridgeable.has(theirs) {
                    conflicted = true;
                }
            }
        }

        if conflicted {
            *self.state.lock().await = State::Probing;
            self.record_conflict().await;
            let _ = self.send_probe().await;
            *self.state.lock().await = State::Responding;
            self.announce().await;
            return;
        }

        if defensive_goodbye_redo || bridged_reannounce {
            let response = MulticastResponse::new(self.interface.clone(), ours).defensive(true);
            response.run().await;
        }
    }

    /// Answers a live query or probe addressed at our names (§4.8 "probe /
    /// query handler"). Multicast answers are defensive; unicast (QU)
    /// answers skip suppression entirely. Known-answer suppression applies
    /// only when the asker's known TTL exceeds half the record's own TTL.
    async fn handle_query(self: &Arc<Self>, packet: &Packet) {
        if packet.is_local(&self.interface.local_addresses()) {
            return;
        }

        let ours = self.records.lock().await.to_array();
        let mut multicast_answers = Vec::new();
        let mut unicast_answers = Vec::new();
        let mut negative_names: Vec<(String, bool)> = Vec::new();

        for question in &packet.questions {
            let matches: Vec<&Record> = ours
                .iter()
                .filter(|r| {
                    r.name.eq_ignore_ascii_case(&question.name)
                        && (question.qtype == RecordType::Any || r.record_type() == question.qtype)
                })
                .collect();

            if matches.is_empty() {
                let have_other_type = ours.iter().any(|r| r.name.eq_ignore_ascii_case(&question.name));
                if have_other_type {
                    negative_names.push((question.name.clone(), question.qu));
                }
                continue;
            }

            for record in matches {
                if known_answer_covers(packet, record) {
                    continue;
                }
                if question.qu {
                    unicast_answers.push(record.clone());
                } else {
                    multicast_answers.push(record.clone());
                }
            }
        }

        for (name, qu) in negative_names {
            if let Some(nsec) = build_nsec(&ours, &name) {
                if qu {
                    unicast_answers.push(nsec);
                } else {
                    multicast_answers.push(nsec);
                }
            }
        }

        if packet.is_legacy() {
            if let Some(origin) = packet.origin {
                let legacy_answers: Vec<Record> = multicast_answers.iter().chain(unicast_answers.iter()).cloned().collect();
                let response = UnicastResponse::new(
                    self.interface.clone(),
                    origin,
                    legacy_answers,
                    true,
                    packet.header.id,
                    packet.questions.clone(),
                );
                response.run().await;
            }
            return;
        }

        if !unicast_answers.is_empty() {
            if let Some(origin) = packet.origin {
                let response = UnicastResponse::new(self.interface.clone(), origin, unicast_answers, false, packet.header.id, vec![]);
                response.run().await;
            }
        }

        if !multicast_answers.is_empty() {
            let response = MulticastResponse::new(self.interface.clone(), multicast_answers).defensive(true);
            response.run().await;
        }
    }

    async fn goodbye(&self) {
        let answers = self.records.lock().await.to_array();
        if answers.is_empty() {
            return;
        }
        let response = MulticastResponse::goodbye(self.interface.clone(), answers);
        response.run().await;
    }

    /// Mutates every record of `rrtype` via `f` and re-announces the change.
    pub async fn update_each(self: &Arc<Self>, rrtype: RecordType, f: impl Fn(&mut Record)) {
        let mut records = self.records.lock().await;
        let mut updated = records.to_array();
        for record in updated.iter_mut().filter(|r| r.record_type() == rrtype) {
            f(record);
        }
        records.clear();
        records.add_each(updated);
        drop(records);
        self.announce().await;
    }
}

fn strip_rename_suffix(name: &str) -> String {
    if let Some(open) = name.rfind(" (") {
        if name.ends_with(')') && name[open + 2..name.len() - 1].parse::<u32>().is_ok() {
            return name[..open].to_string();
        }
    }
    name.to_string()
}

/// True iff the question packet already carries a known answer for `record`
/// whose TTL exceeds half of `record`'s own TTL (suppress, per RFC 6762
/// §7.1).
fn known_answer_covers(packet: &Packet, record: &Record) -> bool {
    packet.answers.iter().any(|known| {
        known.hash() == record.hash() && (known.ttl as f64) > (record.ttl as f64) * KNOWN_ANSWER_FRACTION
    })
}

fn build_nsec(ours: &[Record], name: &str) -> Option<Record> {
    let types: Vec<RecordType> = ours
        .iter()
        .filter(|r| r.name.eq_ignore_ascii_case(name))
        .map(|r| r.record_type())
        .collect();
    if types.is_empty() {
        return None;
    }
    Some(Record::new(
        name,
        120,
        RecordData::Nsec {
            next_domain: name.to_string(),
            types,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_rename_suffix_removes_trailing_counter() {
        assert_eq!(strip_rename_suffix("Printer (2)"), "Printer");
        assert_eq!(strip_rename_suffix("Printer"), "Printer");
        assert_eq!(strip_rename_suffix("Room (Blue)"), "Room (Blue)");
    }

    fn bare_responder(interface: Arc<NetworkInterface>) -> Responder {
        let (events_tx, _events) = mpsc::unbounded_channel();
        Responder {
            interface,
            name: Mutex::new("Host".to_string()),
            records: Mutex::new(RecordCollection::new()),
            bridgeable: RecordCollection::new(),
            state: Mutex::new(State::Probing),
            off_switch: OffSwitch::new(),
            events_tx,
            conflicts: Mutex::new(Vec::new()),
            rename_counter: AtomicU32::new(1),
            backoff_strikes: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn conflict_budget_trips_at_threshold_and_resets_after_quiescence() {
        let interface = crate::interface::test_support::unbound("conflict-budget");
        let responder = bare_responder(interface);

        for _ in 0..CONFLICT_BUDGET {
            responder.record_conflict().await;
        }
        assert!(responder.conflict_budget_tripped().await);

        responder.conflicts.lock().await.clear();
        responder.record_conflict().await;
        responder.conflicts.lock().await[0] -= CONFLICT_QUIESCENCE + Duration::from_secs(1);
        assert!(!responder.conflict_budget_tripped().await);
    }

    #[test]
    fn known_answer_covers_requires_majority_ttl() {
        let record = Record::new("host.local", 120, RecordData::A(std::net::Ipv4Addr::new(1, 2, 3, 4)));
        let mut packet = Packet::query(1);
        let mut stale = record.clone();
        stale.ttl = 50;
        packet.answers.push(stale);
        assert!(!known_answer_covers(&packet, &record));

        let mut packet = Packet::query(2);
        let mut fresh = record.clone();
        fresh.ttl = 100;
        packet.answers.push(fresh);
        assert!(known_answer_covers(&packet, &record));
    }
}
