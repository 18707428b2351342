use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mdns_proto::{Packet, Record};
use rand::Rng;
use tokio::sync::mpsc;

use crate::cancellation::{OffSwitch, StopSignal};
use crate::collection::RecordCollection;
use crate::interface::{InterfaceEvent, NetworkInterface};

const PROBE_SPACING: Duration = Duration::from_millis(250);
const PROBE_COUNT: u32 = 3;
const TIEBREAK_RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEvent {
    Complete { early: bool },
    Conflict,
    /// The interface signaled a sleep/wake cycle (spec §5): a full stop,
    /// distinct from `Conflict` — the caller reprobes without renaming or
    /// charging the conflict budget.
    WokeUp,
}

/// Claims a set of unique records on an interface, or reports that another
/// host already holds a conflicting record for the same name (RFC 6762
/// §8.1/§8.2).
pub struct Probe {
    interface: Arc<NetworkInterface>,
    authorities: Vec<Record>,
    /// Records the owning responder is also publishing on other
    /// interfaces — a conflict against one of these is our own reflection,
    /// not a real collision.
    bridgeable: RecordCollection,
    off_switch: OffSwitch,
}

impl Probe {
    pub fn new(interface: Arc<NetworkInterface>, authorities: Vec<Record>, bridgeable: RecordCollection) -> Self {
        Self {
            interface,
            authorities,
            bridgeable,
            off_switch: OffSwitch::new(),
        }
    }

    pub fn stop(&self) {
        self.off_switch.stop();
    }

    /// Runs the probe to completion, returning the terminal event. Also
    /// resolves (with `Conflict`) immediately if told to stop, so a caller
    /// racing `stop()` against `run()` never hangs.
    pub async fn run(&self) -> ProbeEvent {
        let mut stop: StopSignal = self.off_switch.listener();
        let mut events = self.interface.events();

        loop {
            let initial_delay = Duration::from_millis(rand::thread_rng().gen_range(0..250));
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = stop.stopped() => return ProbeEvent::Conflict,
            }

            let mut sent = 0;
            let mut lost_tiebreak = false;

            'probe_round: while sent < PROBE_COUNT {
                let packet = self.build_probe_packet();
                let _ = self.interface.send(&packet, None).await;
                sent += 1;

                let deadline = tokio::time::sleep(PROBE_SPACING);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        _ = stop.stopped() => return ProbeEvent::Conflict,
                        event = events.recv() => {
                            let Ok(event) = event else { continue };
                            match self.handle_event(event) {
                                Reaction::None => {}
                                Reaction::EarlySuccess => {
                                    tracing::debug!(interface = %self.interface.key(), "probe succeeded early");
                                    return ProbeEvent::Complete { early: true };
                                }
                                Reaction::Conflict => {
                                    tracing::warn!(interface = %self.interface.key(), "probe detected a conflict");
                                    return ProbeEvent::Conflict;
                                }
                                Reaction::LostTiebreak => {
                                    tracing::debug!(interface = %self.interface.key(), "lost probe tiebreak, restarting");
                                    lost_tiebreak = true;
                                    break 'probe_round;
                                }
                                Reaction::WokeUp => {
                                    tracing::info!(interface = %self.interface.key(), "sleep/wake detected, stopping probe");
                                    return ProbeEvent::WokeUp;
                                }
                            }
                        }
                    }
                }
            }

            if lost_tiebreak {
                tokio::select! {
                    _ = tokio::time::sleep(TIEBREAK_RESTART_DELAY) => continue,
                    _ = stop.stopped() => return ProbeEvent::Conflict,
                }
            }

            return ProbeEvent::Complete { early: false };
        }
    }

    fn handle_event(&self, event: InterfaceEvent) -> Reaction {
        match event {
            InterfaceEvent::Answer(packet) => self.handle_answer(&packet),
            InterfaceEvent::Probe(packet) => self.handle_incoming_probe(&packet),
            InterfaceEvent::Wake => Reaction::WokeUp,
            _ => Reaction::None,
        }
    }

    fn handle_answer(&self, packet: &Packet) -> Reaction {
        let incoming: RecordCollection = packet
            .answers
            .iter()
            .chain(packet.additional.iter())
            .cloned()
            .collect();

        let ours: RecordCollection = self.authorities.iter().cloned().collect();

        if self
            .authorities
            .iter()
            .all(|record| incoming.to_array().iter().any(|i| i.hash() == record.hash()))
            && !self.authorities.is_empty()
        {
            return Reaction::EarlySuccess;
        }

        let conflicts = ours.get_conflicts(&incoming);
        if conflicts.is_empty() {
            return Reaction::None;
        }
        if conflicts.iter().all(|c| self.bridgeable.has(c)) {
            return Reaction::None;
        }
        Reaction::Conflict
    }

    fn handle_incoming_probe(&self, packet: &Packet) -> Reaction {
        if packet.is_local(&self.interface.local_addresses()) {
            return Reaction::None;
        }
        match probe_tiebreak(&self.authorities, &packet.authorities) {
            Ordering::Less => Reaction::LostTiebreak,
            _ => Reaction::None,
        }
    }

    fn build_probe_packet(&self) -> Packet {
        let mut packet = Packet::query(rand::thread_rng().gen());
        let mut seen_names = std::collections::HashSet::new();
        for record in &self.authorities {
            if seen_names.insert(record.name.to_lowercase()) {
                packet
                    .questions
                    .push(mdns_proto::packet::Question::new(&record.name, record.record_type()));
            }
        }
        packet.authorities = self.authorities.clone();
        packet
    }
}

enum Reaction {
    None,
    EarlySuccess,
    Conflict,
    LostTiebreak,
    WokeUp,
}

/// Groups both sides by uppercased owner name, drops names absent from
/// `ours`, sorts each group by ascending rrtype, and compares pairwise.
/// `Less` means `ours` loses the tiebreak.
fn probe_tiebreak(ours: &[Record], theirs: &[Record]) -> Ordering {
    use std::collections::BTreeMap;

    let mut our_groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for r in ours {
        our_groups.entry(r.name.to_uppercase()).or_default().push(r);
    }
    let mut their_groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for r in theirs {
        their_groups.entry(r.name.to_uppercase()).or_default().push(r);
    }

    for (name, mut our_group) in our_groups {
        let Some(mut their_group) = their_groups.remove(&name) else {
            continue;
        };
        our_group.sort_by_key(|r| r.record_type().into_u16());
        their_group.sort_by_key(|r| r.record_type().into_u16());

        let ordering = compare_record_groups(&our_group, &their_group);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_record_groups(ours: &[&Record], theirs: &[&Record]) -> Ordering {
    for (a, b) in ours.iter().zip(theirs.iter()) {
        let cmp = compare_records(a, b);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    ours.len().cmp(&theirs.len())
}

/// Lexicographic comparison: rrclass, then rrtype, then raw rdata bytes —
/// owner name and TTL never participate.
fn compare_records(a: &Record, b: &Record) -> Ordering {
    a.class
        .cmp(&b.class)
        .then_with(|| a.record_type().into_u16().cmp(&b.record_type().into_u16()))
        .then_with(|| a.data.canonical_bytes().unwrap_or_default().cmp(&b.data.canonical_bytes().unwrap_or_default()))
}

/// Spawns the probe on its own task and returns a handle the caller can
/// `stop()` or await the single terminal event from.
pub fn spawn_probe(
    interface: Arc<NetworkInterface>,
    authorities: Vec<Record>,
    bridgeable: RecordCollection,
) -> (OffSwitch, mpsc::Receiver<ProbeEvent>) {
    let probe = Arc::new(Probe::new(interface, authorities, bridgeable));
    let off_switch = probe.off_switch.clone();
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let event = probe.run().await;
        let _ = tx.send(event).await;
    });
    (off_switch, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_proto::RecordData;
    use std::net::Ipv4Addr;

    fn a(name: &str, octet: u8) -> Record {
        Record::new(name, 120, RecordData::A(Ipv4Addr::new(10, 0, 0, octet)))
    }

    #[test]
    fn tiebreak_prefers_higher_rdata_bytes() {
        let ours = vec![a("host.local", 1)];
        let theirs = vec![a("host.local", 2)];
        assert_eq!(probe_tiebreak(&ours, &theirs), Ordering::Less);
        assert_eq!(probe_tiebreak(&theirs, &ours), Ordering::Greater);
    }

    #[test]
    fn tiebreak_ignores_names_absent_on_our_side() {
        let ours = vec![a("host.local", 5)];
        let theirs = vec![a("other.local", 1)];
        assert_eq!(probe_tiebreak(&ours, &theirs), Ordering::Equal);
    }

    #[test]
    fn wake_event_reacts_as_woke_up() {
        let interface = crate::interface::test_support::unbound("wake-probe");
        let probe = Probe::new(interface, vec![a("host.local", 1)], RecordCollection::new());
        assert!(matches!(probe.handle_event(InterfaceEvent::Wake), Reaction::WokeUp));
    }

    #[test]
    fn shorter_group_loses_when_prefix_matches() {
        let ours = vec![a("host.local", 5)];
        let mut theirs = vec![a("host.local", 5)];
        theirs.push(Record::new(
            "host.local",
            120,
            RecordData::Aaaa(std::net::Ipv6Addr::LOCALHOST),
        ));
        assert_eq!(probe_tiebreak(&ours, &theirs), Ordering::Less);
    }
}
