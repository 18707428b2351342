use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_proto::packet::Question;
use mdns_proto::{Packet, Record};
use rand::Rng;
use tokio::sync::Mutex;

use crate::cancellation::{OffSwitch, StopSignal};
use crate::interface::{InterfaceEvent, NetworkInterface};

const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(1);
const DEFENSIVE_SUPPRESSION_WINDOW: Duration = Duration::from_millis(250);
const LEGACY_TTL_CAP: u32 = 10;

fn companions_minus_answers(answers: &[Record]) -> Vec<Record> {
    answers
        .iter()
        .flat_map(|a| a.companions.iter().cloned())
        .filter(|c| !answers.iter().any(|a| a.hash() == c.hash()))
        .collect()
}

/// Shared behavior of the multicast, goodbye and unicast response senders
/// (RFC 6762 §8.3/§8.4/§6): build the next packet ahead of time so incoming
/// peer answers can suppress duplicates in it, then send (possibly several
/// times with exponentially increasing spacing).
pub struct MulticastResponse {
    interface: Arc<NetworkInterface>,
    answers: Mutex<Vec<Record>>,
    defensive: bool,
    repeat: u32,
    goodbye: bool,
    off_switch: OffSwitch,
}

impl MulticastResponse {
    pub fn new(interface: Arc<NetworkInterface>, answers: Vec<Record>) -> Self {
        Self {
            interface,
            answers: Mutex::new(answers),
            defensive: false,
            repeat: 1,
            goodbye: false,
            off_switch: OffSwitch::new(),
        }
    }

    pub fn goodbye(interface: Arc<NetworkInterface>, answers: Vec<Record>) -> Self {
        let goodbye_answers = answers
            .into_iter()
            .map(|mut r| {
                r.ttl = 0;
                r
            })
            .collect();
        Self {
            interface,
            answers: Mutex::new(goodbye_answers),
            defensive: false,
            repeat: 1,
            goodbye: true,
            off_switch: OffSwitch::new(),
        }
    }

    pub fn defensive(mut self, defensive: bool) -> Self {
        self.defensive = defensive;
        self
    }

    pub fn repeat(mut self, n: u32) -> Self {
        self.repeat = n.max(1);
        self
    }

    pub fn stop(&self) {
        self.off_switch.stop();
    }

    pub async fn run(&self) {
        let mut stop: StopSignal = self.off_switch.listener();
        let mut events = self.interface.events();

        let first_delay = if self.defensive {
            Duration::ZERO
        } else {
            let shared = self.answers.lock().await.iter().any(|r| !r.is_unique());
            if shared {
                Duration::from_millis(rand::thread_rng().gen_range(20..120))
            } else {
                Duration::ZERO
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(first_delay) => {}
            _ = stop.stopped() => return,
        }

        let mut backoff = Duration::from_secs(1);
        for round in 0..self.repeat {
            if stop.is_stopped() {
                return;
            }

            if !self.goodbye {
                self.absorb_incoming_duplicates(&mut events).await;
                self.apply_outgoing_suppression().await;
            }

            let packet = self.build_packet().await;
            let _ = self.interface.send(&packet, None).await;

            if round + 1 < self.repeat {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stop.stopped() => return,
                }
                backoff *= 2;
            }
        }
    }

    async fn absorb_incoming_duplicates(&self, events: &mut tokio::sync::broadcast::Receiver<InterfaceEvent>) {
        while let Ok(event) = events.try_recv() {
            let InterfaceEvent::Answer(packet) = event else { continue };
            if packet.is_local(&self.interface.local_addresses()) {
                continue;
            }
            let mut answers = self.answers.lock().await;
            answers.retain(|queued| {
                !packet
                    .answers
                    .iter()
                    .chain(packet.additional.iter())
                    .any(|incoming| incoming.ttl != 0 && incoming.hash() == queued.hash())
            });
        }
    }

    async fn apply_outgoing_suppression(&self) {
        let window = if self.defensive {
            DEFENSIVE_SUPPRESSION_WINDOW
        } else {
            DEFAULT_SUPPRESSION_WINDOW
        };
        let mut answers = self.answers.lock().await;
        let mut kept = Vec::with_capacity(answers.len());
        for record in answers.drain(..) {
            if !self.interface.has_recently_sent(&record, window).await {
                kept.push(record);
            }
        }
        *answers = kept;
    }

    async fn build_packet(&self) -> Packet {
        let answers = self.answers.lock().await.clone();
        let mut packet = Packet::response();
        packet.header.authoritative = true;
        packet.additional = companions_minus_answers(&answers);
        packet.answers = answers;
        packet
    }
}

/// Sent in reply to a single query, to the asker's `{address, port}`.
pub struct UnicastResponse {
    interface: Arc<NetworkInterface>,
    destination: SocketAddr,
    answers: Vec<Record>,
    legacy: bool,
    query_id: u16,
    questions: Vec<Question>,
}

impl UnicastResponse {
    pub fn new(
        interface: Arc<NetworkInterface>,
        destination: SocketAddr,
        answers: Vec<Record>,
        legacy: bool,
        query_id: u16,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            interface,
            destination,
            answers,
            legacy,
            query_id,
            questions,
        }
    }

    /// Sends once and stops: no 20-120ms delay, no repeat.
    pub async fn run(&self) {
        let mut packet = if self.legacy {
            let mut p = Packet::response();
            p.header.id = self.query_id;
            p.questions = self.questions.clone();
            p
        } else {
            Packet::response()
        };

        let answers: Vec<Record> = self
            .answers
            .iter()
            .filter(|r| !self.legacy || !matches!(r.data, mdns_proto::RecordData::Nsec { .. }))
            .cloned()
            .map(|mut r| {
                if self.legacy {
                    r.ttl = r.ttl.min(LEGACY_TTL_CAP);
                    r.flush = false;
                }
                r
            })
            .collect();

        packet.header.authoritative = true;
        packet.additional = companions_minus_answers(&answers);
        packet.answers = answers;

        let _ = self.interface.send(&packet, Some(self.destination)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_proto::RecordData;
    use std::net::Ipv4Addr;

    #[test]
    fn companions_minus_answers_excludes_duplicates() {
        let companion = Record::new("a.local", 1, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        let answer = Record::new("b.local", 1, RecordData::Ptr("a.local".into())).with_companions(vec![companion.clone()]);
        let result = companions_minus_answers(&[answer.clone(), companion.clone()]);
        assert!(result.is_empty());

        let result = companions_minus_answers(&[answer]);
        assert_eq!(result, vec![companion]);
    }
}
