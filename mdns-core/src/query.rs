use std::sync::Arc;
use std::time::Duration;

use mdns_proto::packet::Question;
use mdns_proto::{Packet, Record};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::cache::CacheEvent;
use crate::cancellation::{OffSwitch, StopSignal};
use crate::cache::ExpiringCache;
use crate::interface::{InterfaceEvent, NetworkInterface};

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub enum QueryEvent {
    Answer { record: Record, related: Vec<Record> },
    Timeout,
}

/// A continuous or one-shot mDNS question sequence (RFC 6762 §5.2/§5.3),
/// with known-answer suppression (§7.1) and duplicate-question suppression
/// (§7.3).
pub struct Query {
    interface: Arc<NetworkInterface>,
    questions: Vec<Question>,
    continuous: bool,
    ignore_cache: bool,
    timeout: Option<Duration>,
    known_answers: ExpiringCache,
    off_switch: OffSwitch,
    events_tx: mpsc::UnboundedSender<QueryEvent>,
}

pub struct QueryHandle {
    pub off_switch: OffSwitch,
    pub events: mpsc::UnboundedReceiver<QueryEvent>,
}

impl Query {
    pub fn spawn(
        interface: Arc<NetworkInterface>,
        questions: Vec<Question>,
        continuous: bool,
        ignore_cache: bool,
        timeout: Option<Duration>,
    ) -> QueryHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (known_answers, _known_answers_rx) = ExpiringCache::new();
        let off_switch = OffSwitch::new();
        let cache_expiry = interface.cache().subscribe();

        let query = Arc::new(Self {
            interface,
            questions,
            continuous,
            ignore_cache,
            timeout,
            known_answers,
            off_switch: off_switch.clone(),
            events_tx,
        });

        tokio::spawn(watch_cache_expiry(cache_expiry, query.known_answers.clone()));
        tokio::spawn(async move { query.run().await });

        QueryHandle { off_switch, events }
    }

    pub fn stop(&self) {
        self.off_switch.stop();
    }

    async fn run(self: Arc<Self>) {
        let mut stop: StopSignal = self.off_switch.listener();
        let mut questions = Mutex::new(self.questions.clone());

        if !self.ignore_cache {
            self.check_cache(&mut questions).await;
            if questions.lock().await.is_empty() && !self.continuous {
                return;
            }
        }

        let initial_delay = Duration::from_millis(rand::thread_rng().gen_range(20..120));
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = stop.stopped() => return,
        }

        let mut events = self.interface.events();
        let mut backoff = Duration::from_secs(1);

        let timeout_sleep = self
            .timeout
            .map(|d| Box::pin(tokio::time::sleep(d)))
            .unwrap_or_else(|| Box::pin(tokio::time::sleep(Duration::from_secs(u64::MAX / 2))));
        tokio::pin!(timeout_sleep);

        loop {
            {
                let mut guard = questions.lock().await;
                self.trim_duplicate_questions(&mut guard, &mut events);
                if guard.is_empty() {
                    return;
                }
                let packet = self.build_packet(&guard).await;
                let _ = self.interface.send(&packet, None).await;
            }

            let backoff_sleep = tokio::time::sleep(backoff);
            tokio::pin!(backoff_sleep);
            let mut woke = false;

            loop {
                tokio::select! {
                    _ = &mut backoff_sleep => break,
                    _ = &mut timeout_sleep => {
                        let _ = self.events_tx.send(QueryEvent::Timeout);
                        return;
                    }
                    _ = stop.stopped() => return,
                    event = events.recv() => {
                        match event {
                            Ok(InterfaceEvent::Answer(packet)) => {
                                let done = self.process_answer(&packet, &mut questions).await;
                                if !self.continuous {
                                    return;
                                }
                                if done && questions.lock().await.is_empty() {
                                    return;
                                }
                            }
                            Ok(InterfaceEvent::Wake) => {
                                tracing::info!(interface = %self.interface.key(), "sleep/wake detected, restarting query");
                                woke = true;
                                break;
                            }
                            _ => continue,
                        }
                    }
                }
            }

            if woke {
                *questions.get_mut() = self.questions.clone();
                backoff = Duration::from_secs(1);
            } else {
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    async fn check_cache(&self, questions: &mut Mutex<Vec<Question>>) {
        let mut guard = questions.lock().await;
        let mut remaining = Vec::new();
        for question in guard.drain(..) {
            let matches = self
                .interface
                .cache()
                .find(&question.name, question.qtype, question.qclass)
                .await;
            if matches.is_empty() {
                remaining.push(question);
                continue;
            }
            let mut satisfied = false;
            for record in &matches {
                let _ = self.events_tx.send(QueryEvent::Answer {
                    record: record.clone(),
                    related: matches.clone(),
                });
                if record.is_unique() {
                    satisfied = true;
                } else {
                    self.known_answers.add(record.clone()).await;
                }
            }
            if !satisfied {
                remaining.push(question);
            }
        }
        *guard = remaining;
    }

    async fn process_answer(&self, packet: &Packet, questions: &Mutex<Vec<Question>>) -> bool {
        let all_records: Vec<Record> = packet.answers.iter().chain(packet.additional.iter()).cloned().collect();
        let mut guard = questions.lock().await;
        let mut any_satisfied = false;

        for question in guard.iter() {
            let matching: Vec<Record> = all_records
                .iter()
                .filter(|r| r.name.eq_ignore_ascii_case(&question.name) && (question.qtype == mdns_proto::RecordType::Any || r.record_type() == question.qtype))
                .cloned()
                .collect();
            for record in &matching {
                let _ = self.events_tx.send(QueryEvent::Answer {
                    record: record.clone(),
                    related: matching.clone(),
                });
                if record.is_unique() {
                    any_satisfied = true;
                } else {
                    self.known_answers.add(record.clone()).await;
                }
            }
        }

        if any_satisfied {
            guard.retain(|q| {
                !all_records
                    .iter()
                    .any(|r| r.name.eq_ignore_ascii_case(&q.name) && r.is_unique() && (q.qtype == mdns_proto::RecordType::Any || r.record_type() == q.qtype))
            });
        }
        any_satisfied
    }

    /// Removes a QM question from the queued packet if a non-local peer
    /// just asked the exact same question with no answers of its own yet —
    /// duplicate-question suppression (RFC 6762 §7.3). QU questions are
    /// never suppressed this way.
    fn trim_duplicate_questions(&self, questions: &mut Vec<Question>, events: &mut tokio::sync::broadcast::Receiver<InterfaceEvent>) {
        while let Ok(event) = events.try_recv() {
            let InterfaceEvent::Query(packet) = event else { continue };
            if packet.is_local(&self.interface.local_addresses()) || !packet.answers.is_empty() {
                continue;
            }
            questions.retain(|q| {
                !packet
                    .questions
                    .iter()
                    .any(|incoming| !incoming.qu && incoming.name.eq_ignore_ascii_case(&q.name) && incoming.qtype == q.qtype)
            });
        }
    }

    /// Attaches already-known shared records as known answers (RFC 6762
    /// §7.1) so peers skip responses we'd just discard. Only records still
    /// above half their original TTL qualify, and the cache-flush bit is
    /// cleared since a known answer is advisory, not authoritative.
    async fn build_packet(&self, questions: &[Question]) -> Packet {
        let mut packet = Packet::query(rand::thread_rng().gen());
        let mut known = Vec::new();
        for question in questions {
            known.extend(
                self.known_answers
                    .find_known_answers(&question.name, question.qtype, question.qclass)
                    .await,
            );
        }
        packet.questions = questions.to_vec();
        packet.answers = known;
        packet
    }
}

/// Keeps the query's own known-answer cache in sync with the interface
/// cache's expiry, so a record we suppressed as "known" isn't suppressed
/// forever after it actually ages out upstream.
async fn watch_cache_expiry(mut events: broadcast::Receiver<CacheEvent>, known_answers: ExpiringCache) {
    loop {
        match events.recv().await {
            Ok(CacheEvent::Expired(record)) => known_answers.delete(&record).await,
            Ok(CacheEvent::Reissue(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::test_support;
    use mdns_proto::{RecordData, RecordType};

    fn bare_query(interface: Arc<NetworkInterface>) -> Query {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (known_answers, _rx) = ExpiringCache::new();
        Query {
            interface,
            questions: Vec::new(),
            continuous: false,
            ignore_cache: false,
            timeout: None,
            known_answers,
            off_switch: OffSwitch::new(),
            events_tx,
        }
    }

    #[tokio::test]
    async fn build_packet_attaches_known_shared_answers_with_flush_cleared() {
        let interface = test_support::unbound("known-answers");
        let query = bare_query(interface);
        let mut record = Record::new("_http._tcp.local", 120, RecordData::Ptr("instance._http._tcp.local".to_string()));
        record.flush = true;
        query.known_answers.add(record.clone()).await;

        let question = Question::new("_http._tcp.local", RecordType::Ptr);
        let packet = query.build_packet(&[question]).await;

        assert_eq!(packet.answers.len(), 1);
        assert_eq!(packet.answers[0].hash(), record.hash());
        assert!(!packet.answers[0].flush);
    }

    #[tokio::test(start_paused = true)]
    async fn build_packet_omits_known_answers_below_half_ttl() {
        let interface = test_support::unbound("known-answers-stale");
        let query = bare_query(interface);
        let record = Record::new("_http._tcp.local", 10, RecordData::Ptr("instance._http._tcp.local".to_string()));
        query.known_answers.add(record).await;

        // Past the 50% mark of a 10s TTL: no longer a valid known answer.
        tokio::time::advance(Duration::from_secs(6)).await;

        let question = Question::new("_http._tcp.local", RecordType::Ptr);
        let packet = query.build_packet(&[question]).await;

        assert!(packet.answers.is_empty());
    }

    #[tokio::test]
    async fn build_packet_omits_answers_for_unasked_questions() {
        let interface = test_support::unbound("known-answers-unasked");
        let query = bare_query(interface);
        let record = Record::new("other.local", 120, RecordData::Ptr("instance.other.local".to_string()));
        query.known_answers.add(record).await;

        let question = Question::new("_http._tcp.local", RecordType::Ptr);
        let packet = query.build_packet(&[question]).await;

        assert!(packet.answers.is_empty());
    }
}
