use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdns_proto::{Record, RecordType};
use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Fractions of a record's TTL at which a reissue callback fires, randomized
/// +/-2% per RFC 6762 §5.2 to avoid every cache in a segment refreshing in
/// lockstep.
const REISSUE_FRACTIONS: [f64; 4] = [0.80, 0.85, 0.90, 0.95];
const JITTER: f64 = 0.02;
/// Minimum remaining-TTL fraction (of the original TTL) for a cached record
/// to qualify as a known answer on an outgoing query (RFC 6762 §7.1).
const KNOWN_ANSWER_TTL_FRACTION: f64 = 0.5;

#[derive(Debug, Clone)]
pub enum CacheEvent {
    Reissue(Record),
    Expired(Record),
}

struct Entry {
    record: Record,
    inserted_at: Instant,
    original_ttl: u32,
    /// Aborted and replaced whenever the record is refreshed or scheduled
    /// for early expiry.
    timers: Vec<JoinHandle<()>>,
    expiring: bool,
}

impl Drop for Entry {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

/// A [`crate::collection::RecordCollection`] augmented with TTL-driven
/// reissue/expire scheduling (spec §4.2). Owned by a network interface and
/// observed by any number of Queries and ServiceResolvers via
/// [`ExpiringCache::subscribe`].
#[derive(Clone)]
pub struct ExpiringCache {
    inner: Arc<Mutex<HashMap<u64, Entry>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl ExpiringCache {
    pub fn new() -> (Self, broadcast::Receiver<CacheEvent>) {
        let (events, rx) = broadcast::channel(256);
        (
            Self {
                inner: Arc::new(Mutex::new(HashMap::new())),
                events,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Adds or refreshes a record. TTL=0 is a goodbye: the record is
    /// scheduled for immediate expiry rather than cached.
    pub async fn add(&self, record: Record) {
        if record.ttl == 0 {
            self.set_to_expire(&record).await;
            return;
        }

        let hash = record.hash();
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.remove(&hash) {
            drop(existing); // aborts old timers
        }

        let timers = self.schedule_timers(&record);
        guard.insert(
            hash,
            Entry {
                record,
                inserted_at: Instant::now(),
                original_ttl: timers.0,
                timers: timers.1,
                expiring: false,
            },
        );
    }

    pub async fn add_each(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.add(record).await;
        }
    }

    fn schedule_timers(&self, record: &Record) -> (u32, Vec<JoinHandle<()>>) {
        let ttl = record.ttl;
        let mut timers = Vec::with_capacity(REISSUE_FRACTIONS.len() + 1);

        for fraction in REISSUE_FRACTIONS {
            let delay = jittered_delay(ttl, fraction);
            let inner = self.inner.clone();
            let events = self.events.clone();
            let hash = record.hash();
            timers.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let guard = inner.lock().await;
                if let Some(entry) = guard.get(&hash) {
                    let _ = events.send(CacheEvent::Reissue(entry.record.clone()));
                }
            }));
        }

        let delay = jittered_delay(ttl, 1.0);
        let inner = self.inner.clone();
        let events = self.events.clone();
        let hash = record.hash();
        timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut guard = inner.lock().await;
            if let Some(entry) = guard.remove(&hash) {
                let _ = events.send(CacheEvent::Expired(entry.record));
            }
        }));

        (ttl, timers)
    }

    /// Clears any scheduled reissue/expire timers and schedules a single
    /// delete one second out, unless a delete is already pending.
    pub async fn set_to_expire(&self, record: &Record) {
        let hash = record.hash();
        let mut guard = self.inner.lock().await;
        let already_expiring = guard.get(&hash).map(|e| e.expiring).unwrap_or(false);
        if already_expiring {
            return;
        }

        let previous = guard.remove(&hash);
        let record = previous.map(|e| e.record).unwrap_or_else(|| record.clone());

        let inner = self.inner.clone();
        let events = self.events.clone();
        let hash_for_timer = record.hash();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut guard = inner.lock().await;
            if let Some(entry) = guard.remove(&hash_for_timer) {
                let _ = events.send(CacheEvent::Expired(entry.record));
            }
        });

        guard.insert(
            hash,
            Entry {
                record,
                inserted_at: Instant::now(),
                original_ttl: 0,
                timers: vec![timer],
                expiring: true,
            },
        );
    }

    /// Marks every unique record sharing `unique`'s namehash (other than
    /// itself) for expiry, provided it is older than one second — the
    /// cache-flush semantics of RFC 6762 §10.2.
    pub async fn flush_related(&self, unique: &Record) {
        if !unique.is_unique() {
            return;
        }
        let namehash = unique.namehash();
        let self_hash = unique.hash();

        let stale: Vec<Record> = {
            let guard = self.inner.lock().await;
            guard
                .values()
                .filter(|e| {
                    e.record.namehash() == namehash
                        && e.record.hash() != self_hash
                        && e.record.is_unique()
                        && e.inserted_at.elapsed() > Duration::from_secs(1)
                })
                .map(|e| e.record.clone())
                .collect()
        };

        for record in stale {
            self.set_to_expire(&record).await;
        }
    }

    pub async fn has(&self, record: &Record) -> bool {
        self.inner.lock().await.contains_key(&record.hash())
    }

    /// A clone of the stored record with TTL decremented by the elapsed time
    /// since it was added.
    pub async fn get(&self, record: &Record) -> Option<Record> {
        let guard = self.inner.lock().await;
        guard.get(&record.hash()).map(|entry| entry_with_elapsed_ttl(entry))
    }

    pub async fn has_added_within(&self, record: &Record, window: Duration) -> bool {
        let guard = self.inner.lock().await;
        guard
            .get(&record.hash())
            .map(|e| e.inserted_at.elapsed() <= window)
            .unwrap_or(false)
    }

    pub async fn has_conflict_with(&self, candidate: &Record) -> bool {
        if !candidate.is_unique() {
            return false;
        }
        let guard = self.inner.lock().await;
        guard.values().any(|e| {
            e.record.namehash() == candidate.namehash() && e.record.hash() != candidate.hash()
        })
    }

    pub async fn delete(&self, record: &Record) {
        self.inner.lock().await.remove(&record.hash());
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    /// Matches by namehash(name, qclass) and rrtype == queried type or ANY,
    /// returning elapsed-time-adjusted clones.
    pub async fn find(&self, name: &str, qtype: RecordType, qclass: u16) -> Vec<Record> {
        let guard = self.inner.lock().await;
        guard
            .values()
            .filter(|e| {
                e.record.name.eq_ignore_ascii_case(name)
                    && e.record.class == qclass
                    && (qtype == RecordType::Any || e.record.record_type() == qtype)
            })
            .map(entry_with_elapsed_ttl)
            .collect()
    }

    /// Like [`Self::find`], but restricted to records still above half
    /// their original TTL, with the cache-flush bit cleared — the shape
    /// RFC 6762 §7.1 requires for known-answer suppression on outgoing
    /// queries.
    pub async fn find_known_answers(&self, name: &str, qtype: RecordType, qclass: u16) -> Vec<Record> {
        let guard = self.inner.lock().await;
        guard
            .values()
            .filter(|e| {
                e.record.name.eq_ignore_ascii_case(name)
                    && e.record.class == qclass
                    && (qtype == RecordType::Any || e.record.record_type() == qtype)
            })
            .filter(|e| {
                let elapsed = e.inserted_at.elapsed().as_secs() as u32;
                let remaining = e.original_ttl.saturating_sub(elapsed);
                remaining as f64 > e.original_ttl as f64 * KNOWN_ANSWER_TTL_FRACTION
            })
            .map(|e| {
                let mut record = entry_with_elapsed_ttl(e);
                record.flush = false;
                record
            })
            .collect()
    }

    pub async fn to_array(&self) -> Vec<Record> {
        self.inner.lock().await.values().map(entry_with_elapsed_ttl).collect()
    }
}

fn entry_with_elapsed_ttl(entry: &Entry) -> Record {
    let elapsed = entry.inserted_at.elapsed().as_secs() as u32;
    let mut record = entry.record.clone();
    record.ttl = entry.original_ttl.saturating_sub(elapsed);
    record
}

/// +/-`JITTER` of the base delay, drawn fresh per call so that records
/// sharing a TTL (the common case for a record set announced together)
/// don't reissue in lockstep across hosts.
fn jittered_delay(ttl: u32, fraction: f64) -> Duration {
    let base = ttl as f64 * fraction;
    let jitter = base * JITTER * rand::thread_rng().gen_range(-1.0..=1.0);
    Duration::from_secs_f64((base + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_proto::RecordData;
    use std::net::Ipv4Addr;

    fn a(name: &str, ttl: u32) -> Record {
        Record::new(name, ttl, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[tokio::test]
    async fn add_then_has_then_get_decrements_ttl() {
        let (cache, _rx) = ExpiringCache::new();
        cache.add(a("host.local", 100)).await;
        assert!(cache.has(&a("host.local", 100)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = cache.get(&a("host.local", 100)).await.unwrap();
        assert!(got.ttl <= 100);
    }

    #[tokio::test]
    async fn ttl_zero_schedules_expiry_instead_of_caching() {
        let (cache, mut rx) = ExpiringCache::new();
        cache.add(a("host.local", 0)).await;
        let event = tokio::time::timeout(Duration::from_millis(1500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CacheEvent::Expired(_)));
    }

    #[tokio::test]
    async fn flush_related_ignores_fresh_records() {
        let (cache, _rx) = ExpiringCache::new();
        let a1 = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        let a2 = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(2, 2, 2, 2)));
        cache.add(a1.clone()).await;
        cache.add(a2.clone()).await;
        // both inserted just now: flush_related must not touch either (age <= 1s)
        cache.flush_related(&a2).await;
        assert!(cache.has(&a1).await);
    }

    #[tokio::test]
    async fn has_conflict_with_detects_differing_rdata_same_namehash() {
        let (cache, _rx) = ExpiringCache::new();
        cache.add(a("host.local", 120)).await;
        let other = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(9, 9, 9, 9)));
        assert!(cache.has_conflict_with(&other).await);
    }

    #[tokio::test]
    async fn find_matches_any_qtype() {
        let (cache, _rx) = ExpiringCache::new();
        cache.add(a("host.local", 120)).await;
        let found = cache.find("host.local", RecordType::Any, 1).await;
        assert_eq!(found.len(), 1);
        let found = cache.find("host.local", RecordType::Aaaa, 1).await;
        assert!(found.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn find_known_answers_clears_flush_and_excludes_stale_ttl() {
        let (cache, _rx) = ExpiringCache::new();
        let mut record = a("host.local", 10);
        record.flush = true;
        cache.add(record).await;

        let found = cache.find_known_answers("host.local", RecordType::A, 1).await;
        assert_eq!(found.len(), 1);
        assert!(!found[0].flush);

        tokio::time::advance(Duration::from_secs(6)).await;
        let found = cache.find_known_answers("host.local", RecordType::A, 1).await;
        assert!(found.is_empty());
    }
}
