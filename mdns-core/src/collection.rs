use std::collections::HashMap;

use mdns_proto::Record;

/// A set of records keyed by content hash (RFC invariant: at most one record
/// per hash lives in a collection; two records with equal hash are
/// interchangeable). Insertion order is not preserved.
#[derive(Debug, Clone, Default)]
pub struct RecordCollection {
    records: HashMap<u64, Record>,
}

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has(&self, record: &Record) -> bool {
        self.records.contains_key(&record.hash())
    }

    pub fn has_each(&self, records: &[Record]) -> bool {
        records.iter().all(|r| self.has(r))
    }

    pub fn has_any(&self, records: &[Record]) -> bool {
        records.iter().any(|r| self.has(r))
    }

    pub fn get(&self, record: &Record) -> Option<&Record> {
        self.records.get(&record.hash())
    }

    /// Returns `true` if the record replaced an existing entry with the same
    /// hash (a no-op refresh), `false` if it was newly inserted.
    pub fn add(&mut self, record: Record) -> bool {
        self.records.insert(record.hash(), record).is_some()
    }

    pub fn add_each(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.add(record);
        }
    }

    pub fn delete(&mut self, record: &Record) -> Option<Record> {
        self.records.remove(&record.hash())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn to_array(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Vec<Record> {
        self.records.values().filter(|r| predicate(r)).cloned().collect()
    }

    pub fn map<T>(&self, f: impl Fn(&Record) -> T) -> Vec<T> {
        self.records.values().map(f).collect()
    }

    pub fn reduce<T>(&self, init: T, f: impl Fn(T, &Record) -> T) -> T {
        self.records.values().fold(init, f)
    }

    pub fn equals(&self, other: &RecordCollection) -> bool {
        self.records.len() == other.records.len()
            && self.records.keys().all(|k| other.records.contains_key(k))
    }

    /// Records present in `self` but not in `other`, by hash.
    pub fn difference(&self, other: &RecordCollection) -> Vec<Record> {
        self.records
            .iter()
            .filter(|(k, _)| !other.records.contains_key(*k))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn intersection(&self, other: &RecordCollection) -> Vec<Record> {
        self.records
            .iter()
            .filter(|(k, _)| other.records.contains_key(*k))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// True iff `candidate` is a unique record type and some stored record
    /// shares its namehash but carries different rdata. A record identical
    /// to one we already hold (same hash) never conflicts with itself.
    pub fn has_conflict_with(&self, candidate: &Record) -> bool {
        if !candidate.is_unique() {
            return false;
        }
        self.records.values().any(|stored| {
            stored.namehash() == candidate.namehash() && stored.hash() != candidate.hash()
        })
    }

    /// `{r in other \ this : exists s in this \ other, s.namehash = r.namehash, s.isUnique, s.rdata != r.rdata}`.
    ///
    /// Records that appear on both sides (by hash) are excluded before
    /// comparing, because another host legitimately publishing additional
    /// addresses for a name we also hold must not read as a conflict.
    pub fn get_conflicts(&self, other: &RecordCollection) -> Vec<Record> {
        let ours_only = self.difference(other);
        let theirs_only = other.difference(self);

        theirs_only
            .into_iter()
            .filter(|r| {
                ours_only
                    .iter()
                    .any(|s| s.namehash() == r.namehash() && s.is_unique() && s.hash() != r.hash())
            })
            .collect()
    }
}

impl FromIterator<Record> for RecordCollection {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut collection = Self::new();
        collection.add_each(iter);
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_proto::RecordData;
    use std::net::Ipv4Addr;

    fn a(name: &str, ttl: u32, octet: u8) -> Record {
        Record::new(name, ttl, RecordData::A(Ipv4Addr::new(10, 0, 0, octet)))
    }

    #[test]
    fn add_dedupes_by_hash() {
        let mut c = RecordCollection::new();
        assert!(!c.add(a("host.local", 120, 1)));
        assert!(c.add(a("host.local", 120, 1)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn has_conflict_with_requires_unique_and_differing_rdata() {
        let mut c = RecordCollection::new();
        c.add(a("host.local", 120, 1));
        assert!(c.has_conflict_with(&a("host.local", 120, 2)));
        assert!(!c.has_conflict_with(&a("host.local", 120, 1)));

        let ptr = Record::new("_svc._tcp.local", 4500, RecordData::Ptr("a._svc._tcp.local".into()));
        assert!(!c.has_conflict_with(&ptr));
    }

    #[test]
    fn get_conflicts_excludes_shared_records() {
        use similar_asserts::assert_eq;

        let mut mine = RecordCollection::new();
        mine.add(a("host.local", 120, 1));
        mine.add(a("host.local", 120, 2));

        let mut theirs = RecordCollection::new();
        theirs.add(a("host.local", 120, 1)); // shared, excluded
        theirs.add(a("host.local", 120, 9)); // conflicts with our .2 entry

        let conflicts = mine.get_conflicts(&theirs);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0], a("host.local", 120, 9));
    }

    #[test]
    fn difference_and_intersection() {
        let mut mine = RecordCollection::new();
        mine.add(a("a.local", 1, 1));
        mine.add(a("b.local", 1, 1));

        let mut theirs = RecordCollection::new();
        theirs.add(a("b.local", 1, 1));
        theirs.add(a("c.local", 1, 1));

        assert_eq!(mine.difference(&theirs).len(), 1);
        assert_eq!(mine.intersection(&theirs).len(), 1);
    }
}
