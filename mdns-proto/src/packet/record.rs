use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use super::RecordType;
use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::PacketBuffer;

/// Top bit of the rrclass field: cache-flush (RFC 6762 §10.2). Shared record
/// types like PTR leave this unset; unique types set it once the owner has
/// survived probing.
const CACHE_FLUSH_BIT: u16 = 0x8000;

/// A single "key" or "key=value" TXT character-string, decoded per RFC 6763
/// §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtEntry {
    pub key: String,
    pub value: TxtValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtValue {
    /// `key=value`, value decodes as UTF-8.
    Text(String),
    /// `key=value`, value does not decode as UTF-8 and is kept opaque.
    Bytes(Vec<u8>),
    /// `key` with no `=`: a boolean attribute.
    Flag,
    /// A zero-length character-string (used to pad a TXT record to satisfy
    /// RFC 6763 §6.1's "must contain at least one string" rule).
    Empty,
}

impl TxtEntry {
    fn parse(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self {
                key: String::new(),
                value: TxtValue::Empty,
            };
        }
        match bytes.iter().position(|b| *b == b'=') {
            Some(idx) => {
                let key = String::from_utf8_lossy(&bytes[..idx]).into_owned();
                let raw = &bytes[idx + 1..];
                let value = match std::str::from_utf8(raw) {
                    Ok(s) => TxtValue::Text(s.to_string()),
                    Err(_) => TxtValue::Bytes(raw.to_vec()),
                };
                Self { key, value }
            }
            None => Self {
                key: String::from_utf8_lossy(bytes).into_owned(),
                value: TxtValue::Flag,
            },
        }
    }

    fn encode(&self) -> Vec<u8> {
        match &self.value {
            TxtValue::Empty => Vec::new(),
            TxtValue::Flag => self.key.clone().into_bytes(),
            TxtValue::Text(v) => format!("{}={}", self.key, v).into_bytes(),
            TxtValue::Bytes(v) => {
                let mut out = self.key.clone().into_bytes();
                out.push(b'=');
                out.extend_from_slice(v);
                out
            }
        }
    }
}

/// The parsed rdata of a resource record. Record types outside RFC 6762/6763's
/// core set (A, AAAA, PTR, SRV, TXT, NSEC) are kept as opaque bytes rather
/// than rejected, so an unrecognized record can still be relayed byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(Vec<TxtEntry>),
    /// The restricted form used for mDNS negative responses (RFC 6762 §6.1):
    /// only the block-0 type bitmap is ever produced or expected.
    Nsec {
        next_domain: String,
        types: Vec<RecordType>,
    },
    Unknown {
        rtype: u16,
        rdata: Vec<u8>,
    },
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Aaaa(_) => RecordType::Aaaa,
            Self::Ptr(_) => RecordType::Ptr,
            Self::Srv { .. } => RecordType::Srv,
            Self::Txt(_) => RecordType::Txt,
            Self::Nsec { .. } => RecordType::Nsec,
            Self::Unknown { rtype, .. } => RecordType::Unknown(*rtype),
        }
    }

    /// Writes this rdata's bytes into a throwaway buffer, with no label
    /// compression carried in from (or leaked out to) the packet being
    /// built — canonical bytes are used for hashing and for the probe FSM's
    /// lexicographic tiebreak, and must not depend on sibling records.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, WriterError> {
        let mut buffer = PacketBuffer::default();
        match self {
            Self::A(addr) => buffer.write_raw(&addr.octets())?,
            Self::Aaaa(addr) => buffer.write_raw(&addr.octets())?,
            Self::Ptr(name) => buffer.write_qname(name)?,
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority)?;
                buffer.write_u16(*weight)?;
                buffer.write_u16(*port)?;
                buffer.write_qname(target)?;
            }
            Self::Txt(entries) => {
                for entry in entries {
                    let bytes = entry.encode();
                    buffer.write_u8(bytes.len() as u8)?;
                    buffer.write_raw(&bytes)?;
                }
            }
            Self::Nsec { next_domain, types } => {
                buffer.write_qname(next_domain)?;
                write_nsec_bitmap(&mut buffer, types)?;
            }
            Self::Unknown { rdata, .. } => buffer.write_raw(rdata)?,
        }
        Ok(buffer.buf)
    }
}

fn write_nsec_bitmap(buffer: &mut PacketBuffer, types: &[RecordType]) -> Result<(), WriterError> {
    let highest = types
        .iter()
        .map(|t| t.into_u16())
        .filter(|v| *v >= 1 && *v <= 255)
        .max()
        .unwrap_or(0);
    let bitmap_len = (highest as usize).div_ceil(8).max(1);
    let mut bitmap = vec![0u8; bitmap_len];
    for t in types {
        let bit = t.into_u16();
        if (1..=255).contains(&bit) {
            let idx = (bit - 1) as usize;
            bitmap[idx / 8] |= 0x80 >> (idx % 8);
        }
    }
    buffer.write_u8(0)?; // window block 0
    buffer.write_u8(bitmap_len as u8)?;
    buffer.write_raw(&bitmap)?;
    Ok(())
}

fn read_nsec_bitmap(buffer: &mut PacketBuffer, end: usize) -> Result<Vec<RecordType>, ReaderError> {
    let mut types = Vec::new();
    while buffer.pos() < end {
        let window = buffer.read()?;
        let len = buffer.read()? as usize;
        let bytes = buffer.read_bytes(len)?;
        if window != 0 {
            continue; // the restricted form never produces anything past block 0
        }
        for (byte_idx, byte) in bytes.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let rrtype = (byte_idx * 8 + bit + 1) as u16;
                    types.push(RecordType::from_u16(rrtype));
                }
            }
        }
    }
    Ok(types)
}

/// A resource record as it appears in a packet's answer/authority/additional
/// section.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub class: u16,
    pub flush: bool,
    pub ttl: u32,
    pub data: RecordData,
    /// Records the network interface should ship alongside this one
    /// (RFC 6763 §12's "additional record generation", e.g. a PTR's SRV/TXT).
    /// Not part of this record's wire identity.
    pub companions: Vec<Record>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.class == other.class
            && self.flush == other.flush
            && self.ttl == other.ttl
            && self.data == other.data
    }
}

impl Eq for Record {}

impl Record {
    pub fn new(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        let flush = data.record_type().is_unique();
        Self {
            name: name.into(),
            class: 1,
            flush,
            ttl,
            data,
            companions: Vec::new(),
        }
    }

    pub fn with_companions(mut self, companions: Vec<Record>) -> Self {
        self.companions = companions;
        self
    }

    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    pub fn is_unique(&self) -> bool {
        self.record_type().is_unique()
    }

    /// Identifies the record's owner/type/class, ignoring rdata — the key
    /// used to group records for cache-flush and conflict detection.
    pub fn namehash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.to_lowercase().hash(&mut hasher);
        self.record_type().into_u16().hash(&mut hasher);
        self.class.hash(&mut hasher);
        hasher.finish()
    }

    /// Identifies the record's full content: name, type, class and rdata.
    /// Two records with the same `hash()` are interchangeable for caching
    /// purposes.
    pub fn hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.namehash().hash(&mut hasher);
        if let Ok(bytes) = self.data.canonical_bytes() {
            bytes.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn read(buffer: &mut PacketBuffer) -> Result<Record, ReaderError> {
        let name = buffer.read_qname()?;
        let rtype = RecordType::from_u16(buffer.read_u16()?);
        let raw_class = buffer.read_u16()?;
        let class = raw_class & !CACHE_FLUSH_BIT;
        let flush = raw_class & CACHE_FLUSH_BIT != 0;
        let ttl = buffer.read_u32()?;
        let rdlen = buffer.read_u16()? as usize;
        let rdata_end = buffer.pos() + rdlen;

        let data = match rtype {
            RecordType::A => {
                let raw = buffer.read_u32()?;
                RecordData::A(Ipv4Addr::new(
                    (raw >> 24) as u8,
                    (raw >> 16) as u8,
                    (raw >> 8) as u8,
                    raw as u8,
                ))
            }
            RecordType::Aaaa => {
                let a = buffer.read_u32()?;
                let b = buffer.read_u32()?;
                let c = buffer.read_u32()?;
                let d = buffer.read_u32()?;
                RecordData::Aaaa(Ipv6Addr::new(
                    (a >> 16) as u16,
                    a as u16,
                    (b >> 16) as u16,
                    b as u16,
                    (c >> 16) as u16,
                    c as u16,
                    (d >> 16) as u16,
                    d as u16,
                ))
            }
            RecordType::Ptr => RecordData::Ptr(buffer.read_qname()?),
            RecordType::Srv => {
                let priority = buffer.read_u16()?;
                let weight = buffer.read_u16()?;
                let port = buffer.read_u16()?;
                let target = buffer.read_qname()?;
                RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            RecordType::Txt => {
                let mut entries = Vec::new();
                while buffer.pos() < rdata_end {
                    let len = buffer.read()? as usize;
                    let bytes = buffer.read_bytes(len)?;
                    entries.push(TxtEntry::parse(&bytes));
                }
                RecordData::Txt(entries)
            }
            RecordType::Nsec => {
                let next_domain = buffer.read_qname()?;
                let types = read_nsec_bitmap(buffer, rdata_end)?;
                RecordData::Nsec { next_domain, types }
            }
            RecordType::Any | RecordType::Unknown(_) => {
                let rdata = buffer.read_bytes(rdlen)?;
                RecordData::Unknown {
                    rtype: rtype.into_u16(),
                    rdata,
                }
            }
        };

        Ok(Record {
            name,
            class,
            flush,
            ttl,
            data,
            companions: Vec::new(),
        })
    }

    pub fn write(&self, buffer: &mut PacketBuffer) -> Result<(), WriterError> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.record_type().into_u16())?;
        let raw_class = self.class | if self.flush { CACHE_FLUSH_BIT } else { 0 };
        buffer.write_u16(raw_class)?;
        buffer.write_u32(self.ttl)?;

        buffer.write_length_prefixed(|b| match &self.data {
            RecordData::A(addr) => b.write_raw(&addr.octets()),
            RecordData::Aaaa(addr) => b.write_raw(&addr.octets()),
            RecordData::Ptr(name) => b.write_qname(name),
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                b.write_u16(*priority)?;
                b.write_u16(*weight)?;
                b.write_u16(*port)?;
                b.write_qname(target)
            }
            RecordData::Txt(entries) => {
                if entries.is_empty() {
                    return b.write_u8(0);
                }
                for entry in entries {
                    let bytes = entry.encode();
                    b.write_u8(bytes.len() as u8)?;
                    b.write_raw(&bytes)?;
                }
                Ok(())
            }
            RecordData::Nsec { next_domain, types } => {
                b.write_qname(next_domain)?;
                write_nsec_bitmap(b, types)
            }
            RecordData::Unknown { rdata, .. } => b.write_raw(rdata),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_a_record() {
        use similar_asserts::assert_eq;

        let record = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(1, 2, 3, 4)));
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.flush);
    }

    #[test]
    fn should_round_trip_ptr_record_without_flush() {
        let record = Record::new("_http._tcp.local", 4500, RecordData::Ptr("a._http._tcp.local".into()));
        assert!(!record.flush);
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn should_round_trip_srv_record() {
        let record = Record::new(
            "a._http._tcp.local",
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 8080,
                target: "host.local".into(),
            },
        );
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn should_round_trip_txt_entries() {
        let entries = vec![
            TxtEntry {
                key: "path".into(),
                value: TxtValue::Text("/".into()),
            },
            TxtEntry {
                key: "secure".into(),
                value: TxtValue::Flag,
            },
            TxtEntry {
                key: String::new(),
                value: TxtValue::Empty,
            },
        ];
        let record = Record::new("a._http._tcp.local", 4500, RecordData::Txt(entries.clone()));
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        match parsed.data {
            RecordData::Txt(parsed_entries) => assert_eq!(parsed_entries, entries),
            _ => panic!("expected txt"),
        }
    }

    #[test]
    fn should_round_trip_nsec_bitmap() {
        let record = Record::new(
            "host.local",
            4500,
            RecordData::Nsec {
                next_domain: "host.local".into(),
                types: vec![RecordType::A, RecordType::Nsec],
            },
        );
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        match parsed.data {
            RecordData::Nsec { types, .. } => {
                assert!(types.contains(&RecordType::A));
                assert!(types.contains(&RecordType::Nsec));
                assert!(!types.contains(&RecordType::Aaaa));
            }
            _ => panic!("expected nsec"),
        }
    }

    #[test]
    fn should_preserve_unknown_rdata_byte_exact() {
        let record = Record::new(
            "host.local",
            120,
            RecordData::Unknown {
                rtype: 999,
                rdata: vec![1, 2, 3, 4, 5],
            },
        );
        let mut buffer = PacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Record::read(&mut buffer).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn hash_ignores_ttl_but_namehash_ignores_rdata() {
        let a = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        let b = Record::new("host.local", 4500, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        let c = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(2, 2, 2, 2)));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.namehash(), c.namehash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn name_comparison_is_case_insensitive() {
        let a = Record::new("Host.Local", 120, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        let b = Record::new("host.local", 120, RecordData::A(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(a, b);
        assert_eq!(a.namehash(), b.namehash());
    }
}
