pub mod header;
pub mod question;
pub mod record;

use std::net::SocketAddr;

use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::PacketBuffer;

pub use header::Header;
pub use question::Question;
pub use record::{Record, RecordData, TxtEntry, TxtValue};

/// mDNS port; queries/probes/responses from any other port are "legacy"
/// (RFC 6762 §6.7).
pub const MDNS_PORT: u16 = 5353;

/// RR/QTYPE values this engine understands on the wire. Everything else is
/// preserved as opaque rdata ([`RecordData::Unknown`]) and written back
/// byte-exact, per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    A,     // 1
    Ptr,   // 12
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Nsec,  // 47
    Any,   // 255, only meaningful as a qtype
    Unknown(u16),
}

impl RecordType {
    pub fn into_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ptr => 12,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Nsec => 47,
            Self::Any => 255,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::A,
            12 => Self::Ptr,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            47 => Self::Nsec,
            255 => Self::Any,
            other => Self::Unknown(other),
        }
    }

    /// A, AAAA, SRV, TXT and NSEC are "unique" record types: at most one
    /// authoritative owner may publish a given name for them. PTR (and
    /// anything unrecognized) is shared.
    pub fn is_unique(self) -> bool {
        matches!(self, Self::A | Self::Aaaa | Self::Srv | Self::Txt | Self::Nsec)
    }
}

/// A parsed mDNS message together with the address it arrived from (or will
/// be sent to).
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    /// The wire "additional" section — distinct from a [`Record`]'s own
    /// `companions`, which are the records the network interface ships
    /// alongside a given answer.
    pub additional: Vec<Record>,
    pub origin: Option<SocketAddr>,
}

impl Packet {
    pub fn query(id: u16) -> Self {
        Self {
            header: Header::query(id),
            ..Default::default()
        }
    }

    pub fn response() -> Self {
        Self {
            header: Header::response(0),
            ..Default::default()
        }
    }

    pub fn with_origin(mut self, origin: SocketAddr) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut buffer = PacketBuffer::new(bytes.to_vec());
        let header = Header::read(&mut buffer)?;

        let mut questions = Vec::with_capacity(header.questions as usize);
        for _ in 0..header.questions {
            questions.push(Question::read(&mut buffer)?);
        }

        let mut answers = Vec::with_capacity(header.answers as usize);
        for _ in 0..header.answers {
            answers.push(Record::read(&mut buffer)?);
        }

        let mut authorities = Vec::with_capacity(header.authorities as usize);
        for _ in 0..header.authorities {
            authorities.push(Record::read(&mut buffer)?);
        }

        let mut additional = Vec::with_capacity(header.additionals as usize);
        for _ in 0..header.additionals {
            additional.push(Record::read(&mut buffer)?);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            additional,
            origin: None,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, WriterError> {
        let mut buffer = PacketBuffer::default();
        let mut header = self.header.clone();
        header.questions = self.questions.len() as u16;
        header.answers = self.answers.len() as u16;
        header.authorities = self.authorities.len() as u16;
        header.additionals = self.additional.len() as u16;

        header.write(&mut buffer)?;
        for question in &self.questions {
            question.write(&mut buffer)?;
        }
        for rec in &self.answers {
            rec.write(&mut buffer)?;
        }
        for rec in &self.authorities {
            rec.write(&mut buffer)?;
        }
        for rec in &self.additional {
            rec.write(&mut buffer)?;
        }

        Ok(buffer.buf)
    }

    /// QR=0 and no authorities: a plain question.
    pub fn is_query(&self) -> bool {
        !self.header.response && self.authorities.is_empty()
    }

    /// QR=0 with authorities present: a probe (RFC 6762 §8.1).
    pub fn is_probe(&self) -> bool {
        !self.header.response && !self.authorities.is_empty()
    }

    pub fn is_answer(&self) -> bool {
        self.header.response
    }

    /// Opcode and rcode are both zero, and a response carries AA=1.
    pub fn is_valid(&self) -> bool {
        self.header.is_valid()
    }

    /// A query/response from a port other than 5353 is "legacy" — typically
    /// a one-shot resolver using an ephemeral source port per RFC 6762 §6.7.
    pub fn is_legacy(&self) -> bool {
        self.origin.map(|o| o.port() != MDNS_PORT).unwrap_or(false)
    }

    pub fn is_local(&self, local_addresses: &[std::net::IpAddr]) -> bool {
        match self.origin {
            Some(origin) => local_addresses.contains(&origin.ip()),
            None => false,
        }
    }

    /// Splits an oversized packet for EMSGSIZE retry (§4.1). Query packets
    /// mark TC on the first half and keep questions there; response packets
    /// distribute answers evenly and rebuild `additional` per half from the
    /// surviving answers' own companions. Any other packet kind yields two
    /// empty packets — the caller decides what, if anything, to do with that.
    pub fn split(&self) -> (Packet, Packet) {
        if self.is_query() {
            self.split_query()
        } else if self.is_answer() {
            self.split_response()
        } else {
            (Packet::default(), Packet::default())
        }
    }

    fn split_query(&self) -> (Packet, Packet) {
        let mid = self.answers.len() / 2;
        let (first_answers, second_answers) = self.answers.split_at(mid);

        let mut first = Packet {
            header: self.header.clone(),
            questions: self.questions.clone(),
            answers: first_answers.to_vec(),
            ..Default::default()
        };
        first.header.truncated = true;

        let second = Packet {
            header: self.header.clone(),
            answers: second_answers.to_vec(),
            ..Default::default()
        };

        (first, second)
    }

    fn split_response(&self) -> (Packet, Packet) {
        let mid = self.answers.len() / 2;
        let (first_answers, second_answers) = self.answers.split_at(mid);

        let companions_of = |answers: &[Record]| -> Vec<Record> {
            answers
                .iter()
                .flat_map(|a| a.companions.iter().cloned())
                .filter(|c| !answers.contains(c))
                .collect()
        };

        let first = Packet {
            header: self.header.clone(),
            answers: first_answers.to_vec(),
            additional: companions_of(first_answers),
            ..Default::default()
        };
        let second = Packet {
            header: self.header.clone(),
            answers: second_answers.to_vec(),
            additional: companions_of(second_answers),
            ..Default::default()
        };

        (first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn a_record(name: &str, ttl: u32) -> Record {
        Record::new(name, ttl, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[test]
    fn should_round_trip_query_packet() {
        let mut packet = Packet::query(99);
        packet
            .questions
            .push(Question::new("_test._tcp.local", RecordType::Ptr));
        let bytes = packet.encode().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.header.id, 99);
        assert!(parsed.is_query());
        assert_eq!(parsed.questions.len(), 1);
    }

    #[test]
    fn should_round_trip_response_packet_with_compression() {
        let mut packet = Packet::response();
        packet.answers.push(a_record("host.local", 120));
        packet
            .answers
            .push(Record::new("other.local", 120, RecordData::Ptr("host.local".into())));
        let bytes = packet.encode().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert!(parsed.is_answer());
        // compression must shrink the second name's encoding relative to the first
        assert!(bytes.len() < 2 * "host.local".len() + 40);
    }

    #[test]
    fn split_query_puts_tc_and_questions_on_first_half() {
        let mut packet = Packet::query(1);
        packet.questions.push(Question::new("a.local", RecordType::A));
        packet.answers.push(a_record("a.local", 10));
        packet.answers.push(a_record("b.local", 10));
        let (first, second) = packet.split();
        assert!(first.header.truncated);
        assert_eq!(first.questions.len(), 1);
        assert!(second.questions.is_empty());
        assert_eq!(first.answers.len() + second.answers.len(), 2);
    }

    #[test]
    fn split_other_kind_yields_empty_packets() {
        let mut packet = Packet::query(1);
        packet.authorities.push(a_record("a.local", 10));
        let (first, second) = packet.split();
        assert!(first.answers.is_empty() && first.questions.is_empty());
        assert!(second.answers.is_empty() && second.questions.is_empty());
    }
}
