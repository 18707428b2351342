use super::RecordType;
use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::PacketBuffer;

/// Top bit of the qclass field: "unicast preferred" (RFC 6762 §5.4).
const QU_BIT: u16 = 0x8000;

/// A single question in the question section of a packet.
///
/// `qu` records whether the top bit of qclass was set: true asks peers to
/// prefer a unicast reply, false (QM) is the default multicast question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: u16,
    pub qu: bool,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: 1,
            qu: false,
        }
    }

    pub fn with_qu(mut self, qu: bool) -> Self {
        self.qu = qu;
        self
    }

    pub fn read(buffer: &mut PacketBuffer) -> Result<Self, ReaderError> {
        let name = buffer.read_qname()?;
        let qtype = RecordType::from_u16(buffer.read_u16()?);
        let raw_class = buffer.read_u16()?;

        Ok(Self {
            name,
            qtype,
            qclass: raw_class & !QU_BIT,
            qu: raw_class & QU_BIT != 0,
        })
    }

    pub fn write(&self, buffer: &mut PacketBuffer) -> Result<(), WriterError> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.into_u16())?;
        let raw_class = self.qclass | if self.qu { QU_BIT } else { 0 };
        buffer.write_u16(raw_class)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_question() {
        let question = Question::new("_test._tcp.local", RecordType::Ptr).with_qu(true);
        let mut buffer = PacketBuffer::default();
        question.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Question::read(&mut buffer).unwrap();
        assert_eq!(parsed, question);
    }

    #[test]
    fn should_default_to_qm() {
        let question = Question::new("host.local", RecordType::A);
        let mut buffer = PacketBuffer::default();
        question.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Question::read(&mut buffer).unwrap();
        assert!(!parsed.qu);
    }
}
