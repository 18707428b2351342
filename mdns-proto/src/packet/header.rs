use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::PacketBuffer;

/// The 12-byte DNS message header (RFC 1035 §4.1.1).
///
/// mDNS (RFC 6762 §18) repurposes or retires several of the classic bits:
/// RD, RA, Z, AD and CD carry no meaning on the wire here and MUST be written
/// as zero; this type does not even store them, it only accepts and discards
/// them on read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    /// QR: false for queries/probes, true for responses.
    pub response: bool,
    /// OPCODE: always 0 (standard query) on mDNS; preserved for `isValid`.
    pub opcode: u8,
    /// AA: authoritative answer. Always set on mDNS responses (RFC 6762 §18.4).
    pub authoritative: bool,
    /// TC: truncated, more known-answers follow in a subsequent packet.
    pub truncated: bool,
    /// RCODE: always 0 on mDNS; preserved for `isValid`.
    pub rcode: u8,
    pub questions: u16,
    pub answers: u16,
    pub authorities: u16,
    pub additionals: u16,
}

impl Header {
    pub fn query(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn response(id: u16) -> Self {
        Self {
            id,
            response: true,
            authoritative: true,
            ..Default::default()
        }
    }

    /// RFC 1035 §4.1.1: OPCODE and RCODE must both be zero for an mDNS message
    /// to be considered valid, and a response must carry AA=1.
    pub fn is_valid(&self) -> bool {
        if self.opcode != 0 || self.rcode != 0 {
            return false;
        }
        if self.response && !self.authoritative {
            return false;
        }
        true
    }

    pub fn read(buffer: &mut PacketBuffer) -> Result<Self, ReaderError> {
        let id = buffer.read_u16()?;

        let head = buffer.read()?;
        let tail = buffer.read()?;

        let response = (head & (1 << 7)) > 0;
        let opcode = (head >> 3) & 0x0F;
        let truncated = (head & (1 << 1)) > 0;
        let authoritative = (head & (1 << 2)) > 0;
        // RD (bit 0) ignored on read.
        let _recursion_desired = (head & 1) > 0;

        let rcode = tail & 0x0F;
        // Z/AD/CD/RA (bits 4-7 of the second octet) carry no meaning here.
        let _ra = (tail & (1 << 7)) > 0;

        let questions = buffer.read_u16()?;
        let answers = buffer.read_u16()?;
        let authorities = buffer.read_u16()?;
        let additionals = buffer.read_u16()?;

        Ok(Self {
            id,
            response,
            opcode,
            authoritative,
            truncated,
            rcode,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn write(&self, buffer: &mut PacketBuffer) -> Result<(), WriterError> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            ((self.response as u8) << 7)
                | (self.opcode << 3)
                | ((self.authoritative as u8) << 2)
                | ((self.truncated as u8) << 1),
        )?;
        // Second octet: RCODE only, RA/Z/AD/CD forced to zero.
        buffer.write_u8(self.rcode & 0x0F)?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authorities)?;
        buffer.write_u16(self.additionals)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Header;
    use crate::buffer::PacketBuffer;

    #[test]
    fn should_round_trip_query_header() {
        let header = Header::query(42);
        let mut buffer = PacketBuffer::default();
        header.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Header::read(&mut buffer).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn should_round_trip_response_header() {
        let mut header = Header::response(7);
        header.truncated = true;
        header.answers = 3;
        let mut buffer = PacketBuffer::default();
        header.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let parsed = Header::read(&mut buffer).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn should_ignore_rd_ra_z_ad_cd_bits() {
        let header = Header::query(1);
        let mut buffer = PacketBuffer::default();
        header.write(&mut buffer).unwrap();
        // Flip RD, RA, Z, AD, CD which must not change parsed semantics.
        buffer.buf[2] |= 1;
        buffer.buf[3] |= 0xF0;
        buffer.pos = 0;
        let parsed = Header::read(&mut buffer).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn is_valid_requires_aa_on_responses() {
        let mut header = Header::response(1);
        header.authoritative = false;
        assert!(!header.is_valid());
    }
}
