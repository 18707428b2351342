pub mod buffer;
pub mod packet;

pub use packet::{Packet, Record, RecordData, RecordType, TxtEntry, TxtValue};

#[cfg(test)]
mod tests {
    use crate::packet::{Packet, Question, Record, RecordData, RecordType};
    use std::net::Ipv4Addr;

    #[test]
    fn should_round_trip_a_multi_question_query() {
        let mut packet = Packet::query(1234);
        packet
            .questions
            .push(Question::new("_http._tcp.local", RecordType::Ptr));
        packet
            .questions
            .push(Question::new("host.local", RecordType::A).with_qu(true));

        let bytes = packet.encode().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();

        assert_eq!(parsed.header.id, 1234);
        assert_eq!(parsed.questions.len(), 2);
        assert!(parsed.questions[1].qu);
        assert!(parsed.is_query());
        assert!(parsed.is_valid());
    }

    #[test]
    fn should_round_trip_an_announcement_response() {
        let mut packet = Packet::response();
        packet.answers.push(Record::new(
            "host.local",
            120,
            RecordData::A(Ipv4Addr::new(192, 168, 1, 42)),
        ));
        packet.answers.push(Record::new(
            "_http._tcp.local",
            4500,
            RecordData::Ptr("a._http._tcp.local".into()),
        ));
        packet.answers.push(Record::new(
            "a._http._tcp.local",
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 8080,
                target: "host.local".into(),
            },
        ));

        let bytes = packet.encode().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();

        assert_eq!(parsed.answers.len(), 3);
        assert!(parsed.is_answer());
        assert!(parsed.header.authoritative);
        assert!(parsed.is_valid());
    }

    #[test]
    fn invalid_opcode_fails_is_valid() {
        let mut packet = Packet::query(1);
        packet.header.opcode = 3;
        let bytes = packet.encode().unwrap();
        let parsed = Packet::parse(&bytes).unwrap();
        assert!(!parsed.is_valid());
    }
}
