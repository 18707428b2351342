use std::net::Ipv4Addr;

use criterion::{criterion_group, criterion_main, Criterion};
use mdns_proto::packet::{Packet, Question, Record, RecordData, RecordType};

fn sample_response() -> Packet {
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
    packet
}

fn bench_encode(c: &mut Criterion) {
    let packet = sample_response();
    c.bench_function("encode response", |b| {
        b.iter(|| packet.encode().unwrap())
    });
}

fn bench_parse(c: &mut Criterion) {
    let bytes = sample_response().encode().unwrap();
    c.bench_function("parse response", |b| {
        b.iter(|| Packet::parse(&bytes).unwrap())
    });
}

fn bench_parse_query(c: &mut Criterion) {
    let mut packet = Packet::query(1);
    packet
        .questions
        .push(Question::new("_http._tcp.local", RecordType::Ptr));
    let bytes = packet.encode().unwrap();
    c.bench_function("parse query", |b| {
        b.iter(|| Packet::parse(&bytes).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_parse, bench_parse_query);
criterion_main!(benches);
