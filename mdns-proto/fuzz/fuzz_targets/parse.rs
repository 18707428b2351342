#![no_main]

use mdns_proto::Packet;

libfuzzer_sys::fuzz_target!(|data: &[u8]| {
    let _ = Packet::parse(data);
});
