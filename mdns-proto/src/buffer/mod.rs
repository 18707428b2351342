pub mod reader;
pub mod writer;

use std::collections::HashMap;

/// A growable byte buffer with a cursor, used both for parsing incoming
/// datagrams and for assembling outgoing packets.
///
/// Unlike a classic DNS message capped at 512 bytes without EDNS0, mDNS
/// responses routinely carry many SRV/TXT/A/AAAA records for a single
/// service and can exceed that, so the buffer grows on write instead of
/// being backed by a fixed array.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    pub buf: Vec<u8>,
    pub pos: usize,
    /// name -> position, used to reuse a previously written label suffix
    /// (first-match wins compression, RFC 1035 §4.1.4).
    writing_labels: HashMap<String, usize>,
    /// position -> name, memoizes labels already decompressed while reading
    /// so repeated pointers to the same offset are cheap.
    reading_labels: HashMap<usize, String>,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        PacketBuffer {
            buf: Vec::with_capacity(256),
            pos: 0,
            writing_labels: HashMap::new(),
            reading_labels: HashMap::new(),
        }
    }
}

impl PacketBuffer {
    pub fn new(buf: Vec<u8>) -> Self {
        PacketBuffer {
            buf,
            pos: 0,
            writing_labels: HashMap::new(),
            reading_labels: HashMap::new(),
        }
    }

    /// Current position within the buffer.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}
