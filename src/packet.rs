//! Frostbite rcon wire format.
//!
//! ```text
//! [header:4][total_size:4][num_words:4] then per word [len:4][bytes:len][0x00]
//! ```
//! All integers are little-endian `u32`. The header packs the origin flag
//! (bit 31), the response flag (bit 30) and a 30-bit sequence number.
use log::error;

use crate::error::{RconError, Result};

const FROM_SERVER_BIT: u32 = 0x8000_0000;
const RESPONSE_BIT: u32 = 0x4000_0000;

/// Sequence numbers live in the low 30 bits of the header.
pub const SEQUENCE_MASK: u32 = 0x3fff_ffff;

/// Header, total size and word count.
pub const PREFIX_SIZE: usize = 12;

/// Per-word overhead: the length field and the NUL terminator.
const WORD_OVERHEAD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub from_server: bool,
    pub is_response: bool,
    pub sequence: u32,
}

impl Header {
    /// Sequence values wider than 30 bits are silently truncated.
    pub fn new(from_server: bool, is_response: bool, sequence: u32) -> Self {
        Header {
            from_server,
            is_response,
            sequence: sequence & SEQUENCE_MASK,
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let mut header = self.sequence & SEQUENCE_MASK;
        if self.from_server {
            header |= FROM_SERVER_BIT;
        }
        if self.is_response {
            header |= RESPONSE_BIT;
        }
        header.to_le_bytes()
    }

    pub fn decode(bytes: [u8; 4]) -> Self {
        let header = u32::from_le_bytes(bytes);
        Header {
            from_server: header & FROM_SERVER_BIT != 0,
            is_response: header & RESPONSE_BIT != 0,
            sequence: header & SEQUENCE_MASK,
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let field = bytes
        .get(offset..offset + 4)
        .ok_or(RconError::Truncated {
            needed: offset + 4,
            available: bytes.len(),
        })?;
    // the slice is exactly four bytes long
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// Encodes the word section. Returns its byte size alongside the bytes so the
/// caller can compute the packet's total size.
pub fn encode_words<S: AsRef<str>>(words: &[S]) -> (usize, Vec<u8>) {
    let size: usize = words
        .iter()
        .map(|word| word.as_ref().len() + WORD_OVERHEAD)
        .sum();

    let mut section = Vec::with_capacity(size);
    for word in words {
        let word = word.as_ref().as_bytes();
        section.extend_from_slice(&(word.len() as u32).to_le_bytes());
        section.extend_from_slice(word);
        section.push(0);
    }
    (size, section)
}

/// Walks `section_size` bytes of `bytes` as length-prefixed, NUL-terminated
/// words. Word content is decoded as UTF-8, replacing invalid sequences.
pub fn decode_words(section_size: usize, bytes: &[u8]) -> Result<Vec<String>> {
    let section = bytes.get(..section_size).ok_or(RconError::Truncated {
        needed: section_size,
        available: bytes.len(),
    })?;

    let mut words = Vec::new();
    let mut offset = 0;
    while offset < section_size {
        let len = read_u32(section, offset)? as usize;
        let start = offset + 4;
        let end = start
            .checked_add(len)
            .filter(|&end| end < section_size)
            .ok_or_else(|| {
                RconError::malformed(format!(
                    "word of {} bytes at offset {} overruns a {} byte section",
                    len, offset, section_size
                ))
            })?;

        words.push(String::from_utf8_lossy(&section[start..end]).into_owned());
        // skip the terminator
        offset = end + 1;
    }
    Ok(words)
}

/// Reads the declared total size. `None` until the size field has arrived.
pub fn declared_size(buf: &[u8]) -> Option<usize> {
    read_u32(buf, 4).ok().map(|size| size as usize)
}

pub fn contains_complete_packet(buf: &[u8]) -> bool {
    match declared_size(buf) {
        Some(size) => buf.len() >= size,
        None => false,
    }
}

/// One rcon packet: a request (client command or server event) or a
/// response to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    words: Vec<String>,
}

impl Packet {
    pub fn new(from_server: bool, is_response: bool, sequence: u32, words: Vec<String>) -> Self {
        Packet {
            header: Header::new(from_server, is_response, sequence),
            words,
        }
    }

    /// A command issued by this client.
    pub fn request(sequence: u32, words: Vec<String>) -> Self {
        Packet::new(false, false, sequence, words)
    }

    /// The acknowledgment sent back for a server event. It echoes the
    /// event's sequence and is always flagged as a server-originated
    /// response.
    pub fn acknowledgment(sequence: u32) -> Self {
        Packet::new(true, true, sequence, vec![String::from("OK")])
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn from_server(&self) -> bool {
        self.header.from_server
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn into_words(self) -> Vec<String> {
        self.words
    }

    pub fn pack(&self) -> Vec<u8> {
        let (words_size, words) = encode_words(&self.words);
        let total_size = (PREFIX_SIZE + words_size) as u32;

        let mut payload = Vec::with_capacity(PREFIX_SIZE + words_size);
        payload.extend_from_slice(&self.header.encode());
        payload.extend_from_slice(&total_size.to_le_bytes());
        payload.extend_from_slice(&(self.words.len() as u32).to_le_bytes());
        payload.extend_from_slice(&words);
        payload
    }

    /// Decodes exactly one packet from the front of `bytes`. Bytes past the
    /// declared total size are ignored.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREFIX_SIZE {
            return Err(RconError::Truncated {
                needed: PREFIX_SIZE,
                available: bytes.len(),
            });
        }

        let header = Header::decode([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let total_size = read_u32(bytes, 4)? as usize;
        let num_words = read_u32(bytes, 8)? as usize;

        if total_size < PREFIX_SIZE {
            return Err(RconError::malformed(format!(
                "declared size {} is smaller than the {} byte prefix",
                total_size, PREFIX_SIZE
            )));
        }
        if bytes.len() < total_size {
            return Err(RconError::Truncated {
                needed: total_size,
                available: bytes.len(),
            });
        }

        let words = decode_words(total_size - PREFIX_SIZE, &bytes[PREFIX_SIZE..])?;
        if words.len() != num_words {
            return Err(RconError::malformed(format!(
                "header announces {} words, section holds {}",
                num_words,
                words.len()
            )));
        }

        Ok(Packet { header, words })
    }
}

/// Receive buffer. Bytes go in as they arrive from the socket; whole packets
/// come out, split exactly at their declared size.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buf: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        PacketBuffer {
            buf: Vec::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn has_complete_packet(&self) -> bool {
        contains_complete_packet(&self.buf)
    }

    /// Takes the next complete packet off the front of the buffer, or
    /// returns `Ok(None)` while it is still incomplete. A decode error leaves
    /// the stream unrecoverable; the raw bytes are logged.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let size = match declared_size(&self.buf) {
            Some(size) if self.buf.len() >= size => size,
            _ => return Ok(None),
        };

        if size < PREFIX_SIZE {
            let prefix = &self.buf[..PREFIX_SIZE.min(self.buf.len())];
            error!("undecodable packet prefix: {:02x?}", prefix);
            return Err(RconError::malformed(format!(
                "declared size {} is smaller than the {} byte prefix",
                size, PREFIX_SIZE
            )));
        }

        let raw: Vec<u8> = self.buf.drain(..size).collect();
        Packet::unpack(&raw).map(Some).map_err(|err| {
            error!("cannot decode packet ({}): {:02x?}", err, raw);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn header_bits() {
        assert_eq!(Header::new(true, false, 0).encode(), [0, 0, 0, 0x80]);
        assert_eq!(Header::new(false, true, 0).encode(), [0, 0, 0, 0x40]);
        assert_eq!(Header::new(false, false, 7).encode(), [7, 0, 0, 0]);
    }

    #[test]
    fn header_truncates_wide_sequence() {
        let header = Header::new(false, false, 0xffff_ffff);
        assert_eq!(header.sequence, SEQUENCE_MASK);
        assert_eq!(Header::decode(header.encode()), Header::new(false, false, SEQUENCE_MASK));
    }

    #[test]
    fn packs_known_layout() {
        let packet = Packet::request(1, words(&["serverInfo"]));
        let bytes = packet.pack();

        let mut expected = vec![1, 0, 0, 0, 27, 0, 0, 0, 1, 0, 0, 0, 10, 0, 0, 0];
        expected.extend_from_slice(b"serverInfo");
        expected.push(0);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn acknowledgment_layout() {
        let ack = Packet::acknowledgment(7);
        assert!(ack.from_server());
        assert!(ack.is_response());
        assert_eq!(ack.sequence(), 7);
        assert_eq!(ack.words(), ["OK"]);
        assert_eq!(&ack.pack()[..4], &[7, 0, 0, 0xc0]);
    }

    #[test]
    fn empty_word_list() {
        let bytes = Packet::request(3, Vec::new()).pack();
        assert_eq!(bytes.len(), PREFIX_SIZE);
        assert_eq!(Packet::unpack(&bytes).unwrap().words().len(), 0);
    }

    #[test]
    fn complete_packet_needs_size_field() {
        assert!(!contains_complete_packet(&[]));
        assert!(!contains_complete_packet(&[0; 7]));
        // size field says 12, only 8 bytes present
        assert!(!contains_complete_packet(&[0, 0, 0, 0, 12, 0, 0, 0]));
    }

    #[test]
    fn rejects_overrunning_word_length() {
        let mut bytes = Packet::request(0, words(&["abc"])).pack();
        // claim the word is 200 bytes long
        bytes[12] = 200;
        let err = Packet::unpack(&bytes).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn rejects_word_count_mismatch() {
        let mut bytes = Packet::request(0, words(&["a", "b"])).pack();
        bytes[8] = 3;
        assert!(matches!(
            Packet::unpack(&bytes),
            Err(RconError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn rejects_size_below_prefix() {
        let mut buffer = PacketBuffer::new();
        buffer.extend(&[0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0]);
        assert!(buffer.next_packet().unwrap_err().is_decode_error());
    }

    #[test]
    fn decode_words_rejects_short_buffer() {
        let (size, section) = encode_words(&["hello"]);
        assert!(decode_words(size, &section[..size - 2]).is_err());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let section = [2, 0, 0, 0, 0xff, b'a', 0];
        let decoded = decode_words(section.len(), &section).unwrap();
        assert_eq!(decoded, ["\u{fffd}a"]);
    }

    #[test]
    fn buffer_splits_back_to_back_packets() {
        let first = Packet::request(0, words(&["version"]));
        let second = Packet::new(true, true, 0, words(&["OK", "BF3", "1149"]));

        let mut buffer = PacketBuffer::new();
        let mut bytes = first.pack();
        bytes.extend(second.pack());
        buffer.extend(&bytes);

        assert_eq!(buffer.next_packet().unwrap(), Some(first));
        assert_eq!(buffer.next_packet().unwrap(), Some(second));
        assert_eq!(buffer.next_packet().unwrap(), None);
        assert!(buffer.is_empty());
    }

    fn word_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[^\u{0}]{0,24}", 0..8)
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(
            from_server: bool,
            is_response: bool,
            sequence in 0..=SEQUENCE_MASK,
        ) {
            let header = Header::new(from_server, is_response, sequence);
            prop_assert_eq!(Header::decode(header.encode()), header);
        }

        #[test]
        fn prop_words_roundtrip(list in word_list()) {
            let (size, section) = encode_words(&list);
            prop_assert_eq!(size, section.len());
            prop_assert_eq!(decode_words(size, &section).unwrap(), list);
        }

        #[test]
        fn prop_packet_roundtrip(
            from_server: bool,
            is_response: bool,
            sequence in 0..=SEQUENCE_MASK,
            list in word_list(),
        ) {
            let packet = Packet::new(from_server, is_response, sequence, list);
            prop_assert_eq!(Packet::unpack(&packet.pack()).unwrap(), packet);
        }

        #[test]
        fn prop_fragmented_delivery(sequence in 0..=SEQUENCE_MASK, list in word_list()) {
            let packet = Packet::new(true, true, sequence, list);
            let bytes = packet.pack();

            for split in 0..=bytes.len() {
                let mut buffer = PacketBuffer::new();
                buffer.extend(&bytes[..split]);
                prop_assert_eq!(buffer.has_complete_packet(), split == bytes.len());

                buffer.extend(&bytes[split..]);
                prop_assert!(buffer.has_complete_packet());
                prop_assert_eq!(buffer.next_packet().unwrap(), Some(packet.clone()));
            }
        }
    }
}
