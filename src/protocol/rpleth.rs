//! Rpleth wire protocol framing.
//!
//! A packet on the wire is `[sensor][command][length][payload...][checksum]`
//! where the checksum is the XOR of every preceding byte. Decoding is
//! resumable: bytes are appended to a bounded ring buffer as they arrive,
//! and [`decode`] consumes exactly one classifiable packet per call. An
//! incomplete packet consumes nothing; the bytes stay buffered for the next
//! receive. A complete packet with a bad checksum is consumed but flagged
//! with `is_good = false`, so the stream stays in sync.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::error::{CoreError, CoreResult};

/// Sensor byte, command byte and length byte precede the payload.
const HEADER_LEN: usize = 3;

/// Default receive buffer size per connection.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

/// Addressed subsystem of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorType {
    /// The gateway itself.
    Rpleth = 0x00,
    /// The badge reader behind the gateway.
    Hid = 0x01,
    /// An attached display.
    Lcd = 0x02,
}

impl SensorType {
    /// Maps a wire byte back to a sensor type.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(SensorType::Rpleth),
            0x01 => Some(SensorType::Hid),
            0x02 => Some(SensorType::Lcd),
            _ => None,
        }
    }
}

/// Commands addressed to the reader subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HidCommand {
    /// Sound the buzzer.
    Beep = 0x00,
    /// Drive the green LED.
    Greenled = 0x01,
    /// A badge number, pushed by the gateway when a card is read.
    Badge = 0x02,
    /// Request the card serial number of the next presented card.
    GetCsn = 0x03,
    /// Batch of stored card reads.
    SendCards = 0x04,
}

impl HidCommand {
    /// Maps a wire byte back to a reader command.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(HidCommand::Beep),
            0x01 => Some(HidCommand::Greenled),
            0x02 => Some(HidCommand::Badge),
            0x03 => Some(HidCommand::GetCsn),
            0x04 => Some(HidCommand::SendCards),
            _ => None,
        }
    }
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RplethPacket {
    /// Sensor byte as received.
    pub sensor: u8,
    /// Command byte as received.
    pub command: u8,
    /// Payload bytes; the declared length always matches `payload.len()`.
    pub payload: Vec<u8>,
    /// False when the trailing checksum did not match.
    pub is_good: bool,
}

/// XOR fold over header and payload, the trailing byte on the wire.
pub fn checksum(sensor: u8, command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(sensor ^ command ^ payload.len() as u8, |acc, byte| {
            acc ^ byte
        })
}

/// Encodes one packet. Payloads longer than 255 bytes do not fit the
/// single-byte length field.
pub fn encode(sensor: SensorType, command: u8, payload: &[u8]) -> CoreResult<Vec<u8>> {
    encode_raw(sensor as u8, command, payload)
}

/// [`encode`] for raw sensor bytes, used when echoing a received packet
/// whose sensor byte is outside the known set.
pub fn encode_raw(sensor: u8, command: u8, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let length = u8::try_from(payload.len()).map_err(|_| {
        CoreError::ProtocolViolation(format!(
            "rpleth payload of {} bytes exceeds the 255-byte limit",
            payload.len()
        ))
    })?;
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    wire.push(sensor);
    wire.push(command);
    wire.push(length);
    wire.extend_from_slice(payload);
    wire.push(checksum(sensor, command, payload));
    Ok(wire)
}

/// Bounded receive buffer feeding the resumable decoder.
pub struct ReadBuffer {
    producer: HeapProd<u8>,
    consumer: HeapCons<u8>,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl ReadBuffer {
    /// Creates a buffer holding at most `capacity` undecoded bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::new(capacity).split();
        Self { producer, consumer }
    }

    /// Appends received bytes. Returns how many fit; the rest is dropped,
    /// which only happens when a peer floods faster than packets decode.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        self.producer.push_slice(bytes)
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    fn peek(&self, out: &mut [u8]) -> usize {
        self.consumer.peek_slice(out)
    }

    fn skip(&mut self, count: usize) {
        self.consumer.skip(count);
    }
}

/// Attempts to decode one packet from the buffer.
///
/// Returns `None` when the buffered bytes do not yet form a complete packet;
/// nothing is consumed in that case. A complete packet is always consumed,
/// with `is_good` reporting whether its checksum held.
pub fn decode(buffer: &mut ReadBuffer) -> Option<RplethPacket> {
    let mut header = [0u8; HEADER_LEN];
    if buffer.peek(&mut header) < HEADER_LEN {
        return None;
    }
    let [sensor, command, length] = header;
    let total = HEADER_LEN + length as usize + 1;
    if buffer.len() < total {
        return None;
    }

    let mut wire = vec![0u8; total];
    buffer.peek(&mut wire);
    buffer.skip(total);

    let payload = wire[HEADER_LEN..HEADER_LEN + length as usize].to_vec();
    let received_checksum = wire[total - 1];
    let is_good = checksum(sensor, command, &payload) == received_checksum;

    Some(RplethPacket {
        sensor,
        command,
        payload,
        is_good,
    })
}

/// Converts colon-separated hex card text (`"ff:ab:cd"`) to its bytes.
pub fn card_from_text(text: &str) -> CoreResult<Vec<u8>> {
    text.split(':')
        .map(|part| {
            u8::from_str_radix(part, 16).map_err(|_| {
                CoreError::ProtocolViolation(format!("invalid card byte '{part}' in '{text}'"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_one_packet() {
        let wire = encode(SensorType::Hid, HidCommand::Badge as u8, &[0xff, 0xab]).unwrap();
        let mut buffer = ReadBuffer::default();
        buffer.extend(&wire);
        let packet = decode(&mut buffer).unwrap();
        assert!(packet.is_good);
        assert_eq!(packet.sensor, SensorType::Hid as u8);
        assert_eq!(packet.command, HidCommand::Badge as u8);
        assert_eq!(packet.payload, vec![0xff, 0xab]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn incremental_feed_decodes_the_same_packet() {
        let wire = encode(SensorType::Hid, HidCommand::Badge as u8, &[1, 2, 3, 4]).unwrap();
        let mut buffer = ReadBuffer::default();
        for &byte in &wire[..wire.len() - 1] {
            buffer.extend(&[byte]);
            assert!(decode(&mut buffer).is_none());
        }
        let buffered = buffer.len();
        assert_eq!(buffered, wire.len() - 1);

        buffer.extend(&wire[wire.len() - 1..]);
        let packet = decode(&mut buffer).unwrap();
        assert!(packet.is_good);
        assert_eq!(packet.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn bad_checksum_is_consumed_and_flagged() {
        let mut wire = encode(SensorType::Hid, HidCommand::Beep as u8, &[10]).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut buffer = ReadBuffer::default();
        buffer.extend(&wire);
        let packet = decode(&mut buffer).unwrap();
        assert!(!packet.is_good);
        assert!(buffer.is_empty());
    }

    #[test]
    fn two_packets_decode_in_order() {
        let first = encode(SensorType::Hid, HidCommand::Beep as u8, &[1]).unwrap();
        let second = encode(SensorType::Rpleth, 0x07, &[]).unwrap();
        let mut buffer = ReadBuffer::default();
        buffer.extend(&first);
        buffer.extend(&second);

        let a = decode(&mut buffer).unwrap();
        let b = decode(&mut buffer).unwrap();
        assert_eq!(a.command, HidCommand::Beep as u8);
        assert_eq!(b.sensor, SensorType::Rpleth as u8);
        assert!(decode(&mut buffer).is_none());
    }

    #[test]
    fn card_text_conversion() {
        assert_eq!(
            card_from_text("ff:ab:cd:ef:12").unwrap(),
            vec![0xff, 0xab, 0xcd, 0xef, 0x12]
        );
        assert_eq!(
            card_from_text("00:00:00:00").unwrap(),
            vec![0x00, 0x00, 0x00, 0x00]
        );
        assert!(card_from_text("zz:00").is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 300];
        assert!(encode(SensorType::Hid, 0x00, &payload).is_err());
    }

    #[test]
    fn extend_reports_how_many_bytes_fit() {
        let mut buffer = ReadBuffer::with_capacity(4);
        assert_eq!(buffer.extend(&[1, 2, 3]), 3);
        assert_eq!(buffer.extend(&[4, 5, 6]), 1);
        assert_eq!(buffer.len(), 4);
    }
}
