//! # Backbone Wire Packet (C1)
//!
//! Fixed 64-byte header, big-endian integers, ASCII callsigns null-padded.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  version (1) |  type (1)    |  flags (1)   |  reserved (1)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      source (10, null-padded)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   destination (10, null-padded)               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        messageId (16)                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   ttl (1)    | priority (1) |        payloadLen (4)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   crc16 (2)  |                  reserved (16)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Routing-info (a TLV list terminated by tag 0, length 0) immediately
//! follows the header; the opaque payload follows the TLV list. CRC16 is
//! computed (poly 0xA001, init 0xFFFF, LSB-first) over header bytes 0..46,
//! i.e. everything preceding the checksum field.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::routing_info::RoutingInfo;

/// Total header size in bytes.
pub const HEADER_LEN: usize = 64;

/// Offset of the CRC16 field within the header.
const CRC_OFFSET: usize = 46;

/// Protocol version this codec implements.
pub const PROTOCOL_VERSION: u8 = 1;

const SOURCE_LEN: usize = 10;
const DEST_LEN: usize = 10;
const MESSAGE_ID_LEN: usize = 16;
const TAIL_RESERVED_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("CRC16 mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },
    #[error("malformed routing info: {0}")]
    MalformedRoutingInfo(String),
    #[error("unknown packet type byte {0:#04x}")]
    UnknownPacketType(u8),
    #[error("source/destination callsign invalid: {0}")]
    MalformedCallsign(String),
    #[error("invalid priority byte {0:#04x}")]
    InvalidPriority(u8),
}

/// Backbone packet type (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Hello = 0x01,
    Lsa = 0x02,
    Data = 0x03,
    Ack = 0x04,
    ServiceQuery = 0x05,
    ServiceReply = 0x06,
    Keepalive = 0x07,
    Error = 0x08,
    NeighborList = 0x09,
    RegistryUpdate = 0x0A,
}

impl PacketType {
    pub fn from_u8(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0x01 => PacketType::Hello,
            0x02 => PacketType::Lsa,
            0x03 => PacketType::Data,
            0x04 => PacketType::Ack,
            0x05 => PacketType::ServiceQuery,
            0x06 => PacketType::ServiceReply,
            0x07 => PacketType::Keepalive,
            0x08 => PacketType::Error,
            0x09 => PacketType::NeighborList,
            0x0A => PacketType::RegistryUpdate,
            other => return Err(CodecError::UnknownPacketType(other)),
        })
    }
}

bitflags::bitflags! {
    /// Packet flags bitset (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const COMPRESSED = 0x01;
        const ENCRYPTED  = 0x02;
        const FRAGMENTED = 0x04;
        const URGENT     = 0x08;
    }
}

/// Wire priority (six levels; collapses to four queue bands — see
/// [`crate::seen`]'s sibling module `backbone_node::queue` for the mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Emergency = 0,
    Urgent = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Lowest = 5,
}

impl Priority {
    pub fn from_u8(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0 => Priority::Emergency,
            1 => Priority::Urgent,
            2 => Priority::High,
            3 => Priority::Normal,
            4 => Priority::Low,
            5 => Priority::Lowest,
            other => return Err(CodecError::InvalidPriority(other)),
        })
    }
}

/// A fully decoded backbone wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: PacketType,
    pub flags: Flags,
    pub source: String,
    pub destination: String,
    pub message_id: [u8; MESSAGE_ID_LEN],
    pub ttl: u8,
    pub priority: Priority,
    pub routing_info: RoutingInfo,
    pub payload: Bytes,
}

/// Peek the total on-wire length (header + routing-info + payload) of the
/// frame starting at `data`, without fully decoding it.
///
/// Returns `None` when `data` doesn't yet hold the `payloadLen` field
/// (offset 42..46), i.e. the caller needs to buffer more bytes before it
/// can even compute a frame length, let alone decode one.
pub fn peek_frame_len(data: &[u8]) -> Option<usize> {
    const PAYLOAD_LEN_OFFSET: usize = 4 + SOURCE_LEN + DEST_LEN + MESSAGE_ID_LEN + 2;
    if data.len() < PAYLOAD_LEN_OFFSET + 4 {
        return None;
    }
    let payload_len = u32::from_be_bytes(
        data[PAYLOAD_LEN_OFFSET..PAYLOAD_LEN_OFFSET + 4]
            .try_into()
            .unwrap(),
    ) as usize;
    Some(HEADER_LEN + payload_len)
}

impl Packet {
    /// Encode this packet to its wire representation.
    pub fn encode(&self) -> BytesMut {
        let tlv = self.routing_info.encode();
        let payload_len = (tlv.len() + self.payload.len()) as u32;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + tlv.len() + self.payload.len());
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u8(0); // reserved
        put_fixed_str(&mut buf, &self.source, SOURCE_LEN);
        put_fixed_str(&mut buf, &self.destination, DEST_LEN);
        buf.put_slice(&self.message_id);
        buf.put_u8(self.ttl);
        buf.put_u8(self.priority as u8);
        buf.put_u32(payload_len);
        // crc16 placeholder, filled in below
        buf.put_u16(0);
        buf.put_slice(&[0u8; TAIL_RESERVED_LEN]);

        debug_assert_eq!(buf.len(), HEADER_LEN);

        buf.put_slice(&tlv);
        buf.put_slice(&self.payload);

        let crc = crc16(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..CRC_OFFSET + 2].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Decode a packet from a byte buffer.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                need: HEADER_LEN,
                have: data.len(),
            });
        }

        let version = data[0];
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let expected_crc = u16::from_be_bytes([data[CRC_OFFSET], data[CRC_OFFSET + 1]]);
        let computed_crc = crc16(&data[..CRC_OFFSET]);
        if expected_crc != computed_crc {
            return Err(CodecError::CrcMismatch {
                expected: expected_crc,
                computed: computed_crc,
            });
        }

        let packet_type = PacketType::from_u8(data[1])?;
        let flags = Flags::from_bits_truncate(data[2]);
        let source = take_fixed_str(&data[4..4 + SOURCE_LEN])?;
        let destination = take_fixed_str(&data[4 + SOURCE_LEN..4 + SOURCE_LEN + DEST_LEN])?;

        let mut message_id = [0u8; MESSAGE_ID_LEN];
        let mid_off = 4 + SOURCE_LEN + DEST_LEN;
        message_id.copy_from_slice(&data[mid_off..mid_off + MESSAGE_ID_LEN]);

        let tail_off = mid_off + MESSAGE_ID_LEN;
        let ttl = data[tail_off];
        let priority = Priority::from_u8(data[tail_off + 1])?;
        let payload_len =
            u32::from_be_bytes(data[tail_off + 2..tail_off + 6].try_into().unwrap()) as usize;

        let total_len = HEADER_LEN + payload_len;
        if data.len() < total_len {
            return Err(CodecError::Truncated {
                need: total_len,
                have: data.len(),
            });
        }

        let mut body = &data[HEADER_LEN..total_len];
        let (routing_info, tlv_len) = RoutingInfo::decode(body)
            .map_err(|e| CodecError::MalformedRoutingInfo(e.to_string()))?;
        body.advance(tlv_len);
        let payload = Bytes::copy_from_slice(body);

        Ok(Packet {
            version,
            packet_type,
            flags,
            source,
            destination,
            message_id,
            ttl,
            priority,
            routing_info,
            payload,
        })
    }
}

fn put_fixed_str(buf: &mut BytesMut, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    buf.put_slice(&bytes[..n]);
    for _ in n..len {
        buf.put_u8(0);
    }
}

fn take_fixed_str(field: &[u8]) -> Result<String, CodecError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(|s| s.to_string())
        .map_err(|e| CodecError::MalformedCallsign(e.to_string()))
}

/// CRC16 with polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF,
/// LSB-first — the same algorithm widely known as "CRC-16/MODBUS".
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing_info::RoutingAnnotation;

    fn sample_packet() -> Packet {
        Packet {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            flags: Flags::empty(),
            source: "W1ABC-10".to_string(),
            destination: "K2XYZ-5".to_string(),
            message_id: [
                0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
                0x0D, 0x0E, 0x0F,
            ],
            ttl: 12,
            priority: Priority::Normal,
            routing_info: RoutingInfo::default(),
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn s1_codec_round_trip() {
        let p = sample_packet();
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn decode_rejects_bad_version() {
        let mut encoded = sample_packet().encode();
        encoded[0] = 9;
        // version check happens before CRC check, so the CRC is now "wrong"
        // too, but UnsupportedVersion must still take priority.
        assert_eq!(
            Packet::decode(&encoded),
            Err(CodecError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let short = vec![0u8; HEADER_LEN - 1];
        assert_eq!(
            Packet::decode(&short),
            Err(CodecError::Truncated {
                need: HEADER_LEN,
                have: HEADER_LEN - 1
            })
        );
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut encoded = sample_packet().encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(
            Packet::decode(&encoded),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_crc_mismatch() {
        let mut encoded = sample_packet().encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            Packet::decode(&encoded),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn round_trip_with_routing_info() {
        let mut p = sample_packet();
        p.routing_info
            .annotations
            .push(RoutingAnnotation::ViaPath(vec![
                "W1ABC-10".into(),
                "K2XYZ-5".into(),
            ]));
        p.routing_info
            .annotations
            .push(RoutingAnnotation::Cost(42));
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn peek_frame_len_needs_more_bytes_before_payload_len_field() {
        assert_eq!(peek_frame_len(&[0u8; 10]), None);
    }

    #[test]
    fn peek_frame_len_matches_encoded_length() {
        let encoded = sample_packet().encode();
        assert_eq!(peek_frame_len(&encoded), Some(encoded.len()));
        // still computable from just the header, before the payload arrives
        assert_eq!(peek_frame_len(&encoded[..HEADER_LEN]), Some(encoded.len()));
    }

    #[test]
    fn crc16_matches_known_vector() {
        // "123456789" -> 0x4B37 under CRC-16/MODBUS.
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    proptest::proptest! {
        #[test]
        fn prop_round_trip_arbitrary_payload(payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048)) {
            let mut p = sample_packet();
            p.payload = Bytes::from(payload);
            let encoded = p.encode();
            let decoded = Packet::decode(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded, p);
        }
    }
}
