/*
 * Copyright 2026 Callwire Contributors
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Binary packet encoding for the media transport.
//!
//! Every packet begins with a one-byte kind discriminant. All multi-byte
//! integers are big-endian. Layouts after the kind byte:
//!
//! ```text
//! RTP  (0x01): seq u64 | timestamp u64 | frame_id u64
//!              | total_fragments u16 | fragment_number u16 | payload…
//! FEC  (0x02): timestamp u64 | protected_count u8
//!              | protected_count × 30-byte metadata | xor payload…
//! NACK (0x03): count u8 | count × seq u64
//! PING (0x04): timestamp u64 | payload…
//! PONG (0x05): timestamp u64 | payload…
//! ```
//!
//! FEC metadata record (30 bytes): seq u64 | timestamp u64 | frame_id u64
//! | fragment_number u16 | total_fragments u16 | payload_len u16.
//!
//! Decoding never panics: truncated or malformed buffers and unknown kind
//! bytes yield `None`. Payloads of decoded packets are zero-copy [`Bytes`]
//! views over the input buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Revision of the byte layouts above. Bumped whenever a layout changes;
/// the golden fixtures in the test suite pin the current revision.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed RTP header size after the kind byte.
pub const RTP_HEADER_LEN: usize = 8 + 8 + 8 + 2 + 2;

/// Fixed FEC header size after the kind byte (timestamp + count).
pub const FEC_HEADER_LEN: usize = 8 + 1;

/// Size of one FEC protected-packet metadata record.
pub const FEC_META_LEN: usize = 8 + 8 + 8 + 2 + 2 + 2;

/// Largest number of packets a single FEC packet can protect.
pub const MAX_PROTECTED_PACKETS: usize = u8::MAX as usize;

/// Largest number of sequence numbers a single NACK can carry.
pub const MAX_NACK_ENTRIES: usize = u8::MAX as usize;

/// One-byte packet kind discriminant, always the first byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Rtp = 0x01,
    Fec = 0x02,
    Nack = 0x03,
    Ping = 0x04,
    Pong = 0x05,
}

impl PacketKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PacketKind::Rtp),
            0x02 => Some(PacketKind::Fec),
            0x03 => Some(PacketKind::Nack),
            0x04 => Some(PacketKind::Ping),
            0x05 => Some(PacketKind::Pong),
            _ => None,
        }
    }
}

/// A fragment of encoded media.
///
/// `frame_id` groups the fragments belonging to one encoded frame;
/// `fragment_number` is this fragment's position within the frame
/// (`0..total_fragments`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub sequence: u64,
    /// Capture timestamp in media clock units (milliseconds).
    pub timestamp: u64,
    pub frame_id: u64,
    pub total_fragments: u16,
    pub fragment_number: u16,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn encoded_len(&self) -> usize {
        1 + RTP_HEADER_LEN + self.payload.len()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(PacketKind::Rtp as u8);
        buf.put_u64(self.sequence);
        buf.put_u64(self.timestamp);
        buf.put_u64(self.frame_id);
        buf.put_u16(self.total_fragments);
        buf.put_u16(self.fragment_number);
        buf.extend_from_slice(&self.payload);
    }

    /// Decode the body following an already-consumed RTP kind byte.
    fn decode_body(mut buf: Bytes) -> Option<Self> {
        if buf.remaining() < RTP_HEADER_LEN {
            return None;
        }
        let sequence = buf.get_u64();
        let timestamp = buf.get_u64();
        let frame_id = buf.get_u64();
        let total_fragments = buf.get_u16();
        let fragment_number = buf.get_u16();
        let payload = buf.copy_to_bytes(buf.remaining());
        Some(RtpPacket {
            sequence,
            timestamp,
            frame_id,
            total_fragments,
            fragment_number,
            payload,
        })
    }
}

/// Per-protected-packet metadata carried inside a FEC packet.
///
/// Preserves everything needed to rebuild a lost [`RtpPacket`]:
/// `payload_len` is the original, unpadded payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecProtectedMeta {
    pub sequence: u64,
    pub timestamp: u64,
    pub frame_id: u64,
    pub fragment_number: u16,
    pub total_fragments: u16,
    pub payload_len: u16,
}

impl FecProtectedMeta {
    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u64(self.sequence);
        buf.put_u64(self.timestamp);
        buf.put_u64(self.frame_id);
        buf.put_u16(self.fragment_number);
        buf.put_u16(self.total_fragments);
        buf.put_u16(self.payload_len);
    }

    fn decode(buf: &mut Bytes) -> Self {
        // Caller has validated that FEC_META_LEN bytes remain.
        FecProtectedMeta {
            sequence: buf.get_u64(),
            timestamp: buf.get_u64(),
            frame_id: buf.get_u64(),
            fragment_number: buf.get_u16(),
            total_fragments: buf.get_u16(),
            payload_len: buf.get_u16(),
        }
    }
}

/// XOR parity over a protection group of RTP packets.
///
/// The payload is the byte-wise XOR of all protected payloads, each
/// zero-padded to the longest payload in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    /// Timestamp of the newest protected packet.
    pub timestamp: u64,
    pub protected: Vec<FecProtectedMeta>,
    pub payload: Bytes,
}

impl FecPacket {
    pub fn encoded_len(&self) -> usize {
        1 + FEC_HEADER_LEN + self.protected.len() * FEC_META_LEN + self.payload.len()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        debug_assert!(self.protected.len() <= MAX_PROTECTED_PACKETS);
        buf.put_u8(PacketKind::Fec as u8);
        buf.put_u64(self.timestamp);
        buf.put_u8(self.protected.len() as u8);
        for meta in &self.protected {
            meta.encode_into(buf);
        }
        buf.extend_from_slice(&self.payload);
    }

    fn decode_body(mut buf: Bytes) -> Option<Self> {
        if buf.remaining() < FEC_HEADER_LEN {
            return None;
        }
        let timestamp = buf.get_u64();
        let count = buf.get_u8() as usize;
        // Validate the metadata block length before reading any entry.
        if buf.remaining() < count * FEC_META_LEN {
            return None;
        }
        let mut protected = Vec::with_capacity(count);
        for _ in 0..count {
            protected.push(FecProtectedMeta::decode(&mut buf));
        }
        // The parity payload spans the longest protected payload; anything
        // shorter is a truncated packet.
        let max_len = protected
            .iter()
            .map(|m| m.payload_len as usize)
            .max()
            .unwrap_or(0);
        if buf.remaining() < max_len {
            return None;
        }
        let payload = buf.copy_to_bytes(buf.remaining());
        Some(FecPacket {
            timestamp,
            protected,
            payload,
        })
    }
}

/// Receiver-side loss report listing missing sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackPacket {
    pub missing: Vec<u64>,
}

impl NackPacket {
    pub fn encoded_len(&self) -> usize {
        1 + 1 + self.missing.len() * 8
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        debug_assert!(self.missing.len() <= MAX_NACK_ENTRIES);
        buf.put_u8(PacketKind::Nack as u8);
        buf.put_u8(self.missing.len() as u8);
        for seq in &self.missing {
            buf.put_u64(*seq);
        }
    }

    fn decode_body(mut buf: Bytes) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let count = buf.get_u8() as usize;
        if buf.remaining() < count * 8 {
            return None;
        }
        let mut missing = Vec::with_capacity(count);
        for _ in 0..count {
            missing.push(buf.get_u64());
        }
        Some(NackPacket { missing })
    }
}

/// Heartbeat probe. The payload is opaque and echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    pub timestamp: u64,
    pub payload: Bytes,
}

/// Heartbeat reply carrying the originating ping's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongPacket {
    pub timestamp: u64,
    pub payload: Bytes,
}

fn encode_heartbeat(kind: PacketKind, timestamp: u64, payload: &Bytes, buf: &mut BytesMut) {
    buf.put_u8(kind as u8);
    buf.put_u64(timestamp);
    buf.extend_from_slice(payload);
}

fn decode_heartbeat(mut buf: Bytes) -> Option<(u64, Bytes)> {
    if buf.remaining() < 8 {
        return None;
    }
    let timestamp = buf.get_u64();
    let payload = buf.copy_to_bytes(buf.remaining());
    Some((timestamp, payload))
}

/// A decoded wire packet of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rtp(RtpPacket),
    Fec(FecPacket),
    Nack(NackPacket),
    Ping(PingPacket),
    Pong(PongPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Rtp(_) => PacketKind::Rtp,
            Packet::Fec(_) => PacketKind::Fec,
            Packet::Nack(_) => PacketKind::Nack,
            Packet::Ping(_) => PacketKind::Ping,
            Packet::Pong(_) => PacketKind::Pong,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Rtp(p) => p.encoded_len(),
            Packet::Fec(p) => p.encoded_len(),
            Packet::Nack(p) => p.encoded_len(),
            Packet::Ping(p) => 1 + 8 + p.payload.len(),
            Packet::Pong(p) => 1 + 8 + p.payload.len(),
        }
    }

    /// Serialize into a freshly allocated buffer. Deterministic and
    /// fixed-width per kind; no padding.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Packet::Rtp(p) => p.encode_into(&mut buf),
            Packet::Fec(p) => p.encode_into(&mut buf),
            Packet::Nack(p) => p.encode_into(&mut buf),
            Packet::Ping(p) => encode_heartbeat(PacketKind::Ping, p.timestamp, &p.payload, &mut buf),
            Packet::Pong(p) => encode_heartbeat(PacketKind::Pong, p.timestamp, &p.payload, &mut buf),
        }
        buf.freeze()
    }

    /// Decode a packet from raw bytes.
    ///
    /// Returns `None` for an empty buffer, an unknown kind byte, or a
    /// buffer too short for the declared fixed header, never partial
    /// data. Payload fields alias the input buffer without copying.
    pub fn decode(mut buf: Bytes) -> Option<Packet> {
        if !buf.has_remaining() {
            return None;
        }
        let kind_byte = buf.get_u8();
        let kind = match PacketKind::from_byte(kind_byte) {
            Some(kind) => kind,
            None => {
                log::debug!("rejecting packet with unknown kind byte {kind_byte:#04x}");
                return None;
            }
        };
        match kind {
            PacketKind::Rtp => RtpPacket::decode_body(buf).map(Packet::Rtp),
            PacketKind::Fec => FecPacket::decode_body(buf).map(Packet::Fec),
            PacketKind::Nack => NackPacket::decode_body(buf).map(Packet::Nack),
            PacketKind::Ping => {
                decode_heartbeat(buf).map(|(timestamp, payload)| {
                    Packet::Ping(PingPacket { timestamp, payload })
                })
            }
            PacketKind::Pong => {
                decode_heartbeat(buf).map(|(timestamp, payload)| {
                    Packet::Pong(PongPacket { timestamp, payload })
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rtp() -> RtpPacket {
        RtpPacket {
            sequence: 7,
            timestamp: 1_000,
            frame_id: 3,
            total_fragments: 2,
            fragment_number: 1,
            payload: Bytes::from_static(b"\xAA\xBB\xCC"),
        }
    }

    #[test]
    fn rtp_golden_fixture() {
        let encoded = Packet::Rtp(sample_rtp()).encode();
        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x01,                                           // kind
            0, 0, 0, 0, 0, 0, 0, 7,                         // sequence
            0, 0, 0, 0, 0, 0, 0x03, 0xE8,                   // timestamp
            0, 0, 0, 0, 0, 0, 0, 3,                         // frame_id
            0, 2,                                           // total_fragments
            0, 1,                                           // fragment_number
            0xAA, 0xBB, 0xCC,                               // payload
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn nack_golden_fixture() {
        let encoded = Packet::Nack(NackPacket {
            missing: vec![1, 0x0102030405060708],
        })
        .encode();
        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x03,                                           // kind
            2,                                              // count
            0, 0, 0, 0, 0, 0, 0, 1,
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn ping_golden_fixture() {
        let encoded = Packet::Ping(PingPacket {
            timestamp: 0x10,
            payload: Bytes::from_static(b"hb"),
        })
        .encode();
        let expected: &[u8] = &[0x04, 0, 0, 0, 0, 0, 0, 0, 0x10, b'h', b'b'];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn fec_golden_fixture() {
        let fec = FecPacket {
            timestamp: 5,
            protected: vec![FecProtectedMeta {
                sequence: 9,
                timestamp: 5,
                frame_id: 2,
                fragment_number: 0,
                total_fragments: 1,
                payload_len: 2,
            }],
            payload: Bytes::from_static(b"\x0F\xF0"),
        };
        let encoded = Packet::Fec(fec).encode();
        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x02,                                           // kind
            0, 0, 0, 0, 0, 0, 0, 5,                         // timestamp
            1,                                              // protected_count
            0, 0, 0, 0, 0, 0, 0, 9,                         // meta: sequence
            0, 0, 0, 0, 0, 0, 0, 5,                         // meta: timestamp
            0, 0, 0, 0, 0, 0, 0, 2,                         // meta: frame_id
            0, 0,                                           // meta: fragment_number
            0, 1,                                           // meta: total_fragments
            0, 2,                                           // meta: payload_len
            0x0F, 0xF0,                                     // xor payload
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn roundtrip_every_kind() {
        let packets = vec![
            Packet::Rtp(sample_rtp()),
            Packet::Fec(FecPacket {
                timestamp: u64::MAX,
                protected: vec![],
                payload: Bytes::new(),
            }),
            Packet::Nack(NackPacket { missing: vec![] }),
            Packet::Ping(PingPacket {
                timestamp: 42,
                payload: Bytes::new(),
            }),
            Packet::Pong(PongPacket {
                timestamp: 42,
                payload: Bytes::from_static(b"echo"),
            }),
        ];
        for packet in packets {
            let encoded = packet.encode();
            assert_eq!(encoded.len(), packet.encoded_len());
            let decoded = Packet::decode(encoded).expect("valid encoding must decode");
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        assert_eq!(Packet::decode(Bytes::from_static(b"\x7F\x00\x00")), None);
    }

    #[test]
    fn decode_rejects_empty_buffer() {
        assert_eq!(Packet::decode(Bytes::new()), None);
    }

    #[test]
    fn decode_rejects_every_truncated_prefix() {
        let full = Packet::Rtp(sample_rtp()).encode();
        // Any prefix shorter than the fixed header must fail; prefixes that
        // cover the header but cut the payload are valid shorter payloads
        // for RTP (implied length), so only check below the header.
        for len in 0..(1 + RTP_HEADER_LEN) {
            assert_eq!(
                Packet::decode(full.slice(..len)),
                None,
                "prefix of {len} bytes must not decode"
            );
        }
    }

    #[test]
    fn fec_decode_validates_metadata_length() {
        let fec = FecPacket {
            timestamp: 1,
            protected: vec![FecProtectedMeta {
                sequence: 1,
                timestamp: 1,
                frame_id: 1,
                fragment_number: 0,
                total_fragments: 1,
                payload_len: 0,
            }],
            payload: Bytes::new(),
        };
        let encoded = Packet::Fec(fec).encode();
        // Cut into the metadata block: count says one record but the bytes
        // are not all there.
        let truncated = encoded.slice(..encoded.len() - 1);
        assert_eq!(Packet::decode(truncated), None);
    }

    #[test]
    fn fec_decode_rejects_short_parity_payload() {
        let fec = FecPacket {
            timestamp: 1,
            protected: vec![FecProtectedMeta {
                sequence: 1,
                timestamp: 1,
                frame_id: 1,
                fragment_number: 0,
                total_fragments: 1,
                payload_len: 4,
            }],
            payload: Bytes::from_static(b"\x01\x02\x03\x04"),
        };
        let encoded = Packet::Fec(fec).encode();
        let truncated = encoded.slice(..encoded.len() - 2);
        assert_eq!(Packet::decode(truncated), None);
    }

    #[test]
    fn decoded_payload_is_zero_copy() {
        let encoded = Packet::Rtp(sample_rtp()).encode();
        let base = encoded.as_ptr() as usize;
        let end = base + encoded.len();
        match Packet::decode(encoded).unwrap() {
            Packet::Rtp(p) => {
                let ptr = p.payload.as_ptr() as usize;
                assert!(
                    ptr >= base && ptr < end,
                    "payload must alias the input buffer"
                );
            }
            other => panic!("expected RTP, got {other:?}"),
        }
    }

    #[test]
    fn zero_length_payload_roundtrip() {
        let packet = Packet::Rtp(RtpPacket {
            sequence: 0,
            timestamp: 0,
            frame_id: 0,
            total_fragments: 1,
            fragment_number: 0,
            payload: Bytes::new(),
        });
        let decoded = Packet::decode(packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }
}
