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

//! Property-based tests for the wire format and FEC recovery.
//!
//! Round-trip correctness over full field ranges (including zero-length
//! payloads and 255-entry FEC/NACK maxima), truncation safety over every
//! prefix, and single-loss recovery for arbitrary groups.

use bytes::Bytes;
use callwire_protocol::fec::{generate_fec_packet, recover_packet};
use callwire_protocol::wire::{
    FecPacket, FecProtectedMeta, NackPacket, Packet, PingPacket, PongPacket, RtpPacket,
    MAX_NACK_ENTRIES, MAX_PROTECTED_PACKETS,
};
use proptest::collection::vec;
use proptest::prelude::*;

fn arb_rtp() -> impl Strategy<Value = RtpPacket> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        any::<u16>(),
        any::<u16>(),
        vec(any::<u8>(), 0..512),
    )
        .prop_map(
            |(sequence, timestamp, frame_id, total_fragments, fragment_number, payload)| {
                RtpPacket {
                    sequence,
                    timestamp,
                    frame_id,
                    total_fragments,
                    fragment_number,
                    payload: Bytes::from(payload),
                }
            },
        )
}

fn arb_meta() -> impl Strategy<Value = FecProtectedMeta> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        any::<u16>(),
        any::<u16>(),
        0u16..=64,
    )
        .prop_map(
            |(sequence, timestamp, frame_id, fragment_number, total_fragments, payload_len)| {
                FecProtectedMeta {
                    sequence,
                    timestamp,
                    frame_id,
                    fragment_number,
                    total_fragments,
                    payload_len,
                }
            },
        )
}

fn arb_fec() -> impl Strategy<Value = FecPacket> {
    (any::<u64>(), vec(arb_meta(), 0..=MAX_PROTECTED_PACKETS)).prop_map(|(timestamp, protected)| {
        let max_len = protected
            .iter()
            .map(|m| m.payload_len as usize)
            .max()
            .unwrap_or(0);
        FecPacket {
            timestamp,
            protected,
            payload: Bytes::from(vec![0x5A; max_len]),
        }
    })
}

fn arb_packet() -> impl Strategy<Value = Packet> {
    prop_oneof![
        arb_rtp().prop_map(Packet::Rtp),
        arb_fec().prop_map(Packet::Fec),
        vec(any::<u64>(), 0..=MAX_NACK_ENTRIES)
            .prop_map(|missing| Packet::Nack(NackPacket { missing })),
        (any::<u64>(), vec(any::<u8>(), 0..64)).prop_map(|(timestamp, payload)| {
            Packet::Ping(PingPacket {
                timestamp,
                payload: Bytes::from(payload),
            })
        }),
        (any::<u64>(), vec(any::<u8>(), 0..64)).prop_map(|(timestamp, payload)| {
            Packet::Pong(PongPacket {
                timestamp,
                payload: Bytes::from(payload),
            })
        }),
    ]
}

proptest! {
    #[test]
    fn every_packet_roundtrips(packet in arb_packet()) {
        let encoded = packet.encode();
        prop_assert_eq!(encoded.len(), packet.encoded_len());
        let decoded = Packet::decode(encoded).expect("valid encoding must decode");
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn truncation_never_yields_partial_data(packet in arb_packet(), cut in 0usize..64) {
        let encoded = packet.encode();
        // Cutting anything off the end either fails to decode or decodes to
        // a packet whose re-encoding is exactly the truncated input (the
        // variable-length payload tail legitimately shrank).
        let len = encoded.len().saturating_sub(cut + 1);
        let truncated = encoded.slice(..len);
        if let Some(decoded) = Packet::decode(truncated.clone()) {
            prop_assert_eq!(decoded.encode(), truncated);
        }
    }

    #[test]
    fn single_loss_recovers_for_any_group(
        payloads in vec(vec(any::<u8>(), 0..256), 2..=4),
        missing_seed in any::<usize>(),
    ) {
        let missing_index = missing_seed % payloads.len();
        let group: Vec<RtpPacket> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RtpPacket {
                sequence: i as u64,
                timestamp: i as u64 * 20,
                frame_id: i as u64,
                total_fragments: 1,
                fragment_number: 0,
                payload: Bytes::from(payload),
            })
            .collect();

        let fec = generate_fec_packet(&group);
        let available: Vec<RtpPacket> = group
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != missing_index)
            .map(|(_, p)| p.clone())
            .collect();

        let recovered = recover_packet(&fec, &available).expect("single loss must recover");
        prop_assert_eq!(&recovered, &group[missing_index]);

        // Dropping a second packet makes the group unrecoverable.
        if available.len() > 1 {
            prop_assert_eq!(recover_packet(&fec, &available[1..]), None);
        }
    }

    #[test]
    fn parity_survives_the_wire(payloads in vec(vec(any::<u8>(), 0..128), 2..=4)) {
        let group: Vec<RtpPacket> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RtpPacket {
                sequence: i as u64,
                timestamp: 0,
                frame_id: 0,
                total_fragments: 1,
                fragment_number: 0,
                payload: Bytes::from(payload),
            })
            .collect();
        let fec = generate_fec_packet(&group);
        let decoded = Packet::decode(Packet::Fec(fec.clone()).encode());
        prop_assert_eq!(decoded, Some(Packet::Fec(fec)));
    }
}
