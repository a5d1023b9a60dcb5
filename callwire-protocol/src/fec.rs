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

//! Interleaved adaptive XOR forward-error-correction.
//!
//! Outgoing RTP packets are distributed round-robin across
//! [`INTERLEAVE_DEPTH`] protection slots. When a slot accumulates the
//! current group size it is sealed: one [`FecPacket`] carrying the XOR of
//! the group's payloads is emitted and the slot cleared. Interleaving
//! spreads each protection group across time so a contiguous burst loss
//! does not take out both a packet and its parity.
//!
//! The group size adapts to measured network conditions: smaller groups
//! mean more parity packets per RTP packet (heavier protection, more
//! overhead) and are selected as loss or RTT worsens.

use bytes::Bytes;

use crate::wire::{FecPacket, FecProtectedMeta, RtpPacket};

/// Number of parallel protection slots.
pub const INTERLEAVE_DEPTH: usize = 3;

/// Group size under heavy loss: one parity packet per two RTP packets.
pub const MIN_GROUP_SIZE: usize = 2;

/// Default group size under clean network conditions.
pub const MAX_GROUP_SIZE: usize = 4;

const HIGH_LOSS: f64 = 0.10;
const MODERATE_LOSS: f64 = 0.05;
const HIGH_RTT_MS: f64 = 200.0;
const MODERATE_RTT_MS: f64 = 100.0;

/// Snapshot of the loss estimator's measurements.
///
/// Produced by an external estimator; consumed here for group sizing and
/// by the pacer for budget sizing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkStats {
    /// Observed packet loss ratio, `0.0..=1.0`.
    pub loss_rate: f64,
    /// Smoothed round-trip time in milliseconds.
    pub rtt_ms: f64,
}

/// Pick the protection group size for the given network conditions.
pub fn decide_group_size(loss_rate: f64, rtt_ms: f64) -> usize {
    if loss_rate >= HIGH_LOSS || rtt_ms > HIGH_RTT_MS {
        2
    } else if loss_rate >= MODERATE_LOSS || rtt_ms > MODERATE_RTT_MS {
        3
    } else {
        MAX_GROUP_SIZE
    }
}

/// XOR group encoder over an outgoing RTP stream.
pub struct AdaptiveFecEncoder {
    slots: [Vec<RtpPacket>; INTERLEAVE_DEPTH],
    cursor: usize,
    group_size: usize,
}

impl Default for AdaptiveFecEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveFecEncoder {
    pub fn new() -> Self {
        AdaptiveFecEncoder {
            slots: Default::default(),
            cursor: 0,
            group_size: MAX_GROUP_SIZE,
        }
    }

    /// Currently configured group size (2–4).
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Feed one outgoing packet through the encoder.
    ///
    /// Re-evaluates the group size from `stats`, appends the packet to the
    /// current slot, advances the round-robin cursor, and seals every slot
    /// that has reached the group size. Usually returns zero or one parity
    /// packet; a group-size drop can seal several slots at once.
    pub fn process_packet(&mut self, packet: &RtpPacket, stats: &NetworkStats) -> Vec<FecPacket> {
        let target = decide_group_size(stats.loss_rate, stats.rtt_ms);
        if target != self.group_size {
            log::debug!(
                "fec group size {} -> {} (loss {:.3}, rtt {:.1}ms)",
                self.group_size,
                target,
                stats.loss_rate,
                stats.rtt_ms
            );
            self.group_size = target;
        }

        self.slots[self.cursor].push(packet.clone());
        self.cursor = (self.cursor + 1) % INTERLEAVE_DEPTH;

        let mut sealed = Vec::new();
        for slot in &mut self.slots {
            if slot.len() >= self.group_size {
                sealed.push(generate_fec_packet(slot));
                slot.clear();
            }
        }
        sealed
    }

    /// Force-seal every slot holding at least two packets.
    ///
    /// A slot with a single buffered packet is discarded unsealed: its
    /// parity would be a byte-identical copy of the packet, pure overhead.
    /// The cursor resets to the first slot; the group size is kept.
    pub fn flush(&mut self) -> Vec<FecPacket> {
        let mut sealed = Vec::new();
        for slot in &mut self.slots {
            if slot.len() > 1 {
                sealed.push(generate_fec_packet(slot));
            } else if slot.len() == 1 {
                log::debug!(
                    "discarding lone packet seq {} from unsealed fec slot",
                    slot[0].sequence
                );
            }
            slot.clear();
        }
        self.cursor = 0;
        sealed
    }

    /// Clear all state and restore the default group size. Used on stream
    /// restart, e.g. after a renegotiated session.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.cursor = 0;
        self.group_size = MAX_GROUP_SIZE;
    }
}

/// Build the parity packet for one protection group.
///
/// The FEC timestamp is the timestamp of the group's last-inserted packet
/// (insertion order, not numeric order); metadata preserves each packet's
/// original fields and unpadded payload length.
pub fn generate_fec_packet(group: &[RtpPacket]) -> FecPacket {
    debug_assert!(!group.is_empty());
    let max_len = group.iter().map(|p| p.payload.len()).max().unwrap_or(0);

    let mut parity = vec![0u8; max_len];
    for packet in group {
        for (out, byte) in parity.iter_mut().zip(packet.payload.iter()) {
            *out ^= byte;
        }
    }

    let protected = group
        .iter()
        .map(|p| FecProtectedMeta {
            sequence: p.sequence,
            timestamp: p.timestamp,
            frame_id: p.frame_id,
            fragment_number: p.fragment_number,
            total_fragments: p.total_fragments,
            payload_len: p.payload.len() as u16,
        })
        .collect();

    FecPacket {
        timestamp: group.last().map(|p| p.timestamp).unwrap_or(0),
        protected,
        payload: Bytes::from(parity),
    }
}

/// Reconstruct the single missing packet of a protection group.
///
/// Recovery is only possible when exactly one protected packet is absent:
/// `available` must hold all the others. Returns `None` when more than one
/// packet is missing (the group is unrecoverable and should be reported as
/// lost) or when the inputs do not belong to this group.
pub fn recover_packet(fec: &FecPacket, available: &[RtpPacket]) -> Option<RtpPacket> {
    if available.len() + 1 != fec.protected.len() {
        return None;
    }

    let mut missing = fec
        .protected
        .iter()
        .filter(|meta| !available.iter().any(|p| p.sequence == meta.sequence));
    let meta = *missing.next()?;
    if missing.next().is_some() {
        // An available packet did not match any metadata entry, so two or
        // more protected packets are actually absent.
        return None;
    }

    let mut payload = fec.payload.to_vec();
    for packet in available {
        for (out, byte) in payload.iter_mut().zip(packet.payload.iter()) {
            *out ^= byte;
        }
    }
    // XOR ran over zero-padded payloads; cut back to the recorded length.
    payload.truncate(meta.payload_len as usize);

    Some(RtpPacket {
        sequence: meta.sequence,
        timestamp: meta.timestamp,
        frame_id: meta.frame_id,
        total_fragments: meta.total_fragments,
        fragment_number: meta.fragment_number,
        payload: Bytes::from(payload),
    })
}
