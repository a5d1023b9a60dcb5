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

//! Splitting encoded frames into RTP fragments and putting them back
//! together.
//!
//! A [`Packetizer`] assigns one frame id per encoded frame and a
//! monotonically increasing sequence number per fragment. The receiving
//! [`FrameAssembler`] groups fragments by frame id and yields the frame
//! once every fragment arrived, in fragment-number order, regardless of
//! arrival order.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::wire::RtpPacket;

/// Default fragment payload ceiling, chosen to keep a full RTP packet
/// under a conservative path MTU.
pub const MAX_FRAGMENT_PAYLOAD: usize = 1200;

/// Partial frames kept in flight before the oldest is evicted.
const MAX_PENDING_FRAMES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("cannot packetize an empty frame")]
    EmptyFrame,
    #[error("frame of {size} bytes needs more than {max} fragments")]
    FrameTooLarge { size: usize, max: usize },
}

/// Splits encoded media frames into wire-sized RTP packets.
pub struct Packetizer {
    next_sequence: u64,
    next_frame_id: u64,
    max_payload: usize,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_FRAGMENT_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        assert!(max_payload > 0, "fragment payload ceiling must be positive");
        Packetizer {
            next_sequence: 0,
            next_frame_id: 0,
            max_payload,
        }
    }

    /// Split one encoded frame into RTP fragments.
    ///
    /// Fragments alias `frame` without copying. Every fragment carries the
    /// frame's capture timestamp and the shared frame id.
    pub fn packetize(
        &mut self,
        timestamp: u64,
        frame: Bytes,
    ) -> Result<Vec<RtpPacket>, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        let total = frame.len().div_ceil(self.max_payload);
        if total > u16::MAX as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: u16::MAX as usize,
            });
        }

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        let mut packets = Vec::with_capacity(total);
        for number in 0..total {
            let start = number * self.max_payload;
            let end = (start + self.max_payload).min(frame.len());
            packets.push(RtpPacket {
                sequence: self.next_sequence,
                timestamp,
                frame_id,
                total_fragments: total as u16,
                fragment_number: number as u16,
                payload: frame.slice(start..end),
            });
            self.next_sequence += 1;
        }
        Ok(packets)
    }
}

/// A fully reassembled encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteFrame {
    pub frame_id: u64,
    /// Capture timestamp carried by the frame's fragments.
    pub timestamp: u64,
    pub data: Bytes,
}

struct PartialFrame {
    timestamp: u64,
    total: u16,
    received: u16,
    fragments: Vec<Option<Bytes>>,
}

/// Reassembles RTP fragments into complete frames.
///
/// Holds at most [`MAX_PENDING_FRAMES`] partial frames; when the bound is
/// exceeded the oldest partial frame is evicted and counted as lost.
#[derive(Default)]
pub struct FrameAssembler {
    pending: HashMap<u64, PartialFrame>,
    // Frame ids in first-fragment arrival order, for oldest-first eviction.
    arrival: VecDeque<u64>,
    evicted: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partial frames evicted before completing, since construction or the
    /// last [`clear`](Self::clear).
    pub fn evicted_frames(&self) -> u64 {
        self.evicted
    }

    /// Partial frames currently in flight.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Discard all partial frames without counting them as evicted.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.arrival.clear();
        self.evicted = 0;
    }

    /// Add one fragment; returns the reassembled frame once all of its
    /// fragments have arrived. Malformed fragments (zero or inconsistent
    /// totals, out-of-range fragment numbers) and duplicates are dropped.
    pub fn insert(&mut self, packet: RtpPacket) -> Option<CompleteFrame> {
        let total = packet.total_fragments;
        if total == 0 || packet.fragment_number >= total {
            log::warn!(
                "dropping malformed fragment {}/{} of frame {}",
                packet.fragment_number,
                total,
                packet.frame_id
            );
            return None;
        }

        // Whole frame in a single fragment: no bookkeeping needed.
        if total == 1 {
            return Some(CompleteFrame {
                frame_id: packet.frame_id,
                timestamp: packet.timestamp,
                data: packet.payload,
            });
        }

        let frame_id = packet.frame_id;
        if !self.pending.contains_key(&frame_id) {
            self.evict_to_capacity();
            self.arrival.push_back(frame_id);
            self.pending.insert(
                frame_id,
                PartialFrame {
                    timestamp: packet.timestamp,
                    total,
                    received: 0,
                    fragments: vec![None; total as usize],
                },
            );
        }

        let partial = self.pending.get_mut(&frame_id).expect("entry just ensured");
        if partial.total != total {
            log::warn!(
                "fragment of frame {frame_id} declares {total} fragments, expected {}",
                partial.total
            );
            return None;
        }

        let slot = &mut partial.fragments[packet.fragment_number as usize];
        if slot.is_some() {
            return None; // duplicate fragment
        }
        *slot = Some(packet.payload);
        partial.received += 1;

        if partial.received < partial.total {
            return None;
        }

        let partial = self.pending.remove(&frame_id).expect("frame just updated");
        self.arrival.retain(|id| *id != frame_id);

        let mut data = BytesMut::new();
        for fragment in partial.fragments {
            data.extend_from_slice(&fragment.expect("all fragments received"));
        }
        Some(CompleteFrame {
            frame_id,
            timestamp: partial.timestamp,
            data: data.freeze(),
        })
    }

    fn evict_to_capacity(&mut self) {
        while self.pending.len() >= MAX_PENDING_FRAMES {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            if self.pending.remove(&oldest).is_some() {
                self.evicted += 1;
                log::debug!("evicted stale partial frame {oldest}");
            }
        }
    }
}
