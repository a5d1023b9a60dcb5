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

//! Congestion-aware packet pacing.
//!
//! Media encoders and the FEC layer emit packets in bursts; blasting a
//! burst onto the wire invites self-induced congestion. The pacer holds an
//! egress queue and releases it over a series of 5 ms ticks. Under higher
//! measured loss the same backlog is spread over *more* ticks — the
//! network is already struggling, so send less per tick.

use std::collections::VecDeque;

use bytes::Bytes;

/// Drain tick period the session drives the pacer at.
pub const TICK_INTERVAL_MS: u64 = 5;

/// Ticks the backlog is spread over on a clean network.
const MIN_INTERVALS: f64 = 3.0;

/// Ticks the backlog is spread over at or above [`LOSS_THRESHOLD`].
const MAX_INTERVALS: f64 = 6.0;

/// Loss rate at which spreading maxes out.
const LOSS_THRESHOLD: f64 = 0.10;

/// Per-tick budget floor. One MTU, so the queue always makes progress and
/// any wire packet the pipeline produces fits a single tick.
pub const MIN_BUDGET_BYTES: usize = 1500;

/// Ticks the current backlog would be spread over at the given loss rate.
/// Interpolates linearly from [`MIN_INTERVALS`] to [`MAX_INTERVALS`] as
/// loss approaches [`LOSS_THRESHOLD`].
pub fn target_intervals(loss_rate: f64) -> f64 {
    let severity = (loss_rate / LOSS_THRESHOLD).clamp(0.0, 1.0);
    MIN_INTERVALS + (MAX_INTERVALS - MIN_INTERVALS) * severity
}

/// Rate-limited egress queue of encoded packets.
#[derive(Default)]
pub struct PacketPacer {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
}

impl PacketPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet to the egress queue.
    pub fn enqueue(&mut self, frame: Bytes) {
        self.queued_bytes += frame.len();
        self.queue.push_back(frame);
    }

    /// Packets currently queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Bytes currently queued.
    pub fn pending_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// The byte budget one tick may release at the given loss rate.
    pub fn budget(&self, loss_rate: f64) -> usize {
        let spread = (self.queued_bytes as f64 / target_intervals(loss_rate)) as usize;
        spread.max(MIN_BUDGET_BYTES)
    }

    /// Release one tick's worth of packets, oldest first.
    ///
    /// Packets are never fragmented: a packet larger than the remaining
    /// budget stays queued until a future tick.
    pub fn drain(&mut self, loss_rate: f64) -> Vec<Bytes> {
        let budget = self.budget(loss_rate);
        let mut sent = 0usize;
        let mut out = Vec::new();
        while let Some(front) = self.queue.front() {
            if sent + front.len() > budget {
                break;
            }
            let frame = self.queue.pop_front().expect("peeked entry");
            sent += frame.len();
            self.queued_bytes -= frame.len();
            out.push(frame);
        }
        out
    }

    /// Drop everything queued. Used when the stream is torn down.
    pub fn stop(&mut self) {
        if !self.queue.is_empty() {
            log::debug!("pacer stopped with {} packets queued", self.queue.len());
        }
        self.reset();
    }

    /// Drop everything queued.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
    }
}
