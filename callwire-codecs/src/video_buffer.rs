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

//! The video playback buffer: presentation-time scheduling plus the video
//! specifics — keyframe gating, sequence-gap drop accounting, and an FPS
//! counter.
//!
//! A decoder cannot produce correct output from delta frames alone, so
//! until the first keyframe of a stream epoch arrives every chunk is
//! discarded outright rather than buffered indefinitely. A decode error
//! ends the epoch: the decoder is reset and the buffer cleared, and the
//! keyframe gate re-arms.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use callwire_diagnostics::metric;
use serde::{Deserialize, Serialize};

use crate::chunk::MediaChunk;
use crate::decoder::Decodable;
use crate::sched::Scheduled;
use crate::BufferState;

/// Default fixed end-to-end delay added to every chunk's capture timestamp.
pub const DEFAULT_PLAYOUT_DELAY_MS: u64 = 150;

/// Frames held before new delta frames are rejected.
const MAX_BUFFERED_FRAMES: usize = 200;

/// Per-stream video playback statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    /// Chunks accepted into the buffer.
    pub received: u64,
    /// Chunks handed to the decoder.
    pub decoded: u64,
    /// Frames lost: sequence gaps observed at drain time plus frames
    /// swept out by overflow handling.
    pub dropped: u64,
    /// Delta frames discarded while waiting for the epoch's first keyframe.
    pub discarded_pre_keyframe: u64,
    /// Decoder failures. Survives buffer clears, unlike the rest.
    pub decode_errors: u64,
    /// Frames decoded during the last complete wall-clock second.
    pub fps: u64,
}

impl VideoStats {
    /// Estimated fraction of frames lost in transit.
    pub fn drop_rate(&self) -> f64 {
        let seen = self.decoded + self.dropped;
        if seen == 0 {
            0.0
        } else {
            self.dropped as f64 / seen as f64
        }
    }
}

/// Timestamp-ordered video buffer owning its decoder.
pub struct VideoPlaybackBuffer {
    heap: BinaryHeap<Reverse<Scheduled>>,
    decoder: Box<dyn Decodable>,
    stream_id: String,
    playout_delay_ms: u64,
    has_received_keyframe: bool,
    last_decoded_ordinal: Option<u64>,
    stats: VideoStats,
    window_start_ms: u64,
    frames_in_window: u64,
}

impl VideoPlaybackBuffer {
    pub fn new(stream_id: impl Into<String>, decoder: Box<dyn Decodable>) -> Self {
        Self::with_playout_delay(stream_id, decoder, DEFAULT_PLAYOUT_DELAY_MS)
    }

    pub fn with_playout_delay(
        stream_id: impl Into<String>,
        decoder: Box<dyn Decodable>,
        playout_delay_ms: u64,
    ) -> Self {
        VideoPlaybackBuffer {
            heap: BinaryHeap::new(),
            decoder,
            stream_id: stream_id.into(),
            playout_delay_ms,
            has_received_keyframe: false,
            last_decoded_ordinal: None,
            stats: VideoStats::default(),
            window_start_ms: 0,
            frames_in_window: 0,
        }
    }

    pub fn stats(&self) -> VideoStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.heap.len()
    }

    /// Whether decode is still gated on the epoch's first keyframe.
    pub fn is_awaiting_keyframe(&self) -> bool {
        !self.has_received_keyframe
    }

    pub fn state(&self, now_ms: u64) -> BufferState {
        match self.heap.peek() {
            None => BufferState::Empty,
            Some(Reverse(next)) if next.playout_at_ms <= now_ms => BufferState::Draining,
            Some(_) => BufferState::Buffering,
        }
    }

    /// Insert a chunk, scheduled at `capture timestamp + playout delay`.
    ///
    /// Chunks ahead of the epoch's first keyframe are discarded. When the
    /// buffer is full a keyframe flushes everything older (the stream can
    /// restart cleanly from it); a delta frame is rejected instead.
    pub fn push(&mut self, chunk: MediaChunk) {
        if !self.has_received_keyframe {
            if chunk.is_keyframe() {
                self.has_received_keyframe = true;
            } else {
                self.stats.discarded_pre_keyframe += 1;
                log::debug!(
                    "discarding pre-keyframe chunk {} on {}",
                    chunk.sequence,
                    self.stream_id
                );
                return;
            }
        }

        if self.heap.len() >= MAX_BUFFERED_FRAMES {
            if chunk.is_keyframe() {
                let swept = self.heap.len() as u64;
                self.heap.clear();
                self.stats.dropped += swept;
                log::debug!(
                    "video buffer full on {}, keyframe {} flushed {swept} frames",
                    self.stream_id,
                    chunk.sequence
                );
            } else {
                self.stats.dropped += 1;
                return;
            }
        }

        self.stats.received += 1;
        self.heap.push(Reverse(Scheduled {
            playout_at_ms: chunk.timestamp + self.playout_delay_ms,
            ordinal: chunk.sequence,
            chunk,
        }));
    }

    /// Dispatch every due chunk to the decoder in presentation order.
    ///
    /// Sequence gaps between consecutively drained chunks are accounted as
    /// dropped frames. A decoder failure resets the decoder, clears the
    /// buffer, and re-arms the keyframe gate. Returns the number of chunks
    /// decoded.
    pub fn drain_ready(&mut self, now_ms: u64) -> usize {
        let mut dispatched = 0;
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.playout_at_ms > now_ms {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry");

            if let Some(last) = self.last_decoded_ordinal {
                if entry.ordinal <= last {
                    // Stale duplicate that arrived after its successor played.
                    continue;
                }
                self.stats.dropped += entry.ordinal - last - 1;
            }

            match self.decoder.decode(entry.chunk) {
                Ok(()) => {
                    self.last_decoded_ordinal = Some(entry.ordinal);
                    self.stats.decoded += 1;
                    self.frames_in_window += 1;
                    dispatched += 1;
                }
                Err(e) => {
                    log::error!(
                        "video decode failed on {}: {e}; resetting decoder and buffer",
                        self.stream_id
                    );
                    self.decoder.reset();
                    let errors = self.stats.decode_errors + 1;
                    self.clear_buffer();
                    self.stats.decode_errors = errors;
                    break;
                }
            }
        }
        self.roll_fps_window(now_ms);
        dispatched
    }

    /// Discard all buffered chunks and reset per-stream statistics; the
    /// keyframe gate re-arms for the next epoch. Used on stream restart
    /// and after decoder errors.
    pub fn clear_buffer(&mut self) {
        self.heap.clear();
        self.has_received_keyframe = false;
        self.last_decoded_ordinal = None;
        let errors = self.stats.decode_errors;
        self.stats = VideoStats {
            decode_errors: errors,
            ..VideoStats::default()
        };
        self.window_start_ms = 0;
        self.frames_in_window = 0;
    }

    fn roll_fps_window(&mut self, now_ms: u64) {
        if self.window_start_ms == 0 {
            self.window_start_ms = now_ms;
            return;
        }
        if now_ms.saturating_sub(self.window_start_ms) < 1000 {
            return;
        }
        self.stats.fps = self.frames_in_window;
        callwire_diagnostics::emit(
            "video-buffer",
            Some(self.stream_id.clone()),
            vec![
                metric!("fps", self.stats.fps),
                metric!("drop_rate", self.stats.drop_rate()),
                metric!("buffered", self.heap.len()),
                metric!("awaiting_keyframe", u64::from(self.is_awaiting_keyframe())),
            ],
        );
        self.window_start_ms = now_ms;
        self.frames_in_window = 0;
    }
}
