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

//! The audio playback buffer: reorders incoming chunks by presentation
//! time and dispatches them to the decoder once due.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use callwire_diagnostics::metric;
use serde::{Deserialize, Serialize};

use crate::chunk::MediaChunk;
use crate::decoder::Decodable;
use crate::sched::Scheduled;
use crate::BufferState;

/// Default fixed end-to-end delay added to every chunk's capture
/// timestamp. Large enough to absorb typical arrival jitter.
pub const DEFAULT_PLAYOUT_DELAY_MS: u64 = 120;

/// Chunks held before the oldest is dropped to make room.
const MAX_BUFFERED_CHUNKS: usize = 200;

/// Per-stream audio playback statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStats {
    pub received: u64,
    pub played: u64,
    pub dropped: u64,
    pub decode_errors: u64,
}

/// Timestamp-ordered audio buffer owning its decoder.
///
/// `push` may be called from a network-receive context while a periodic
/// timer calls `drain_ready`; the buffer itself is single-owner and the
/// caller provides the locking.
pub struct AudioPlaybackBuffer {
    heap: BinaryHeap<Reverse<Scheduled>>,
    decoder: Box<dyn Decodable>,
    stream_id: String,
    playout_delay_ms: u64,
    stats: AudioStats,
    window_start_ms: u64,
    played_in_window: u64,
}

impl AudioPlaybackBuffer {
    pub fn new(stream_id: impl Into<String>, decoder: Box<dyn Decodable>) -> Self {
        Self::with_playout_delay(stream_id, decoder, DEFAULT_PLAYOUT_DELAY_MS)
    }

    pub fn with_playout_delay(
        stream_id: impl Into<String>,
        decoder: Box<dyn Decodable>,
        playout_delay_ms: u64,
    ) -> Self {
        AudioPlaybackBuffer {
            heap: BinaryHeap::new(),
            decoder,
            stream_id: stream_id.into(),
            playout_delay_ms,
            stats: AudioStats::default(),
            window_start_ms: 0,
            played_in_window: 0,
        }
    }

    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.heap.len()
    }

    pub fn state(&self, now_ms: u64) -> BufferState {
        match self.heap.peek() {
            None => BufferState::Empty,
            Some(Reverse(next)) if next.playout_at_ms <= now_ms => BufferState::Draining,
            Some(_) => BufferState::Buffering,
        }
    }

    /// Insert a chunk, scheduled at `capture timestamp + playout delay`.
    pub fn push(&mut self, chunk: MediaChunk) {
        self.stats.received += 1;
        if self.heap.len() >= MAX_BUFFERED_CHUNKS {
            // Keep the freshest audio; the oldest chunk is the least useful.
            self.heap.pop();
            self.stats.dropped += 1;
            log::debug!("audio buffer full on {}, dropped oldest chunk", self.stream_id);
        }
        self.heap.push(Reverse(Scheduled {
            playout_at_ms: chunk.timestamp + self.playout_delay_ms,
            ordinal: chunk.sequence,
            chunk,
        }));
    }

    /// Dispatch every chunk whose presentation time has arrived, in
    /// strictly increasing presentation order. Returns the number of
    /// chunks handed to the decoder.
    pub fn drain_ready(&mut self, now_ms: u64) -> usize {
        let mut dispatched = 0;
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.playout_at_ms > now_ms {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry");
            match self.decoder.decode(entry.chunk) {
                Ok(()) => {
                    self.stats.played += 1;
                    self.played_in_window += 1;
                    dispatched += 1;
                }
                Err(e) => {
                    log::warn!("audio decode failed on {}: {e}", self.stream_id);
                    self.stats.decode_errors += 1;
                    self.decoder.reset();
                }
            }
        }
        self.publish_window(now_ms);
        dispatched
    }

    /// Discard all buffered chunks and reset per-stream statistics. Used
    /// on stream restart.
    pub fn clear_buffer(&mut self) {
        self.heap.clear();
        self.stats = AudioStats::default();
        self.played_in_window = 0;
        self.window_start_ms = 0;
    }

    fn publish_window(&mut self, now_ms: u64) {
        if self.window_start_ms == 0 {
            self.window_start_ms = now_ms;
            return;
        }
        if now_ms.saturating_sub(self.window_start_ms) < 1000 {
            return;
        }
        callwire_diagnostics::emit(
            "audio-buffer",
            Some(self.stream_id.clone()),
            vec![
                metric!("chunks_per_sec", self.played_in_window),
                metric!("buffered", self.heap.len()),
                metric!("dropped", self.stats.dropped),
                metric!("decode_errors", self.stats.decode_errors),
            ],
        );
        self.window_start_ms = now_ms;
        self.played_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FrameKind;
    use crate::error::CodecError;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    struct MockDecoder {
        decoded: Arc<Mutex<Vec<MediaChunk>>>,
        fail: bool,
    }

    impl Decodable for MockDecoder {
        fn decode(&mut self, chunk: MediaChunk) -> crate::error::Result<()> {
            if self.fail {
                return Err(CodecError::Decode("mock failure".into()));
            }
            self.decoded.lock().unwrap().push(chunk);
            Ok(())
        }

        fn reset(&mut self) {
            self.fail = false;
        }
    }

    fn buffer_with_delay(delay_ms: u64) -> (AudioPlaybackBuffer, Arc<Mutex<Vec<MediaChunk>>>) {
        let decoded = Arc::new(Mutex::new(Vec::new()));
        let decoder = Box::new(MockDecoder {
            decoded: decoded.clone(),
            fail: false,
        });
        (
            AudioPlaybackBuffer::with_playout_delay("peer-a", decoder, delay_ms),
            decoded,
        )
    }

    fn chunk(sequence: u64, timestamp: u64) -> MediaChunk {
        MediaChunk {
            sequence,
            timestamp,
            frame_kind: FrameKind::Delta,
            data: Bytes::from_static(b"opus"),
        }
    }

    #[test]
    fn drains_in_presentation_order_despite_arrival_order() {
        let (mut buffer, decoded) = buffer_with_delay(50);
        buffer.push(chunk(3, 300));
        buffer.push(chunk(1, 100));
        buffer.push(chunk(2, 200));

        buffer.drain_ready(1_000);
        let order: Vec<u64> = decoded.lock().unwrap().iter().map(|c| c.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn never_plays_early() {
        let (mut buffer, decoded) = buffer_with_delay(100);
        buffer.push(chunk(1, 500)); // due at 600
        buffer.push(chunk(2, 700)); // due at 800

        assert_eq!(buffer.drain_ready(599), 0);
        assert!(decoded.lock().unwrap().is_empty());
        assert_eq!(buffer.state(599), BufferState::Buffering);

        assert_eq!(buffer.drain_ready(600), 1);
        assert_eq!(decoded.lock().unwrap().len(), 1);

        assert_eq!(buffer.drain_ready(800), 1);
        assert_eq!(decoded.lock().unwrap().len(), 2);
        assert_eq!(buffer.state(800), BufferState::Empty);
    }

    #[test]
    fn overflow_drops_oldest_chunk() {
        let (mut buffer, _decoded) = buffer_with_delay(0);
        for seq in 0..MAX_BUFFERED_CHUNKS as u64 {
            buffer.push(chunk(seq, seq * 20));
        }
        buffer.push(chunk(999, 999 * 20));
        assert_eq!(buffer.buffered(), MAX_BUFFERED_CHUNKS);
        assert_eq!(buffer.stats().dropped, 1);
        assert_eq!(buffer.stats().received, MAX_BUFFERED_CHUNKS as u64 + 1);
    }

    #[test]
    fn decode_error_is_counted_and_decoder_reset() {
        let decoded = Arc::new(Mutex::new(Vec::new()));
        let decoder = Box::new(MockDecoder {
            decoded: decoded.clone(),
            fail: true,
        });
        let mut buffer = AudioPlaybackBuffer::with_playout_delay("peer-a", decoder, 0);
        buffer.push(chunk(1, 0));
        buffer.push(chunk(2, 10));
        buffer.drain_ready(1_000);

        // First chunk fails and resets the decoder; the second decodes.
        assert_eq!(buffer.stats().decode_errors, 1);
        assert_eq!(buffer.stats().played, 1);
        assert_eq!(decoded.lock().unwrap().len(), 1);
    }

    #[test]
    fn clear_resets_chunks_and_stats() {
        let (mut buffer, _decoded) = buffer_with_delay(0);
        buffer.push(chunk(1, 0));
        buffer.drain_ready(100);
        buffer.push(chunk(2, 200));
        assert_ne!(buffer.stats(), AudioStats::default());

        buffer.clear_buffer();
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.stats(), AudioStats::default());
        assert_eq!(buffer.state(0), BufferState::Empty);
    }
}
