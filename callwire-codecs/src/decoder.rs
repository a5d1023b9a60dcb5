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

//! The decoder seam between playback buffers and concrete codecs.

use crate::chunk::{FrameKind, MediaChunk};
use crate::error::Result;

/// A push-based decoder sink.
///
/// The playback buffer owns timing: it decides *when* a chunk is handed
/// over, the decoder only turns encoded chunks into raw frames and hands
/// them to its own output. A failed decode is reported back so the caller
/// can tear the decoder down; [`reset`](Decodable::reset) must leave the
/// decoder as if freshly constructed (decoders are recreated rather than
/// resumed after corruption).
pub trait Decodable: Send {
    fn decode(&mut self, chunk: MediaChunk) -> Result<()>;

    fn reset(&mut self);
}

/// Classifies raw encoded frames as key or delta frames.
///
/// Reassembled frames arrive off the wire without a frame-type marker;
/// the classification is codec-specific bitstream inspection, so it lives
/// behind a seam the decoder integration provides.
pub trait FrameClassifier: Send {
    fn classify(&self, data: &[u8]) -> FrameKind;
}

/// Treats every frame as a delta frame. Suitable for audio, where chunks
/// carry no inter-frame dependency.
pub struct NoKeyframes;

impl FrameClassifier for NoKeyframes {
    fn classify(&self, _data: &[u8]) -> FrameKind {
        FrameKind::Delta
    }
}
