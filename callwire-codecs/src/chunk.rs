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

//! Fundamental data structures for encoded media chunks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The type of an encoded frame, indicating its dependency on other frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Decodable independently of any other frame.
    Key,
    /// Depends on the preceding frames having been decoded.
    Delta,
}

/// One encoded media chunk (a reassembled audio or video frame) as handed
/// to a playback buffer.
///
/// The chunk owns its payload; dropping it releases the data, whether the
/// chunk was played, discarded, or swept out by a buffer clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Frame ordinal within the stream; contiguous for video streams and
    /// used for gap accounting.
    pub sequence: u64,
    /// Capture timestamp in media clock units (milliseconds).
    pub timestamp: u64,
    /// Key/delta classification. Audio chunks are conventionally
    /// [`FrameKind::Delta`]; they carry no inter-frame dependency.
    pub frame_kind: FrameKind,
    /// The encoded payload.
    pub data: Bytes,
}

impl MediaChunk {
    pub fn is_keyframe(&self) -> bool {
        self.frame_kind == FrameKind::Key
    }
}
