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

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors surfaced by decoders and playback buffers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("decoder error: {0}")]
    Decode(String),

    #[error("decoder is not configured")]
    NotConfigured,

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}
