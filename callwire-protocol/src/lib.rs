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

//! Wire protocol for the callwire media transport.
//!
//! - [`wire`] — binary packet encoding/decoding (RTP, FEC, NACK, PING, PONG)
//! - [`fec`] — interleaved adaptive XOR forward-error-correction
//! - [`fragment`] — frame packetization and reassembly

pub mod fec;
pub mod fragment;
pub mod wire;

pub use fec::{decide_group_size, recover_packet, AdaptiveFecEncoder, NetworkStats};
pub use fragment::{CompleteFrame, FrameAssembler, Packetizer, ProtocolError};
pub use wire::{FecPacket, NackPacket, Packet, PingPacket, PongPacket, RtpPacket};
