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

//! The transport seam: a bidirectional byte-message channel.
//!
//! The pipeline only assumes "send bytes" on the way out and a stream of
//! raw inbound buffers on the way in; concrete WebSocket/QUIC clients plug
//! in behind [`Transport`]. [`ChannelTransport`] is the in-memory
//! implementation used for loopback wiring and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Why a transport stopped: a deliberate local/remote close, or a death
/// detected by the liveness monitor. The two have different recovery
/// policy (a lost connection is the caller's cue to reconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Clean,
    Lost,
}

/// A bidirectional byte-message channel.
///
/// Sends are non-blocking and fire-and-forget; inbound buffers arrive on
/// the receiver handed out by the concrete implementation.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Close the transport. Idempotent; only the first reason is kept.
    fn close(&self, reason: CloseReason);
}

/// In-memory transport over a tokio channel.
#[derive(Clone)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    open: Arc<AtomicBool>,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
}

impl ChannelTransport {
    /// Create a transport plus the receiving end of everything sent
    /// through it (the "network side").
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelTransport {
                outbound: tx,
                open: Arc::new(AtomicBool::new(true)),
                close_reason: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// The reason this transport was closed, if it has been.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock().unwrap()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self, reason: CloseReason) {
        if self.open.swap(false, Ordering::AcqRel) {
            *self.close_reason.lock().unwrap() = Some(reason);
            log::info!("transport closed: {reason:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_close_fails() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.send(Bytes::from_static(b"one")).unwrap();
        transport.close(CloseReason::Clean);

        assert!(!transport.is_open());
        assert_eq!(
            transport.send(Bytes::from_static(b"two")),
            Err(TransportError::Closed)
        );
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn first_close_reason_wins() {
        let (transport, _rx) = ChannelTransport::new();
        transport.close(CloseReason::Lost);
        transport.close(CloseReason::Clean);
        assert_eq!(transport.close_reason(), Some(CloseReason::Lost));
    }
}
