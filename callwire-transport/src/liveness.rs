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

//! Heartbeat liveness detection, independent of the media path.
//!
//! [`LivenessState`] is the pure state machine: each tick sends a ping
//! stamped with the current time and arms a per-ping deadline; a matching
//! pong cancels the deadline and clears the missed counter; enough expired
//! deadlines declare the connection lost — exactly once, after which no
//! further pings are sent. [`HeartbeatMonitor`] drives the machine on a
//! tokio interval against a [`Transport`].

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use callwire_diagnostics::metric;
use callwire_protocol::wire::{Packet, PingPacket, PongPacket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::session::SessionEvent;
use crate::transport::{CloseReason, Transport};

#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    /// Ping cadence.
    pub ping_interval_ms: u64,
    /// Deadline for each ping's pong.
    pub pong_timeout_ms: u64,
    /// Missed pongs that declare the connection lost.
    pub max_missed: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig {
            ping_interval_ms: 1_000,
            pong_timeout_ms: 2_000,
            max_missed: 1,
        }
    }
}

/// An action the driver must carry out against the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessEvent {
    SendPing(PingPacket),
    SendPong(PongPacket),
    ConnectionLost,
}

#[derive(Debug)]
struct PendingPing {
    timestamp: u64,
    deadline_ms: u64,
}

/// Pure heartbeat state machine. All clocks are caller-supplied
/// milliseconds, so behavior is fully deterministic under test.
pub struct LivenessState {
    config: LivenessConfig,
    // Outstanding pings in send order; deadlines are monotonic.
    pending: VecDeque<PendingPing>,
    missed: u32,
    lost: bool,
}

impl LivenessState {
    pub fn new(config: LivenessConfig) -> Self {
        LivenessState {
            config,
            pending: VecDeque::new(),
            missed: 0,
            lost: false,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Advance the clock: expire overdue pings, then either declare the
    /// connection lost or send the next ping.
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<LivenessEvent> {
        if self.lost {
            return Vec::new();
        }

        while let Some(front) = self.pending.front() {
            if front.deadline_ms > now_ms {
                break;
            }
            let expired = self.pending.pop_front().expect("peeked entry");
            self.missed += 1;
            log::warn!(
                "ping {} went unanswered ({} missed)",
                expired.timestamp,
                self.missed
            );
        }

        if self.missed >= self.config.max_missed {
            self.lost = true;
            self.pending.clear();
            return vec![LivenessEvent::ConnectionLost];
        }

        self.pending.push_back(PendingPing {
            timestamp: now_ms,
            deadline_ms: now_ms + self.config.pong_timeout_ms,
        });
        vec![LivenessEvent::SendPing(PingPacket {
            timestamp: now_ms,
            payload: Bytes::new(),
        })]
    }

    /// A peer ping is echoed back immediately with the same timestamp.
    pub fn on_ping(&self, ping: &PingPacket) -> LivenessEvent {
        LivenessEvent::SendPong(PongPacket {
            timestamp: ping.timestamp,
            payload: ping.payload.clone(),
        })
    }

    /// Match a pong against its pending ping. Returns the measured
    /// round-trip time when the pong matched an outstanding ping.
    pub fn on_pong(&mut self, pong: &PongPacket, now_ms: u64) -> Option<u64> {
        let position = self
            .pending
            .iter()
            .position(|p| p.timestamp == pong.timestamp)?;
        self.pending.remove(position);
        self.missed = 0;
        Some(now_ms.saturating_sub(pong.timestamp))
    }
}

/// Inbound heartbeat traffic the session routes to the monitor.
#[derive(Debug)]
pub enum HeartbeatInbound {
    Ping(PingPacket),
    Pong(PongPacket),
}

/// Async driver for [`LivenessState`].
///
/// Owns a periodic task that pings the transport and reacts to routed
/// inbound heartbeat packets. On a lost connection it closes the
/// transport with [`CloseReason::Lost`] and emits
/// [`SessionEvent::ConnectionLost`] before exiting.
pub struct HeartbeatMonitor {
    inbound: mpsc::UnboundedSender<HeartbeatInbound>,
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: LivenessConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (inbound, mut inbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let epoch = Instant::now();
            let now_ms = move || epoch.elapsed().as_millis() as u64;
            let mut state = LivenessState::new(config);
            let mut ticker = interval(Duration::from_millis(config.ping_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !transport.is_open() {
                            log::debug!("heartbeat stopping: transport closed");
                            return;
                        }
                        for event in state.on_tick(now_ms()) {
                            if !apply(&*transport, &events, event) {
                                return;
                            }
                        }
                    }
                    message = inbound_rx.recv() => match message {
                        Some(HeartbeatInbound::Ping(ping)) => {
                            let reply = state.on_ping(&ping);
                            if !apply(&*transport, &events, reply) {
                                return;
                            }
                        }
                        Some(HeartbeatInbound::Pong(pong)) => {
                            if let Some(rtt_ms) = state.on_pong(&pong, now_ms()) {
                                callwire_diagnostics::emit(
                                    "heartbeat",
                                    None,
                                    vec![metric!("rtt_ms", rtt_ms)],
                                );
                            }
                        }
                        None => return,
                    }
                }
            }
        });
        HeartbeatMonitor { inbound, task }
    }

    /// Route an inbound heartbeat packet to the monitor task.
    pub fn handle_inbound(&self, message: HeartbeatInbound) {
        let _ = self.inbound.send(message);
    }

    /// A sender the session's inbound loop uses to route heartbeat
    /// packets here.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<HeartbeatInbound> {
        self.inbound.clone()
    }

    /// Stop the periodic task. Must be called (or the monitor dropped)
    /// before the owning session is discarded.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Carry out one state-machine action. Returns `false` when the monitor
/// should exit.
fn apply(
    transport: &dyn Transport,
    events: &mpsc::UnboundedSender<SessionEvent>,
    event: LivenessEvent,
) -> bool {
    match event {
        LivenessEvent::SendPing(ping) => {
            if let Err(e) = transport.send(Packet::Ping(ping).encode()) {
                log::warn!("failed to send ping: {e}");
            }
            true
        }
        LivenessEvent::SendPong(pong) => {
            if let Err(e) = transport.send(Packet::Pong(pong).encode()) {
                log::warn!("failed to send pong: {e}");
            }
            true
        }
        LivenessEvent::ConnectionLost => {
            log::error!("heartbeat timed out, declaring connection lost");
            transport.close(CloseReason::Lost);
            let _ = events.send(SessionEvent::ConnectionLost);
            false
        }
    }
}
