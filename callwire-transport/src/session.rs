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

//! One media stream over one transport: the [`MediaSession`] owns a
//! packetizer, FEC encoder, pacer, playback buffer, and heartbeat monitor,
//! constructed at session start and torn down together.
//!
//! Outbound: `frame → packetize → FEC → pacer → transport`.
//! Inbound: `bytes → decode → FEC recovery → reassembly → playback buffer`.
//! Three periodic tasks (pacer, buffer drain, heartbeat) run independently
//! and never block the enqueue paths; all are stopped on shutdown and on
//! drop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use callwire_codecs::audio_buffer::AudioPlaybackBuffer;
use callwire_codecs::chunk::{FrameKind, MediaChunk};
use callwire_codecs::decoder::FrameClassifier;
use callwire_codecs::video_buffer::VideoPlaybackBuffer;
use callwire_diagnostics::metric;
use callwire_protocol::fec::{recover_packet, AdaptiveFecEncoder};
use callwire_protocol::fragment::{CompleteFrame, FrameAssembler, Packetizer};
use callwire_protocol::wire::{NackPacket, Packet, RtpPacket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::liveness::{HeartbeatInbound, HeartbeatMonitor, LivenessConfig};
use crate::pacer::{PacketPacer, TICK_INTERVAL_MS};
use crate::stats::SharedNetworkStats;
use crate::transport::{CloseReason, Transport};

/// Notifications surfaced to the session's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The heartbeat monitor declared the transport dead. Recoverable:
    /// the owner is expected to reconnect.
    ConnectionLost,
    /// The session was closed deliberately.
    Closed,
}

/// The playback side of a session: one buffer variant per media type.
pub enum MediaSink {
    Audio(AudioPlaybackBuffer),
    Video {
        buffer: VideoPlaybackBuffer,
        classifier: Box<dyn FrameClassifier>,
    },
}

impl MediaSink {
    fn push_complete(&mut self, frame: CompleteFrame) {
        match self {
            MediaSink::Audio(buffer) => buffer.push(MediaChunk {
                sequence: frame.frame_id,
                timestamp: frame.timestamp,
                frame_kind: FrameKind::Delta,
                data: frame.data,
            }),
            MediaSink::Video { buffer, classifier } => {
                let frame_kind = classifier.classify(&frame.data);
                buffer.push(MediaChunk {
                    sequence: frame.frame_id,
                    timestamp: frame.timestamp,
                    frame_kind,
                    data: frame.data,
                });
            }
        }
    }

    fn drain_ready(&mut self, now_ms: u64) -> usize {
        match self {
            MediaSink::Audio(buffer) => buffer.drain_ready(now_ms),
            MediaSink::Video { buffer, .. } => buffer.drain_ready(now_ms),
        }
    }

    fn clear(&mut self) {
        match self {
            MediaSink::Audio(buffer) => buffer.clear_buffer(),
            MediaSink::Video { buffer, .. } => buffer.clear_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub liveness: LivenessConfig,
    /// Pacer drain cadence.
    pub pacer_tick_ms: u64,
    /// Playback buffer drain cadence.
    pub drain_tick_ms: u64,
    /// Received RTP packets kept for FEC recovery.
    pub recent_packet_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            liveness: LivenessConfig::default(),
            pacer_tick_ms: TICK_INTERVAL_MS,
            drain_tick_ms: 10,
            recent_packet_window: 512,
        }
    }
}

struct OutboundPipeline {
    packetizer: Packetizer,
    fec: AdaptiveFecEncoder,
}

/// A live media stream bound to one transport.
pub struct MediaSession {
    transport: Arc<dyn Transport>,
    outbound: Mutex<OutboundPipeline>,
    pacer: Arc<Mutex<PacketPacer>>,
    sink: Arc<Mutex<MediaSink>>,
    stats: SharedNetworkStats,
    heartbeat: HeartbeatMonitor,
    tasks: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl MediaSession {
    /// Bring up a session over an established transport.
    ///
    /// `inbound` is the transport's stream of raw received buffers;
    /// `stats` is the loss estimator's publication point.
    pub fn start(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        sink: MediaSink,
        stats: SharedNetworkStats,
        config: SessionConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pacer = Arc::new(Mutex::new(PacketPacer::new()));
        let sink = Arc::new(Mutex::new(sink));

        let heartbeat =
            HeartbeatMonitor::spawn(transport.clone(), config.liveness, events_tx.clone());

        let tasks = vec![
            spawn_pacer_task(
                transport.clone(),
                pacer.clone(),
                stats.clone(),
                config.pacer_tick_ms,
            ),
            spawn_drain_task(sink.clone(), config.drain_tick_ms),
            spawn_inbound_task(
                transport.clone(),
                inbound,
                sink.clone(),
                heartbeat.inbound_sender(),
                config.recent_packet_window,
            ),
        ];

        MediaSession {
            transport,
            outbound: Mutex::new(OutboundPipeline {
                packetizer: Packetizer::new(),
                fec: AdaptiveFecEncoder::new(),
            }),
            pacer,
            sink,
            stats,
            heartbeat,
            tasks,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Take the session event stream. Yields each event once; the channel
    /// closes when the session is dropped.
    pub fn take_events(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events_rx.take().expect("events already taken")
    }

    /// Queue one encoded media frame for paced, FEC-protected delivery.
    pub fn send_frame(&self, timestamp_ms: u64, frame: Bytes) -> Result<()> {
        if !self.transport.is_open() {
            bail!("transport is closed");
        }
        let snapshot = self.stats.snapshot();
        let mut outbound = self.outbound.lock().unwrap();
        let packets = outbound
            .packetizer
            .packetize(timestamp_ms, frame)
            .context("packetizing frame")?;

        let mut pacer = self.pacer.lock().unwrap();
        for packet in packets {
            let parity = outbound.fec.process_packet(&packet, &snapshot);
            pacer.enqueue(Packet::Rtp(packet).encode());
            for fec in parity {
                pacer.enqueue(Packet::Fec(fec).encode());
            }
        }
        Ok(())
    }

    /// Packets waiting in the egress queue.
    pub fn pending_egress(&self) -> usize {
        self.pacer.lock().unwrap().pending()
    }

    /// Restart the media stream in place: flush residual FEC state, drop
    /// queued egress, and clear the playback buffer. Used across a
    /// renegotiation while the transport stays up.
    pub fn reset_stream(&self) {
        let mut outbound = self.outbound.lock().unwrap();
        outbound.fec.reset();
        self.pacer.lock().unwrap().reset();
        self.sink.lock().unwrap().clear();
        log::info!("media stream reset");
    }

    /// Stop all periodic tasks and close the transport cleanly.
    pub fn shutdown(&mut self) {
        self.teardown(CloseReason::Clean);
        let _ = self.events_tx.send(SessionEvent::Closed);
    }

    fn teardown(&mut self, reason: CloseReason) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.heartbeat.shutdown();
        self.pacer.lock().unwrap().stop();
        if self.transport.is_open() {
            self.transport.close(reason);
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.teardown(CloseReason::Clean);
    }
}

fn spawn_pacer_task(
    transport: Arc<dyn Transport>,
    pacer: Arc<Mutex<PacketPacer>>,
    stats: SharedNetworkStats,
    tick_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !transport.is_open() {
                return;
            }
            let loss_rate = stats.snapshot().loss_rate;
            let frames = pacer.lock().unwrap().drain(loss_rate);
            for frame in frames {
                if transport.send(frame).is_err() {
                    return;
                }
            }
        }
    })
}

fn spawn_drain_task(sink: Arc<Mutex<MediaSink>>, tick_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let epoch = Instant::now();
        let mut ticker = interval(Duration::from_millis(tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now_ms = epoch.elapsed().as_millis() as u64;
            sink.lock().unwrap().drain_ready(now_ms);
        }
    })
}

fn spawn_inbound_task(
    transport: Arc<dyn Transport>,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    sink: Arc<Mutex<MediaSink>>,
    heartbeat: mpsc::UnboundedSender<HeartbeatInbound>,
    recent_window: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut assembler = FrameAssembler::new();
        let mut recent: BTreeMap<u64, RtpPacket> = BTreeMap::new();

        while let Some(buffer) = inbound.recv().await {
            match Packet::decode(buffer) {
                None => {
                    // A single corrupt packet must not disturb the pipeline.
                    log::debug!("dropping undecodable inbound buffer");
                }
                Some(Packet::Rtp(packet)) => {
                    accept_rtp(packet, &mut recent, &mut assembler, &sink, recent_window);
                }
                Some(Packet::Fec(fec)) => {
                    let missing: Vec<u64> = fec
                        .protected
                        .iter()
                        .filter(|meta| !recent.contains_key(&meta.sequence))
                        .map(|meta| meta.sequence)
                        .collect();
                    match missing.len() {
                        0 => {} // nothing to repair
                        1 => {
                            let available: Vec<RtpPacket> = fec
                                .protected
                                .iter()
                                .filter_map(|meta| recent.get(&meta.sequence).cloned())
                                .collect();
                            match recover_packet(&fec, &available) {
                                Some(recovered) => {
                                    log::debug!(
                                        "fec recovered packet seq {}",
                                        recovered.sequence
                                    );
                                    callwire_diagnostics::emit(
                                        "fec",
                                        None,
                                        vec![metric!("recovered_seq", recovered.sequence)],
                                    );
                                    accept_rtp(
                                        recovered,
                                        &mut recent,
                                        &mut assembler,
                                        &sink,
                                        recent_window,
                                    );
                                }
                                None => report_missing(&*transport, missing),
                            }
                        }
                        _ => report_missing(&*transport, missing),
                    }
                }
                Some(Packet::Nack(nack)) => {
                    // Loss reported by the peer; surfaced for the estimator
                    // and operators, retransmission is not attempted.
                    log::warn!("peer reports {} missing packets", nack.missing.len());
                    callwire_diagnostics::emit(
                        "session",
                        None,
                        vec![metric!("peer_reported_missing", nack.missing.len())],
                    );
                }
                Some(Packet::Ping(ping)) => {
                    let _ = heartbeat.send(HeartbeatInbound::Ping(ping));
                }
                Some(Packet::Pong(pong)) => {
                    let _ = heartbeat.send(HeartbeatInbound::Pong(pong));
                }
            }
        }
    })
}

fn accept_rtp(
    packet: RtpPacket,
    recent: &mut BTreeMap<u64, RtpPacket>,
    assembler: &mut FrameAssembler,
    sink: &Arc<Mutex<MediaSink>>,
    recent_window: usize,
) {
    recent.insert(packet.sequence, packet.clone());
    while recent.len() > recent_window {
        recent.pop_first();
    }
    if let Some(frame) = assembler.insert(packet) {
        sink.lock().unwrap().push_complete(frame);
    }
}

/// An unrecoverable protection group: report the loss upward rather than
/// silently ignoring it.
fn report_missing(transport: &dyn Transport, missing: Vec<u64>) {
    log::warn!(
        "fec group unrecoverable, reporting {} missing packets",
        missing.len()
    );
    let nack = Packet::Nack(NackPacket { missing });
    if let Err(e) = transport.send(nack.encode()) {
        log::debug!("failed to send nack: {e}");
    }
}
