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

//! Lightweight diagnostics event bus shared across the media pipeline.
//!
//! Producers (playback buffers, pacer, heartbeat monitor) publish
//! [`DiagEvent`]s through [`emit`]; any number of consumers pull them off
//! the bus with [`subscribe`]. Publishing never blocks.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use flume::{Receiver, Sender};

/// A single diagnostics sample from one pipeline component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagEvent {
    /// Sub-system that produced this event (e.g. "pacer", "video-buffer").
    pub subsystem: &'static str,
    /// Optional stream identifier (peer or media stream).
    pub stream: Option<String>,
    /// Unix time in milliseconds when the sample was captured.
    pub ts_ms: u64,
    /// Arbitrary key/value metrics.
    pub metrics: Vec<Metric>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metric {
    pub name: &'static str,
    pub value: MetricValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum MetricValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Text(String),
}

static BUS: Lazy<(Sender<DiagEvent>, Receiver<DiagEvent>)> = Lazy::new(flume::unbounded);

/// Publish an event, stamping it with the current wall-clock time.
pub fn emit(subsystem: &'static str, stream: Option<String>, metrics: Vec<Metric>) {
    let _ = BUS.0.send(DiagEvent {
        subsystem,
        stream,
        ts_ms: now_ms(),
        metrics,
    });
}

/// Obtain a sender that can publish pre-built diagnostics events.
pub fn global_sender() -> &'static Sender<DiagEvent> {
    &BUS.0
}

/// Subscribe to the diagnostics stream. Each subscriber receives **all** future events.
pub fn subscribe() -> Receiver<DiagEvent> {
    BUS.1.clone()
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shorthand for constructing a [`Metric`].
#[macro_export]
macro_rules! metric {
    ($name:expr, $value:expr) => {
        $crate::Metric {
            name: $name,
            value: $crate::MetricValue::from($value),
        }
    };
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::I64(v)
    }
}
impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::U64(v)
    }
}
impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::U64(v as u64)
    }
}
impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::F64(v)
    }
}
impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}
impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_subscriber() {
        let rx = subscribe();
        emit("test", Some("peer-1".into()), vec![metric!("fps", 30u64)]);
        let event = rx.recv().expect("event should be delivered");
        assert_eq!(event.subsystem, "test");
        assert_eq!(event.stream.as_deref(), Some("peer-1"));
        assert_eq!(event.metrics.len(), 1);
        assert_eq!(event.metrics[0].name, "fps");
    }

    #[test]
    fn events_serialize_to_json() {
        let event = DiagEvent {
            subsystem: "pacer",
            stream: None,
            ts_ms: 123,
            metrics: vec![metric!("queued_bytes", 4096usize), metric!("loss", 0.05f64)],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("pacer"));
        assert!(json.contains("queued_bytes"));
    }
}
