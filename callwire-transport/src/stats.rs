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

//! Shared loss/RTT snapshot handoff between the external estimator and
//! the pipeline.

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use callwire_protocol::fec::NetworkStats;

/// Wait-free publication point for [`NetworkStats`].
///
/// The estimator's writer calls [`publish`](Self::publish); FEC encoding
/// and pacing read [`snapshot`](Self::snapshot) on every packet/tick and
/// must never block on the writer.
#[derive(Clone)]
pub struct SharedNetworkStats {
    inner: Arc<ArcSwap<NetworkStats>>,
}

impl Default for SharedNetworkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedNetworkStats {
    pub fn new() -> Self {
        SharedNetworkStats {
            inner: Arc::new(ArcSwap::from_pointee(NetworkStats::default())),
        }
    }

    pub fn publish(&self, stats: NetworkStats) {
        self.inner.store(Arc::new(stats));
    }

    pub fn snapshot(&self) -> NetworkStats {
        **self.inner.load()
    }
}
