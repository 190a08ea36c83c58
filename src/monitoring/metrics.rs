// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Populated repository slots.
    pub blocks_stored: IntGauge,
    /// Peers currently tracked by the registry.
    pub peers_tracked: IntGauge,

    /// Blocks accepted and written across all sessions.
    pub blocks_stored_total: IntCounter,
    /// Blocks served to peers (want fulfilments).
    pub blocks_relayed_total: IntCounter,
    /// Sessions completed, any outcome.
    pub sessions_total: IntCounter,
    /// Sessions that closed with a nonzero exit code.
    pub session_failures_total: IntCounter,
    /// Offered blocks dropped at the verification gate.
    pub verify_failures_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let blocks_stored = IntGauge::new("driftnet_blocks_stored", "Populated repository slots")
            .map_err(|_| MetricsError::Prom)?;
        let peers_tracked = IntGauge::new("driftnet_peers_tracked", "Peers currently tracked")
            .map_err(|_| MetricsError::Prom)?;

        let blocks_stored_total =
            IntCounter::new("driftnet_blocks_stored_total", "Blocks accepted and written")
                .map_err(|_| MetricsError::Prom)?;
        let blocks_relayed_total =
            IntCounter::new("driftnet_blocks_relayed_total", "Blocks served to peers")
                .map_err(|_| MetricsError::Prom)?;
        let sessions_total = IntCounter::new("driftnet_sessions_total", "Sessions completed")
            .map_err(|_| MetricsError::Prom)?;
        let session_failures_total = IntCounter::new(
            "driftnet_session_failures_total",
            "Sessions with nonzero exit",
        )
        .map_err(|_| MetricsError::Prom)?;
        let verify_failures_total = IntCounter::new(
            "driftnet_verify_failures_total",
            "Blocks dropped at the verification gate",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(blocks_stored.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(peers_tracked.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(blocks_stored_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(blocks_relayed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sessions_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(session_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(verify_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            blocks_stored,
            peers_tracked,
            blocks_stored_total,
            blocks_relayed_total,
            sessions_total,
            session_failures_total,
            verify_failures_total,
        })
    }
}
