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

//! Node lifecycle driver.
//!
//! One iteration per state: SEEK scans and picks a pairing candidate,
//! NOTIFY advertises and waits to be found, ATTACH brings the session
//! channel up, INFORM yields to the session engine, LEAVE tears down and
//! goes back to advertising. Only one session is active at any time; the
//! transport refuses concurrent links.

use crate::core::clock::SwarmClock;
use crate::core::types::{BeaconInfo, Bssid, SwarmConfig};
use crate::monitoring::metrics::Metrics;
use crate::networking::discovery::Discovery;
use crate::networking::peer_table::PeerTable;
use crate::networking::transport::LinkTransport;
use crate::networking::NodeEvent;
use crate::node::status::{transition, NodeStatus};
use crate::storage::repo::BlockRepo;
use crate::sync::session::EXIT_TRANSPORT;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Collaborators wired into the state machine.
pub struct NodeDeps {
    /// Radio discovery boundary.
    pub discovery: Arc<dyn Discovery>,
    /// Link transport control.
    pub transport: Arc<dyn LinkTransport>,
    /// Peer registry.
    pub peers: Arc<Mutex<PeerTable>>,
    /// Block repository.
    pub repo: Arc<BlockRepo>,
    /// Swarm clock.
    pub clock: Arc<SwarmClock>,
    /// Metrics sink.
    pub metrics: Arc<Metrics>,
}

/// The node lifecycle state machine.
pub struct Node {
    cfg: SwarmConfig,
    deps: NodeDeps,
    events: mpsc::Receiver<NodeEvent>,
    status: NodeStatus,
    status_tx: watch::Sender<NodeStatus>,
    gateway: bool,
    initiator: bool,
    current_peer: Option<Bssid>,
    pending_done: Option<i32>,
    detached: bool,
}

impl Node {
    /// Build the machine. The returned watch channel mirrors the lifecycle
    /// state, for display surfaces and tests.
    pub fn new(
        cfg: SwarmConfig,
        deps: NodeDeps,
        events: mpsc::Receiver<NodeEvent>,
        gateway: bool,
    ) -> (Self, watch::Receiver<NodeStatus>) {
        let (status_tx, status_rx) = watch::channel(NodeStatus::Offline);
        (
            Self {
                cfg,
                deps,
                events,
                status: NodeStatus::Offline,
                status_tx,
                gateway,
                initiator: false,
                current_peer: None,
                pending_done: None,
                detached: false,
            },
            status_rx,
        )
    }

    fn set_status(&mut self, to: NodeStatus) {
        let from = self.status;
        transition(&mut self.status, to);
        info!(%from, %to, "state");
        let _ = self.status_tx.send(to);
    }

    fn beacon_payload(&self) -> Vec<u8> {
        let latest_hash8 = self
            .deps
            .repo
            .latest()
            .map(|(_, hash)| {
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&hash.as_bytes()[..8]);
                prefix
            })
            .unwrap_or([0xff; 8]);
        let info = BeaconInfo {
            block_count: self.deps.repo.count().min(u16::MAX as usize) as u16,
            latest_hash8,
            swarm_time: self.deps.clock.now(),
            gateway: self.gateway,
        };
        info.encode().unwrap_or_default()
    }

    /// Wait up to `budget` for an event accepted by `matcher`. Session
    /// completions arriving early are stashed for INFORM; anything else
    /// off-phase is dropped.
    async fn wait_for(
        &mut self,
        matcher: impl Fn(&NodeEvent) -> bool,
        budget: Duration,
    ) -> Option<NodeEvent> {
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Err(_) => return None,
                Ok(None) => {
                    self.detached = true;
                    return None;
                }
                Ok(Some(ev)) if matcher(&ev) => return Some(ev),
                Ok(Some(NodeEvent::SessionDone(code))) => {
                    self.pending_done = Some(code);
                }
                Ok(Some(ev)) => debug!(?ev, "event dropped off-phase"),
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(ev) = self.events.try_recv() {
            debug!(?ev, "drained");
        }
    }

    async fn seek(&mut self) {
        let sightings = match self.deps.discovery.scan().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "scan failed");
                self.set_status(NodeStatus::Notify);
                return;
            }
        };

        let now = Instant::now();
        let candidate = match self.deps.peers.lock() {
            Ok(mut peers) => {
                for s in &sightings {
                    peers.observe(s.bssid, s.rssi, &s.payload, now);
                }
                self.deps.metrics.peers_tracked.set(peers.len() as i64);
                peers.select(now)
            }
            Err(_) => None,
        };

        match candidate {
            Some(bssid) => match self.deps.discovery.associate(bssid).await {
                Ok(()) => {
                    debug!(peer = %bssid, "associating");
                    self.initiator = true;
                    self.current_peer = Some(bssid);
                    self.set_status(NodeStatus::Attach);
                }
                Err(e) => {
                    warn!(peer = %bssid, error = %e, "associate failed");
                    self.set_status(NodeStatus::Notify);
                }
            },
            None => self.set_status(NodeStatus::Notify),
        }
    }

    async fn notify(&mut self) {
        self.initiator = false;
        let payload = self.beacon_payload();
        if let Err(e) = self.deps.discovery.advertise(payload).await {
            warn!(error = %e, "advertise failed");
        }

        let jitter = if self.cfg.notify_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.cfg.notify_jitter_ms)
        };
        let window = Duration::from_millis(self.cfg.notify_ms + jitter);

        match self
            .wait_for(|ev| matches!(ev, NodeEvent::PeerAttached), window)
            .await
        {
            Some(_) => self.set_status(NodeStatus::Attach),
            None => self.set_status(NodeStatus::Seek),
        }
    }

    async fn attach(&mut self) {
        if self.initiator {
            let budget = Duration::from_millis(self.cfg.link_up_timeout_ms);
            if self
                .wait_for(|ev| matches!(ev, NodeEvent::LinkUp), budget)
                .await
                .is_none()
            {
                warn!("link never came up");
                self.set_status(NodeStatus::Leave);
                return;
            }
            if let Err(e) = self.deps.transport.open().await {
                warn!(error = %e, "transport open failed");
                self.set_status(NodeStatus::Leave);
                return;
            }
        }

        let budget = Duration::from_millis(self.cfg.establish_timeout_ms);
        match self
            .wait_for(|ev| matches!(ev, NodeEvent::LinkEstablished), budget)
            .await
        {
            Some(_) => self.set_status(NodeStatus::Inform),
            None => {
                warn!("session channel never established");
                self.set_status(NodeStatus::Leave);
            }
        }
    }

    async fn inform(&mut self) {
        // The session engine owns the link; wait for its completion hook.
        let code = match self.pending_done.take() {
            Some(code) => code,
            None => {
                let budget = Duration::from_millis(self.cfg.establish_timeout_ms * 3);
                match self
                    .wait_for(|ev| matches!(ev, NodeEvent::SessionDone(_)), budget)
                    .await
                {
                    Some(NodeEvent::SessionDone(code)) => code,
                    _ => {
                        warn!("session completion never arrived");
                        EXIT_TRANSPORT
                    }
                }
            }
        };

        if let Some(bssid) = self.current_peer {
            if let Ok(mut peers) = self.deps.peers.lock() {
                peers.mark_result(bssid, code == 0, Instant::now());
            }
        }
        self.deps
            .metrics
            .blocks_stored
            .set(self.deps.repo.count() as i64);
        info!(code, "session finished");
        self.set_status(NodeStatus::Leave);
    }

    async fn leave(&mut self) {
        if self.initiator {
            if let Err(e) = self.deps.discovery.disassociate().await {
                warn!(error = %e, "disassociate failed");
            }
        }
        self.initiator = false;
        self.current_peer = None;
        self.pending_done = None;
        self.drain_events();
        self.set_status(NodeStatus::Notify);
    }

    /// Run the lifecycle until the event channel closes.
    pub async fn run(mut self) {
        if let Err(e) = self.deps.discovery.start(self.beacon_payload()).await {
            warn!(error = %e, "discovery start failed");
        }
        self.set_status(NodeStatus::Seek);

        loop {
            match self.status {
                NodeStatus::Seek => self.seek().await,
                NodeStatus::Notify => self.notify().await,
                NodeStatus::Attach => self.attach().await,
                NodeStatus::Inform => self.inform().await,
                NodeStatus::Leave => self.leave().await,
                NodeStatus::Offline => break,
            }
            if self.detached {
                debug!("event sources gone, stopping");
                break;
            }
        }
        self.deps.transport.shutdown().await;
    }
}
