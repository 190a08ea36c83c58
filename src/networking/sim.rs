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

//! In-memory radio simulation.
//!
//! A [`SimCloud`] is a patch of ether: nodes registered on it see each
//! other's advertisements when scanning, and an associate wires a paired
//! in-memory link, with the target side driven exactly like an accepted
//! connection. Used by the integration tests to run whole swarms in one
//! process.

use crate::core::types::Bssid;
use crate::networking::discovery::{Discovery, DiscoveryError, Sighting};
use crate::networking::transport::{
    drive_link, FrameIo, HandlerFactory, LinkTransport, TransportError,
};
use crate::networking::NodeEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct Registration {
    rssi: i8,
    advertising: bool,
    beacon: Vec<u8>,
    events: mpsc::Sender<NodeEvent>,
    factory: HandlerFactory,
    inactivity: Duration,
}

/// Shared ether connecting simulated nodes.
#[derive(Default)]
pub struct SimCloud {
    nodes: StdMutex<HashMap<Bssid, Registration>>,
}

impl SimCloud {
    /// Empty ether.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node and get its radio handle. `rssi` is the signal
    /// strength every other node observes for it.
    pub fn register(
        self: &Arc<Self>,
        bssid: Bssid,
        rssi: i8,
        events: mpsc::Sender<NodeEvent>,
        factory: HandlerFactory,
        inactivity: Duration,
    ) -> Arc<SimRadio> {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.insert(
                bssid,
                Registration {
                    rssi,
                    advertising: false,
                    beacon: Vec::new(),
                    events: events.clone(),
                    factory: factory.clone(),
                    inactivity,
                },
            );
        }
        Arc::new(SimRadio {
            cloud: self.clone(),
            bssid,
            events,
            factory,
            inactivity,
            pending: Mutex::new(None),
        })
    }
}

/// One end of a paired in-memory link.
pub struct SimLink {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl SimLink {
    /// A connected pair of link ends.
    pub fn pair() -> (SimLink, SimLink) {
        let (a_tx, a_rx) = mpsc::channel(16);
        let (b_tx, b_rx) = mpsc::channel(16);
        (
            SimLink { tx: a_tx, rx: b_rx },
            SimLink { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl FrameIo for SimLink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| TransportError::Io)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// A node's view of the simulated radio: discovery and link transport in
/// one handle.
pub struct SimRadio {
    cloud: Arc<SimCloud>,
    bssid: Bssid,
    events: mpsc::Sender<NodeEvent>,
    factory: HandlerFactory,
    inactivity: Duration,
    pending: Mutex<Option<SimLink>>,
}

impl SimRadio {
    fn with_self<R>(&self, f: impl FnOnce(&mut Registration) -> R) -> Result<R, DiscoveryError> {
        let mut nodes = self.cloud.nodes.lock().map_err(|_| DiscoveryError::Radio)?;
        let reg = nodes.get_mut(&self.bssid).ok_or(DiscoveryError::Radio)?;
        Ok(f(reg))
    }
}

#[async_trait]
impl Discovery for SimRadio {
    async fn start(&self, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        self.advertise(payload).await
    }

    async fn advertise(&self, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        self.with_self(|reg| {
            reg.advertising = true;
            reg.beacon = payload;
        })
    }

    async fn scan(&self) -> Result<Vec<Sighting>, DiscoveryError> {
        let nodes = self.cloud.nodes.lock().map_err(|_| DiscoveryError::Radio)?;
        Ok(nodes
            .iter()
            .filter(|(bssid, reg)| **bssid != self.bssid && reg.advertising)
            .map(|(bssid, reg)| Sighting {
                bssid: *bssid,
                rssi: reg.rssi,
                payload: reg.beacon.clone(),
            })
            .collect())
    }

    async fn associate(&self, bssid: Bssid) -> Result<(), DiscoveryError> {
        let (target_events, target_factory, target_inactivity) = {
            let nodes = self.cloud.nodes.lock().map_err(|_| DiscoveryError::Radio)?;
            let reg = nodes.get(&bssid).ok_or(DiscoveryError::UnknownPeer)?;
            if !reg.advertising {
                return Err(DiscoveryError::UnknownPeer);
            }
            (reg.events.clone(), reg.factory.clone(), reg.inactivity)
        };

        let (local, remote) = SimLink::pair();
        *self.pending.lock().await = Some(local);

        debug!(from = %self.bssid, to = %bssid, "sim associate");
        tokio::spawn(async move {
            let _ = target_events.send(NodeEvent::PeerAttached).await;
            let _ = target_events.send(NodeEvent::LinkEstablished).await;
            let mut io = remote;
            let mut handler = (target_factory)(false);
            let code = drive_link(&mut io, handler.as_mut(), target_inactivity).await;
            let _ = target_events.send(NodeEvent::SessionDone(code)).await;
        });

        let _ = self.events.send(NodeEvent::LinkUp).await;
        Ok(())
    }

    async fn disassociate(&self) -> Result<(), DiscoveryError> {
        *self.pending.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl LinkTransport for SimRadio {
    async fn open(&self) -> Result<(), TransportError> {
        let Some(link) = self.pending.lock().await.take() else {
            return Err(TransportError::Closed);
        };
        let events = self.events.clone();
        let factory = self.factory.clone();
        let inactivity = self.inactivity;
        tokio::spawn(async move {
            let _ = events.send(NodeEvent::LinkEstablished).await;
            let mut io = link;
            let mut handler = (factory)(true);
            let code = drive_link(&mut io, handler.as_mut(), inactivity).await;
            let _ = events.send(NodeEvent::SessionDone(code)).await;
        });
        Ok(())
    }

    async fn shutdown(&self) {
        *self.pending.lock().await = None;
    }
}
