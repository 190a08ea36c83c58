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

//! Discovery boundary: the radio driver lives behind this trait.
//!
//! The core asks it to advertise presence, scan for nearby peers and bring
//! the link layer up toward a chosen one. Everything radio-specific
//! (channels, beacons, vendor IEs) stays on the other side.

use crate::core::types::{Bssid, BEACON_PAYLOAD_MAX};
use crate::networking::transport::TransportError;
use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Payload over the beacon limit.
    #[error("payload too large")]
    PayloadTooLarge,
    /// No such peer in radio range.
    #[error("unknown peer")]
    UnknownPeer,
    /// Driver-level failure.
    #[error("radio")]
    Radio,
}

/// One observed peer advertisement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sighting {
    /// Advertising peer's link address.
    pub bssid: Bssid,
    /// Received signal strength.
    pub rssi: i8,
    /// Advertised payload, opaque here.
    pub payload: Vec<u8>,
}

/// Abstract discovery service.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Begin operating with an initial advertisement payload.
    async fn start(&self, payload: Vec<u8>) -> Result<(), DiscoveryError>;

    /// Update the advertised beacon payload.
    async fn advertise(&self, payload: Vec<u8>) -> Result<(), DiscoveryError>;

    /// Scan for peers; blocks until the hardware completes a pass.
    async fn scan(&self) -> Result<Vec<Sighting>, DiscoveryError>;

    /// Bring the link layer up toward a peer (initiator path). Completion
    /// is signalled by a `LinkUp` node event.
    async fn associate(&self, bssid: Bssid) -> Result<(), DiscoveryError>;

    /// Tear the link layer down.
    async fn disassociate(&self) -> Result<(), DiscoveryError>;
}

/// Derive a stable pseudo-BSSID for a configured peer address; stands in
/// for the hardware address a radio driver would report.
pub fn synthetic_bssid(addr: &str) -> Bssid {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(addr.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 6];
    out.copy_from_slice(&digest[..6]);
    Bssid(out)
}

/// Discovery over a fixed peer list from configuration: every scan sights
/// all configured peers at a nominal signal strength. The deployment
/// stand-in for a radio driver, in the mould of a bootstrap list.
pub struct StaticDiscovery {
    peers: Vec<(Bssid, String)>,
    dial: crate::networking::tcp::DialHandle,
    events: tokio::sync::mpsc::Sender<crate::networking::NodeEvent>,
    advertised: Mutex<Vec<u8>>,
}

const STATIC_RSSI: i8 = -40;

impl StaticDiscovery {
    /// Build from configured `host:port` strings.
    pub fn new(
        peers: &[String],
        dial: crate::networking::tcp::DialHandle,
        events: tokio::sync::mpsc::Sender<crate::networking::NodeEvent>,
    ) -> Self {
        let peers = peers
            .iter()
            .map(|addr| (synthetic_bssid(addr), addr.clone()))
            .collect();
        Self {
            peers,
            dial,
            events,
            advertised: Mutex::new(Vec::new()),
        }
    }

    fn set_payload(&self, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        if payload.len() > BEACON_PAYLOAD_MAX {
            return Err(DiscoveryError::PayloadTooLarge);
        }
        if let Ok(mut slot) = self.advertised.lock() {
            *slot = payload;
        }
        Ok(())
    }

    /// The payload currently carried in the advertisement.
    pub fn advertised_payload(&self) -> Vec<u8> {
        self.advertised.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn start(&self, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        self.set_payload(payload)
    }

    async fn advertise(&self, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        self.set_payload(payload)
    }

    async fn scan(&self) -> Result<Vec<Sighting>, DiscoveryError> {
        let sightings: Vec<Sighting> = self
            .peers
            .iter()
            .map(|(bssid, _)| Sighting {
                bssid: *bssid,
                rssi: STATIC_RSSI,
                payload: Vec::new(),
            })
            .collect();
        debug!(peers = sightings.len(), "static scan pass");
        Ok(sightings)
    }

    async fn associate(&self, bssid: Bssid) -> Result<(), DiscoveryError> {
        let addr = self
            .peers
            .iter()
            .find(|(b, _)| *b == bssid)
            .map(|(_, a)| a.clone())
            .ok_or(DiscoveryError::UnknownPeer)?;
        self.dial.set_target(addr).await;
        // No real link layer underneath: associate completes immediately.
        if self.events.send(crate::networking::NodeEvent::LinkUp).await.is_err() {
            warn!("node event channel closed during associate");
        }
        Ok(())
    }

    async fn disassociate(&self) -> Result<(), DiscoveryError> {
        self.dial.clear_target().await;
        Ok(())
    }
}

impl From<TransportError> for DiscoveryError {
    fn from(_: TransportError) -> Self {
        DiscoveryError::Radio
    }
}
