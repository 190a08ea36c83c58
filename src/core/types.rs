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

//! Shared core types, canonical encoding helpers and node configuration.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules.
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// 256-bit content hash (Blake2b-256 output).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }
    /// Return bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    /// Abbreviated hex rendering for log lines.
    pub fn short(&self) -> String {
        format!(
            "{}..{}",
            hex::encode(&self.0[..2]),
            hex::encode(&self.0[30..])
        )
    }
}

/// Link-layer peer address (BSSID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bssid(pub [u8; 6]);

impl std::fmt::Display for Bssid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Maximum advertised beacon payload size in bytes.
pub const BEACON_PAYLOAD_MAX: usize = 32;

/// Beacon payload advertised while notifying: a digest of what the node
/// carries, so a seeker can judge whether a pairing is worth the battery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconInfo {
    /// Number of populated repository slots.
    pub block_count: u16,
    /// Prefix of the newest block's content hash.
    pub latest_hash8: [u8; 8],
    /// The node's current swarm time.
    pub swarm_time: u64,
    /// Operator-visible gateway flag.
    pub gateway: bool,
}

impl BeaconInfo {
    /// Canonical ≤32-byte encoding.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let out = encode_canonical(self)?;
        if out.len() > BEACON_PAYLOAD_MAX {
            return Err(CodecError::TooLarge);
        }
        Ok(out)
    }

    /// Decode a payload observed in a sighting.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, BEACON_PAYLOAD_MAX)
    }
}

/// Node configuration root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// Repository settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Link transport settings.
    #[serde(default)]
    pub link: LinkConfig,
    /// Swarm loop timing.
    #[serde(default)]
    pub swarm: SwarmConfig,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (partition file + keys).
    pub data_dir: String,
}

/// Repository settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Partition label; the backing file is `<label>.part` under the data dir.
    #[serde(default = "default_partition_label")]
    pub partition_label: String,
    /// Number of slots in the ring.
    #[serde(default = "default_slots")]
    pub slots: usize,
}

fn default_partition_label() -> String {
    "drift0".to_string()
}
fn default_slots() -> usize {
    512
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            partition_label: default_partition_label(),
            slots: default_slots(),
        }
    }
}

/// Link transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// TCP listen port for the accept loop.
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// Receive inactivity budget in milliseconds.
    #[serde(default = "default_inactivity_ms")]
    pub inactivity_ms: u64,
    /// Peers dialable in lieu of a radio (host:port strings).
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_port() -> u16 {
    1984
}
fn default_inactivity_ms() -> u64 {
    10_000
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_port(),
            inactivity_ms: default_inactivity_ms(),
            peers: Vec::new(),
        }
    }
}

/// Swarm loop timing. Defaults follow the protocol's reference timings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// NOTIFY window in milliseconds, before jitter.
    #[serde(default = "default_notify_ms")]
    pub notify_ms: u64,
    /// Upper bound of the per-iteration random jitter added to NOTIFY.
    #[serde(default = "default_notify_jitter_ms")]
    pub notify_jitter_ms: u64,
    /// Initiator budget for the link to come up after associating.
    #[serde(default = "default_attach_timeout_ms")]
    pub link_up_timeout_ms: u64,
    /// Budget for the session channel to establish, either role.
    #[serde(default = "default_attach_timeout_ms")]
    pub establish_timeout_ms: u64,
    /// Re-pair back-off after a successful sync.
    #[serde(default = "default_backoff_ok_ms")]
    pub backoff_ok_ms: u64,
    /// Re-pair back-off after a failed sync.
    #[serde(default = "default_backoff_fail_ms")]
    pub backoff_fail_ms: u64,
    /// Hard cap on exchange rounds per session.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u16,
}

fn default_notify_ms() -> u64 {
    6_000
}
fn default_notify_jitter_ms() -> u64 {
    2_000
}
fn default_attach_timeout_ms() -> u64 {
    10_000
}
fn default_backoff_ok_ms() -> u64 {
    20_000
}
fn default_backoff_fail_ms() -> u64 {
    7_000
}
fn default_max_rounds() -> u16 {
    60
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            notify_ms: default_notify_ms(),
            notify_jitter_ms: default_notify_jitter_ms(),
            link_up_timeout_ms: default_attach_timeout_ms(),
            establish_timeout_ms: default_attach_timeout_ms(),
            backoff_ok_ms: default_backoff_ok_ms(),
            backoff_fail_ms: default_backoff_fail_ms(),
            max_rounds: default_max_rounds(),
        }
    }
}
