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

//! Driftnet - a gossip node for devices that move instead of route.
//!
//! This crate provides:
//! - A signed block codec (Ed25519 + Blake2b-256 content addressing)
//! - A flash-friendly ring-buffer block repository over an erasable partition
//! - Set reconciliation behind a trait, with a paged roster-diff implementation
//! - A half-duplex session engine exchanging deltas over 4 KiB frames
//! - A SEEK/NOTIFY/ATTACH/INFORM/LEAVE lifecycle driver with peer back-off
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (block codec, clock, keys, types).
pub mod core;
/// Observability (metrics).
pub mod monitoring;
/// Networking (discovery boundary, peer table, link transports).
pub mod networking;
/// Node lifecycle state machine.
pub mod node;
/// Storage (partition abstraction, ring-buffer repository).
pub mod storage;
/// Synchronization (wire codec, reconciliation, session engine).
pub mod sync;
