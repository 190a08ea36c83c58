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
#![deny(missing_docs)]

//! Swarm time ("pop8"): a monotone timestamp in eighths of a second since
//! the swarm epoch. It survives local clock resets because the node only
//! ever adopts the maximum it has seen, fed by the dates of incoming
//! blocks. Purely advisory; nothing depends on swarm-wide agreement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Swarm epoch: 2020-01-01T00:00:00Z in UNIX milliseconds.
pub const SWARM_EPOCH_MS: u64 = 1_577_836_800_000;

/// Milliseconds per pop8 tick.
const TICK_MS: u64 = 125;

/// Map a UTC millisecond timestamp onto pop8 ticks. Monotone in its input;
/// dates before the swarm epoch clamp to zero.
pub fn encode_pop8(utc_ms: u64) -> u64 {
    utc_ms.saturating_sub(SWARM_EPOCH_MS) / TICK_MS
}

/// Monotone swarm clock.
#[derive(Debug, Default)]
pub struct SwarmClock {
    pop8: AtomicU64,
}

impl SwarmClock {
    /// Fresh clock at tick zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an incoming block date; the clock only moves forward.
    pub fn bump(&self, utc_ms: u64) {
        self.pop8.fetch_max(encode_pop8(utc_ms), Ordering::Relaxed);
    }

    /// Current swarm time in pop8 ticks.
    pub fn now(&self) -> u64 {
        self.pop8.load(Ordering::Relaxed)
    }
}

/// Local wall clock in UNIX milliseconds; used for slot `stored_at` stamps.
pub fn local_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
