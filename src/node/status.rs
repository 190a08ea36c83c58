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

//! Node lifecycle states and the transition legality matrix.

/// Lifecycle state of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Radio down.
    Offline,
    /// Actively scanning for peers.
    Seek,
    /// Advertising presence, waiting to be found.
    Notify,
    /// Link coming up with a chosen peer.
    Attach,
    /// Session in progress; the session engine owns the flow.
    Inform,
    /// Tearing the pairing down.
    Leave,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Seek => "SEEK",
            NodeStatus::Notify => "NOTIFY",
            NodeStatus::Attach => "ATTACH",
            NodeStatus::Inform => "INFORM",
            NodeStatus::Leave => "LEAVE",
        };
        f.write_str(s)
    }
}

/// Whether `from → to` is a legal lifecycle transition.
pub fn validate_transition(from: NodeStatus, to: NodeStatus) -> bool {
    use NodeStatus::*;
    matches!(
        (from, to),
        (Offline, Seek)
            | (Offline, Notify)
            | (Offline, Leave)
            | (Seek, Notify)
            | (Seek, Attach)
            | (Notify, Seek)
            | (Notify, Attach)
            | (Attach, Inform)
            | (Attach, Leave)
            | (Inform, Leave)
            | (Leave, Seek)
            | (Leave, Notify)
    )
}

/// Apply a transition. An illegal transition is a programming error and
/// aborts.
pub fn transition(current: &mut NodeStatus, to: NodeStatus) {
    assert!(
        validate_transition(*current, to),
        "illegal transition {current} -> {to}"
    );
    *current = to;
}
