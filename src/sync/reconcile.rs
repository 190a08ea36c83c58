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

//! Set reconciliation.
//!
//! The session engine is agnostic to the algorithm behind the
//! [`Reconciler`] trait; anything that turns opaque blob round-trips into a
//! `(have, need, continue?)` triple qualifies. The implementation shipped
//! here is a paged roster diff: both sides stream their sorted
//! `(date, hash)` rosters to each other in frame-sized pages, and once each
//! side has seen the other's final page the initiator diffs the rosters
//! locally. Blob format: `flags(1) ‖ (date_be(8) ‖ hash(32))*`, flag bit 0
//! marking the sender's final page.

use crate::core::types::Hash32;
use crate::storage::repo::BlockRepo;
use crate::sync::MAX_HOPS;
use std::collections::BTreeSet;
use thiserror::Error;

/// One reconciliation index entry.
pub type Entry = (u64, Hash32);

const ENTRY_LEN: usize = 8 + 32;
const FLAG_FINAL: u8 = 0b0001;

/// Entries per page; sized so every blob fits a 4 KiB frame with headroom.
pub const PAGE_ENTRIES: usize = 96;

/// Reconciliation blob errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconError {
    /// Blob structure does not decode.
    #[error("malformed reconcile blob")]
    Malformed,
}

/// Outcome of folding one inbound reconcile blob on the initiator.
#[derive(Debug, Default)]
pub struct Fold {
    /// Hashes the peer lacks, date-ascending.
    pub have: Vec<Hash32>,
    /// Hashes this node lacks, date-ascending.
    pub need: Vec<Hash32>,
    /// Next blob to send, when reconciliation has not converged yet.
    pub cont: Option<Vec<u8>>,
}

/// A stateful per-session reconciliation handle.
pub trait Reconciler: Send {
    /// First message, produced on the initiator.
    fn initiate(&mut self) -> Vec<u8>;

    /// Non-initiator side: consume one inbound blob and produce the reply,
    /// or `None` once reconciliation has converged from this side.
    fn respond(&mut self, blob: &[u8]) -> Result<Option<Vec<u8>>, ReconError>;

    /// Initiator side: consume one inbound blob and fold it into the
    /// running delta computation.
    fn fold(&mut self, blob: &[u8]) -> Result<Fold, ReconError>;
}

/// Live `(date, hash)` index over the repository, maintained across
/// sessions. Blocks at or beyond the hop ceiling are not announced.
#[derive(Debug, Default)]
pub struct SyncIndex {
    entries: BTreeSet<Entry>,
}

impl SyncIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the repository at boot.
    pub fn build(repo: &BlockRepo) -> Self {
        let mut index = Self::new();
        for slot in repo.iter() {
            if slot.meta.hops >= MAX_HOPS {
                continue;
            }
            if let Ok(view) = slot.block_view() {
                index.insert(view.date_utc_ms(), slot.meta.hash);
            }
        }
        index
    }

    /// Insert an entry; idempotent.
    pub fn insert(&mut self, date_utc_ms: u64, hash: Hash32) {
        self.entries.insert((date_utc_ms, hash));
    }

    /// Whether a hash is announced (any date).
    pub fn contains_hash(&self, hash: &Hash32) -> bool {
        self.entries.iter().any(|(_, h)| h == hash)
    }

    /// Number of announced entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is announced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Date-ordered snapshot for a new session.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.iter().copied().collect()
    }
}

fn decode_blob(blob: &[u8]) -> Result<(bool, Vec<Entry>), ReconError> {
    let Some((flags, body)) = blob.split_first() else {
        return Err(ReconError::Malformed);
    };
    if flags & !FLAG_FINAL != 0 || body.len() % ENTRY_LEN != 0 {
        return Err(ReconError::Malformed);
    }
    let mut entries = Vec::with_capacity(body.len() / ENTRY_LEN);
    for chunk in body.chunks_exact(ENTRY_LEN) {
        let mut date = [0u8; 8];
        date.copy_from_slice(&chunk[..8]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&chunk[8..]);
        entries.push((u64::from_be_bytes(date), Hash32::from_bytes(hash)));
    }
    Ok((flags & FLAG_FINAL != 0, entries))
}

/// Paged roster-diff reconciler; one instance per session.
pub struct PagedDiffReconciler {
    local: Vec<Entry>,
    cursor: usize,
    sent_final: bool,
    remote: Vec<Entry>,
    remote_final: bool,
}

impl PagedDiffReconciler {
    /// Start from a date-ordered index snapshot.
    pub fn new(mut snapshot: Vec<Entry>) -> Self {
        snapshot.sort_unstable();
        Self {
            local: snapshot,
            cursor: 0,
            sent_final: false,
            remote: Vec::new(),
            remote_final: false,
        }
    }

    fn next_page(&mut self) -> Vec<u8> {
        let end = (self.cursor + PAGE_ENTRIES).min(self.local.len());
        let page = &self.local[self.cursor..end];
        let last = end == self.local.len();

        let mut out = Vec::with_capacity(1 + page.len() * ENTRY_LEN);
        out.push(if last { FLAG_FINAL } else { 0 });
        for (date, hash) in page {
            out.extend_from_slice(&date.to_be_bytes());
            out.extend_from_slice(hash.as_bytes());
        }
        self.cursor = end;
        if last {
            self.sent_final = true;
        }
        out
    }

    fn ingest(&mut self, blob: &[u8]) -> Result<(), ReconError> {
        let (last, entries) = decode_blob(blob)?;
        self.remote.extend(entries);
        if last {
            self.remote_final = true;
        }
        Ok(())
    }

    fn diff(&self) -> (Vec<Hash32>, Vec<Hash32>) {
        let local_hashes: BTreeSet<&Hash32> = self.local.iter().map(|(_, h)| h).collect();
        let remote_hashes: BTreeSet<&Hash32> = self.remote.iter().map(|(_, h)| h).collect();

        let have = self
            .local
            .iter()
            .filter(|(_, h)| !remote_hashes.contains(h))
            .map(|(_, h)| *h)
            .collect();
        let mut remote_sorted = self.remote.clone();
        remote_sorted.sort_unstable();
        remote_sorted.dedup();
        let need = remote_sorted
            .iter()
            .filter(|(_, h)| !local_hashes.contains(h))
            .map(|(_, h)| *h)
            .collect();
        (have, need)
    }
}

impl Reconciler for PagedDiffReconciler {
    fn initiate(&mut self) -> Vec<u8> {
        self.next_page()
    }

    fn respond(&mut self, blob: &[u8]) -> Result<Option<Vec<u8>>, ReconError> {
        let was_converged = self.sent_final && self.remote_final;
        self.ingest(blob)?;
        if was_converged {
            // Stray page after mutual convergence; nothing left to say.
            return Ok(None);
        }
        if !self.sent_final {
            return Ok(Some(self.next_page()));
        }
        // Roster fully sent but the peer still needs a reply to fold on.
        Ok(Some(vec![FLAG_FINAL]))
    }

    fn fold(&mut self, blob: &[u8]) -> Result<Fold, ReconError> {
        self.ingest(blob)?;
        if !self.sent_final {
            return Ok(Fold {
                cont: Some(self.next_page()),
                ..Fold::default()
            });
        }
        if !self.remote_final {
            // Nothing left to offer, but the peer is still paging; keep the
            // round-trip alive with an empty final page.
            return Ok(Fold {
                cont: Some(vec![FLAG_FINAL]),
                ..Fold::default()
            });
        }
        let (have, need) = self.diff();
        Ok(Fold {
            have,
            need,
            cont: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: u64) -> Entry {
        let mut h = [0u8; 32];
        h[..8].copy_from_slice(&i.to_be_bytes());
        (i, Hash32::from_bytes(h))
    }

    /// Run initiator/responder to convergence, returning the final fold and
    /// the number of blob round-trips.
    fn converge(a: &mut PagedDiffReconciler, b: &mut PagedDiffReconciler) -> (Fold, usize) {
        let mut blob = a.initiate();
        let mut trips = 0;
        loop {
            trips += 1;
            assert!(blob.len() + 1 <= crate::sync::wire::FRAME_CAP);
            let reply = match b.respond(&blob).expect("respond") {
                Some(r) => r,
                None => vec![FLAG_FINAL],
            };
            assert!(reply.len() + 1 <= crate::sync::wire::FRAME_CAP);
            let fold = a.fold(&reply).expect("fold");
            match fold.cont {
                Some(next) => blob = next,
                None => return (fold, trips),
            }
        }
    }

    #[test]
    fn empty_rosters_converge_in_one_trip() {
        let mut a = PagedDiffReconciler::new(vec![]);
        let mut b = PagedDiffReconciler::new(vec![]);
        let (fold, trips) = converge(&mut a, &mut b);
        assert_eq!(trips, 1);
        assert!(fold.have.is_empty());
        assert!(fold.need.is_empty());
    }

    #[test]
    fn one_sided_roster_yields_pure_have() {
        let mine: Vec<Entry> = (0..3).map(entry).collect();
        let mut a = PagedDiffReconciler::new(mine.clone());
        let mut b = PagedDiffReconciler::new(vec![]);
        let (fold, _) = converge(&mut a, &mut b);
        assert_eq!(fold.have, mine.iter().map(|(_, h)| *h).collect::<Vec<_>>());
        assert!(fold.need.is_empty());
    }

    #[test]
    fn symmetric_delta_is_split_both_ways() {
        let mut a = PagedDiffReconciler::new(vec![entry(1), entry(2)]);
        let mut b = PagedDiffReconciler::new(vec![entry(2), entry(3)]);
        let (fold, _) = converge(&mut a, &mut b);
        assert_eq!(fold.have, vec![entry(1).1]);
        assert_eq!(fold.need, vec![entry(3).1]);
    }

    #[test]
    fn large_rosters_paginate_and_still_converge() {
        let mine: Vec<Entry> = (0..250).map(entry).collect();
        let theirs: Vec<Entry> = (100..400).map(entry).collect();
        let mut a = PagedDiffReconciler::new(mine);
        let mut b = PagedDiffReconciler::new(theirs);
        let (fold, trips) = converge(&mut a, &mut b);
        assert!(trips > 1);
        assert_eq!(fold.have.len(), 100);
        assert_eq!(fold.need.len(), 150);
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let mut r = PagedDiffReconciler::new(vec![]);
        assert_eq!(r.respond(&[]), Err(ReconError::Malformed));
        assert_eq!(r.respond(&[0x80]), Err(ReconError::Malformed));
        assert_eq!(r.respond(&[FLAG_FINAL, 1, 2, 3]), Err(ReconError::Malformed));
    }

    #[test]
    fn index_snapshot_is_date_ordered_and_dedups() {
        let mut index = SyncIndex::new();
        let (d2, h2) = entry(2);
        let (d1, h1) = entry(1);
        index.insert(d2, h2);
        index.insert(d1, h1);
        index.insert(d2, h2);
        assert_eq!(index.len(), 2);
        assert!(index.contains_hash(&h1));
        assert_eq!(index.snapshot(), vec![(d1, h1), (d2, h2)]);
    }
}
