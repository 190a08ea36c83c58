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

//! Slotted ring-buffer block repository over an erasable partition.
//!
//! Each slot is one erase-aligned region holding a metadata header plus one
//! verified block. Erased flash reads all-ones, so the header is laid out so
//! that post-write mutation only ever clears bits: flags are stored
//! inverted, and the decay word burns one bit per share given away.
//!
//! Slot layout:
//!
//! ```text
//! glyph(1) ‖ inv_flags(1) ‖ decay(8) ‖ stored_at(8) ‖ hops(1) ‖ hash(32) ‖ block
//! ```

use crate::core::block::{content_hash, BlockError, BlockView};
use crate::core::clock::local_now_ms;
use crate::core::types::Hash32;
use crate::storage::partition::{Partition, StorageError};
use thiserror::Error;
use tracing::{debug, warn};

/// Magic marker of a populated slot. 0xFF means erased.
pub const SLOT_GLYPH: u8 = 0xB1;

/// Slot header length in bytes.
pub const SLOT_HEADER_LEN: usize = 1 + 1 + 8 + 8 + 1 + 32;

/// Smallest slot the geometry derivation will produce.
const MIN_SLOT_SIZE: usize = 4096;

/// Total decay shares a fresh slot carries.
pub const DECAY_SHARES: u8 = 64;

const DECAY_OFF: usize = 2;
const STORED_OFF: usize = 10;
const HOPS_OFF: usize = 18;
const HASH_OFF: usize = 19;

/// Repository write errors.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Block kind tag is not admissible.
    #[error("unsupported block kind")]
    UnsupportedKind,
    /// Block structure does not decode.
    #[error("malformed block")]
    Malformed,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Block does not fit a slot.
    #[error("block too large")]
    TooLarge,
    /// Underlying partition failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<BlockError> for WriteError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::UnsupportedKind => WriteError::UnsupportedKind,
            BlockError::Malformed => WriteError::Malformed,
            BlockError::BadSignature => WriteError::InvalidSignature,
        }
    }
}

/// Decoded slot metadata header.
#[derive(Clone, Copy, Debug)]
pub struct SlotMeta {
    /// Flags, un-inverted (bit set means flag active).
    pub flags: u8,
    /// Raw decay word; all-ones when fresh, monotonically decreasing.
    pub decay_raw: u64,
    /// Local wall clock at write, UNIX milliseconds.
    pub stored_at: u64,
    /// Relay distance of this replica.
    pub hops: u8,
    /// Content hash of the stored block bytes.
    pub hash: Hash32,
}

impl SlotMeta {
    /// Shares already given away (leading zeros of the decay word).
    pub fn shares_spent(&self) -> u8 {
        self.decay_raw.leading_zeros() as u8
    }

    /// Shares left before the slot becomes a recycling candidate.
    pub fn shares_left(&self) -> u8 {
        DECAY_SHARES - self.shares_spent()
    }

    fn decode(header: &[u8]) -> Self {
        let mut decay = [0u8; 8];
        decay.copy_from_slice(&header[DECAY_OFF..DECAY_OFF + 8]);
        let mut stored = [0u8; 8];
        stored.copy_from_slice(&header[STORED_OFF..STORED_OFF + 8]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&header[HASH_OFF..HASH_OFF + 32]);
        Self {
            flags: !header[1],
            decay_raw: u64::from_be_bytes(decay),
            stored_at: u64::from_be_bytes(stored),
            hops: header[HOPS_OFF],
            hash: Hash32::from_bytes(hash),
        }
    }
}

/// One populated slot: metadata, block bytes and the slot's ring index.
#[derive(Clone, Debug)]
pub struct SlotView {
    /// Ring index of the slot.
    pub index: usize,
    /// Decoded header.
    pub meta: SlotMeta,
    /// Canonical block bytes.
    pub block: Vec<u8>,
}

impl SlotView {
    /// Parse the stored block. Stored blocks were verified at write time,
    /// so a parse failure here means flash corruption.
    pub fn block_view(&self) -> Result<BlockView<'_>, BlockError> {
        BlockView::parse(&self.block)
    }
}

/// Flash-backed block repository.
pub struct BlockRepo {
    part: Box<dyn Partition>,
    slot_size: usize,
    slots: usize,
}

impl BlockRepo {
    /// Bind a partition and derive the slot geometry from its erase size:
    /// the slot is the smallest erase multiple of at least 4 KiB.
    pub fn open(part: Box<dyn Partition>) -> Result<Self, StorageError> {
        let erase = part.erase_size();
        if erase == 0 {
            return Err(StorageError::Geometry);
        }
        let slot_size = MIN_SLOT_SIZE.div_ceil(erase) * erase;
        let size = part.size();
        if size == 0 || size % slot_size != 0 {
            return Err(StorageError::Geometry);
        }
        let slots = size / slot_size;
        debug!(slots, slot_size, "repository bound");
        Ok(Self {
            part,
            slot_size,
            slots,
        })
    }

    /// Number of slots in the ring.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Largest admissible block for this geometry.
    pub fn max_block_len(&self) -> usize {
        self.slot_size - SLOT_HEADER_LEN
    }

    fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_size
    }

    fn read_glyph(&self, index: usize) -> Result<u8, StorageError> {
        let mut b = [0u8; 1];
        self.part.read(self.slot_offset(index), &mut b)?;
        Ok(b[0])
    }

    /// Load one slot, if populated. A populated slot whose block no longer
    /// parses is reported as corrupt.
    fn load_slot(&self, index: usize) -> Result<Option<SlotView>, StorageError> {
        let mut raw = vec![0u8; self.slot_size];
        self.part.read(self.slot_offset(index), &mut raw)?;
        if raw[0] != SLOT_GLYPH {
            return Ok(None);
        }
        let meta = SlotMeta::decode(&raw[..SLOT_HEADER_LEN]);
        let blob = &raw[SLOT_HEADER_LEN..];
        let block_len = match BlockView::parse_prefix_len(blob) {
            Some(len) => len,
            None => {
                warn!(slot = index, "corrupt slot payload, skipping");
                return Ok(None);
            }
        };
        Ok(Some(SlotView {
            index,
            meta,
            block: blob[..block_len].to_vec(),
        }))
    }

    /// Iterate populated slots in storage order. Iteration ends at the
    /// first erased slot or after visiting every slot.
    pub fn iter(&self) -> impl Iterator<Item = SlotView> + '_ {
        let mut index = 0usize;
        let mut done = false;
        std::iter::from_fn(move || loop {
            if done || index >= self.slots {
                return None;
            }
            let current = index;
            index += 1;
            match self.load_slot(current) {
                Ok(Some(view)) => return Some(view),
                Ok(None) => match self.read_glyph(current) {
                    // Erased slot terminates the ring walk; a corrupt
                    // populated slot is skipped.
                    Ok(0xff) | Err(_) => {
                        done = true;
                        return None;
                    }
                    Ok(_) => continue,
                },
                Err(_) => {
                    done = true;
                    return None;
                }
            }
        })
    }

    /// Number of populated slots.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Newest stored block by authoring date, for the beacon digest.
    pub fn latest(&self) -> Option<(u64, Hash32)> {
        self.iter()
            .filter_map(|s| {
                s.block_view()
                    .ok()
                    .map(|b| (b.date_utc_ms(), s.meta.hash))
            })
            .max()
    }

    /// Linear scan by content hash. N is small enough that an index would
    /// not pay for itself.
    pub fn find_by_hash(&self, hash: &Hash32) -> Option<SlotView> {
        self.iter().find(|s| s.meta.hash == *hash)
    }

    /// Pick the destination slot for a write: the first erased slot, else
    /// the recycling victim with the least decay left, ties broken by the
    /// oldest block date, then the lowest index.
    fn find_writable_slot(&self) -> Result<usize, StorageError> {
        let mut victim: Option<(u64, u64, usize)> = None;
        for index in 0..self.slots {
            let view = match self.load_slot(index)? {
                Some(v) => v,
                // Erased slot, or a corrupt one: either way write here.
                None => return Ok(index),
            };
            let date = view.block_view().map(|b| b.date_utc_ms()).unwrap_or(0);
            let key = (view.meta.decay_raw, date, index);
            if victim.map_or(true, |best| key < best) {
                victim = Some(key);
            }
        }
        victim.map(|(_, _, index)| index).ok_or(StorageError::Geometry)
    }

    /// Verify and store a block, recycling a slot when the ring is full.
    /// Duplicate content hashes short-circuit to the existing slot index.
    pub fn write(&self, block_bytes: &[u8], hops: u8) -> Result<usize, WriteError> {
        let view = BlockView::parse(block_bytes)?;
        view.verify()?;
        if block_bytes.len() > self.max_block_len() {
            return Err(WriteError::TooLarge);
        }
        let hash = content_hash(block_bytes);
        if let Some(existing) = self.find_by_hash(&hash) {
            debug!(slot = existing.index, hash = %hash.short(), "duplicate block");
            return Ok(existing.index);
        }

        let index = self.find_writable_slot()?;
        let offset = self.slot_offset(index);
        if self.read_glyph(index)? != 0xff {
            self.part.erase_range(offset, self.slot_size)?;
        }

        let mut slot = Vec::with_capacity(SLOT_HEADER_LEN + block_bytes.len());
        slot.push(SLOT_GLYPH);
        slot.push(0xff); // inverted flags, all false
        slot.extend_from_slice(&u64::MAX.to_be_bytes()); // full decay
        slot.extend_from_slice(&local_now_ms().to_be_bytes());
        slot.push(hops);
        slot.extend_from_slice(hash.as_bytes());
        slot.extend_from_slice(block_bytes);
        self.part.write(offset, &slot)?;

        debug!(slot = index, hops, hash = %hash.short(), "block stored");
        Ok(index)
    }

    /// Burn one decay share of a slot: clear the highest still-set bit of
    /// the decay word. No erase involved.
    pub fn decay_decrement(&self, index: usize) -> Result<(), StorageError> {
        if index >= self.slots {
            return Err(StorageError::OutOfRange);
        }
        let mut header = [0u8; SLOT_HEADER_LEN];
        self.part.read(self.slot_offset(index), &mut header)?;
        if header[0] != SLOT_GLYPH {
            return Ok(());
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&header[DECAY_OFF..DECAY_OFF + 8]);
        let word = u64::from_be_bytes(raw);
        if word == 0 {
            return Ok(());
        }
        let burned = word & !(1u64 << (63 - word.leading_zeros()));
        self.part
            .write(self.slot_offset(index) + DECAY_OFF, &burned.to_be_bytes())
    }

    /// Erase the entire partition (factory reset).
    pub fn purge(&self) -> Result<(), StorageError> {
        self.part.erase_range(0, self.slots * self.slot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::compose;
    use crate::core::keys::AuthorKey;
    use crate::storage::partition::MemPartition;

    fn repo(slots: usize) -> BlockRepo {
        let part = MemPartition::new(slots * 4096, 4096).expect("partition");
        BlockRepo::open(Box::new(part)).expect("repo")
    }

    fn block(key: &AuthorKey, body: &[u8], date: u64) -> Vec<u8> {
        compose(body, date, key).expect("compose")
    }

    #[test]
    fn slot_size_derived_from_erase_size() {
        let part = MemPartition::new(8192, 2048).expect("partition");
        let repo = BlockRepo::open(Box::new(part)).expect("repo");
        assert_eq!(repo.slot_count(), 2);
        assert_eq!(repo.max_block_len(), 4096 - SLOT_HEADER_LEN);
    }

    #[test]
    fn write_then_find_roundtrips() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        let bytes = block(&key, b"carried far", 1_700_000_000_000);
        let idx = repo.write(&bytes, 3).expect("write");
        let hash = content_hash(&bytes);

        let found = repo.find_by_hash(&hash).expect("found");
        assert_eq!(found.index, idx);
        assert_eq!(found.block, bytes);
        assert_eq!(found.meta.hops, 3);
        assert_eq!(found.meta.hash, hash);
        assert_eq!(found.meta.shares_left(), DECAY_SHARES);
    }

    #[test]
    fn duplicate_hash_returns_existing_slot() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        let bytes = block(&key, b"once", 1);
        let a = repo.write(&bytes, 0).expect("write");
        let b = repo.write(&bytes, 5).expect("rewrite");
        assert_eq!(a, b);
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn forged_block_is_never_written() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        let mut bytes = block(&key, b"forged", 1);
        bytes[40] ^= 0x01; // inside the signature
        assert!(matches!(
            repo.write(&bytes, 0),
            Err(WriteError::InvalidSignature)
        ));
        assert_eq!(repo.count(), 0);
    }

    #[test]
    fn max_body_block_fits_one_slot() {
        let part = MemPartition::new(8192, 2048).expect("partition");
        let repo = BlockRepo::open(Box::new(part)).expect("repo");
        let key = AuthorKey::generate().expect("key");
        // The codec cap leaves headroom for the slot header even at the
        // smallest slot geometry.
        let bytes = block(&key, &vec![7u8; crate::core::block::MAX_BODY], 1);
        assert!(bytes.len() <= repo.max_block_len());
        let idx = repo.write(&bytes, 0).expect("write");
        assert_eq!(
            repo.find_by_hash(&content_hash(&bytes)).expect("stored").index,
            idx
        );
    }

    #[test]
    fn erased_slots_are_used_before_any_recycling() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        let mut indices = Vec::new();
        for i in 0..4u64 {
            let bytes = block(&key, format!("b{i}").as_bytes(), 100 + i);
            indices.push(repo.write(&bytes, 0).expect("write"));
        }
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(repo.count(), 4);
    }

    #[test]
    fn full_ring_recycles_oldest_when_decay_ties() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        // Oldest by block date lands in slot 2.
        let dates = [500u64, 400, 100, 300];
        let mut hashes = Vec::new();
        for (i, date) in dates.iter().enumerate() {
            let bytes = block(&key, format!("b{i}").as_bytes(), *date);
            hashes.push(content_hash(&bytes));
            repo.write(&bytes, 0).expect("write");
        }

        let fifth = block(&key, b"newcomer", 900);
        let idx = repo.write(&fifth, 0).expect("write");
        assert_eq!(idx, 2);
        assert_eq!(repo.count(), 4);
        assert!(repo.find_by_hash(&hashes[2]).is_none());
        assert!(repo.find_by_hash(&content_hash(&fifth)).is_some());
    }

    #[test]
    fn recycling_prefers_most_decayed_slot() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        for i in 0..4u64 {
            // Slot 0 holds the oldest block, which would otherwise be the victim.
            let bytes = block(&key, format!("b{i}").as_bytes(), 100 + i);
            repo.write(&bytes, 0).expect("write");
        }
        repo.decay_decrement(3).expect("decay");

        let fifth = block(&key, b"newcomer", 900);
        assert_eq!(repo.write(&fifth, 0).expect("write"), 3);
    }

    #[test]
    fn decay_burns_one_share_at_a_time() {
        let repo = repo(2);
        let key = AuthorKey::generate().expect("key");
        let bytes = block(&key, b"shared", 1);
        let idx = repo.write(&bytes, 0).expect("write");

        for expected in (0..DECAY_SHARES).rev() {
            repo.decay_decrement(idx).expect("decay");
            let view = repo.load_slot(idx).expect("load").expect("populated");
            assert_eq!(view.meta.shares_left(), expected);
        }
        // Exhausted counter is a fixed point.
        repo.decay_decrement(idx).expect("decay");
        let view = repo.load_slot(idx).expect("load").expect("populated");
        assert_eq!(view.meta.shares_left(), 0);
    }

    #[test]
    fn purge_empties_the_ring() {
        let repo = repo(4);
        let key = AuthorKey::generate().expect("key");
        for i in 0..3u64 {
            let bytes = block(&key, format!("b{i}").as_bytes(), i + 1);
            repo.write(&bytes, 0).expect("write");
        }
        repo.purge().expect("purge");
        assert_eq!(repo.count(), 0);
        assert_eq!(repo.iter().count(), 0);
    }

    #[test]
    fn iteration_stops_at_first_erased_slot() {
        let repo = repo(8);
        let key = AuthorKey::generate().expect("key");
        for i in 0..3u64 {
            let bytes = block(&key, format!("b{i}").as_bytes(), i + 1);
            repo.write(&bytes, 0).expect("write");
        }
        let seen: Vec<usize> = repo.iter().map(|s| s.index).collect();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
