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

//! Signed block codec.
//!
//! A block is an immutable, variable-length byte string. Canonical layout
//! (all integers big-endian):
//!
//! ```text
//! kind(1) ‖ author(32) ‖ signature(64) ‖ date_utc_ms(8) ‖ body_len(2) ‖ body
//! ```
//!
//! The signature covers `body ‖ date ‖ author`; it doubles as the BlockID.
//! The content hash is Blake2b-256 over the full canonical serialization and
//! is what the repository and reconciler index by.

use crate::core::keys::{verify_detached, AuthorKey};
use crate::core::types::Hash32;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use thiserror::Error;

type Blake2b256 = Blake2b<U32>;

/// The only block kind the repository admits.
pub const KIND_CANONICAL: u8 = 0x01;

/// Fixed header length before the body.
pub const BLOCK_HEADER_LEN: usize = 1 + 32 + 64 + 8 + 2;

/// Maximum body length. Bounded so a block plus slot and frame headers
/// always fits a 4 KiB erase unit and a 4 KiB link frame.
pub const MAX_BODY: usize = 3920;

const AUTHOR_OFF: usize = 1;
const SIG_OFF: usize = 33;
const DATE_OFF: usize = 97;
const LEN_OFF: usize = 105;

/// Block codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// Kind tag is not CANONICAL.
    #[error("unsupported block kind")]
    UnsupportedKind,
    /// Structure does not decode.
    #[error("malformed block")]
    Malformed,
    /// Signature check failed.
    #[error("bad signature")]
    BadSignature,
}

/// Typed read-only view over canonical block bytes.
///
/// Constructed only through [`BlockView::parse`], so every accessor can
/// index without re-checking bounds.
#[derive(Clone, Copy, Debug)]
pub struct BlockView<'a> {
    bytes: &'a [u8],
}

impl<'a> BlockView<'a> {
    /// Parse and size-check a canonical block. Rejects trailing bytes: the
    /// caller always knows the exact extent from the frame or slot.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BlockError> {
        if bytes.len() < BLOCK_HEADER_LEN {
            return Err(BlockError::Malformed);
        }
        if bytes[0] != KIND_CANONICAL {
            return Err(BlockError::UnsupportedKind);
        }
        let body_len =
            u16::from_be_bytes([bytes[LEN_OFF], bytes[LEN_OFF + 1]]) as usize;
        if body_len > MAX_BODY || bytes.len() != BLOCK_HEADER_LEN + body_len {
            return Err(BlockError::Malformed);
        }
        Ok(Self { bytes })
    }

    /// Measure a block at the start of `buf` without requiring an exact
    /// extent: returns its total serialized length if the prefix carries a
    /// plausible canonical header. Used when scanning storage slots whose
    /// tail is erased padding.
    pub fn parse_prefix_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < BLOCK_HEADER_LEN || buf[0] != KIND_CANONICAL {
            return None;
        }
        let body_len = u16::from_be_bytes([buf[LEN_OFF], buf[LEN_OFF + 1]]) as usize;
        let total = BLOCK_HEADER_LEN + body_len;
        if body_len > MAX_BODY || buf.len() < total {
            return None;
        }
        Some(total)
    }

    /// Full canonical serialization.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Author public key.
    pub fn author(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.bytes[AUTHOR_OFF..AUTHOR_OFF + 32]);
        out
    }

    /// Detached signature; doubles as the BlockID.
    pub fn signature(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(&self.bytes[SIG_OFF..SIG_OFF + 64]);
        out
    }

    /// Authoring date, milliseconds since the UNIX epoch.
    pub fn date_utc_ms(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[DATE_OFF..DATE_OFF + 8]);
        u64::from_be_bytes(b)
    }

    /// Payload bytes.
    pub fn body(&self) -> &'a [u8] {
        &self.bytes[BLOCK_HEADER_LEN..]
    }

    /// Run the signature check over `body ‖ date ‖ author`.
    pub fn verify(&self) -> Result<(), BlockError> {
        let author = self.author();
        let sig = self.signature();
        let msg = signing_bytes(self.body(), self.date_utc_ms(), &author);
        if verify_detached(&author, &msg, &sig) {
            Ok(())
        } else {
            Err(BlockError::BadSignature)
        }
    }

    /// Blake2b-256 content hash of the canonical serialization.
    pub fn content_hash(&self) -> Hash32 {
        content_hash(self.bytes)
    }
}

fn signing_bytes(body: &[u8], date_utc_ms: u64, author: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(body.len() + 8 + 32);
    msg.extend_from_slice(body);
    msg.extend_from_slice(&date_utc_ms.to_be_bytes());
    msg.extend_from_slice(author);
    msg
}

/// Blake2b-256 over arbitrary canonical block bytes.
pub fn content_hash(bytes: &[u8]) -> Hash32 {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash32::from_bytes(out)
}

/// Compose and sign a canonical block with the local author key.
pub fn compose(body: &[u8], date_utc_ms: u64, key: &AuthorKey) -> Result<Vec<u8>, BlockError> {
    if body.len() > MAX_BODY {
        return Err(BlockError::Malformed);
    }
    let author = key.public_key();
    let sig = key.sign(&signing_bytes(body, date_utc_ms, &author));

    let mut out = Vec::with_capacity(BLOCK_HEADER_LEN + body.len());
    out.push(KIND_CANONICAL);
    out.extend_from_slice(&author);
    out.extend_from_slice(&sig);
    out.extend_from_slice(&date_utc_ms.to_be_bytes());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}
