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

//! Session frame codec.
//!
//! Every frame is one transport message: a type byte followed by a
//! variant-specific body, never more than [`FRAME_CAP`] bytes total.
//!
//! ```text
//! 0b0001 RECONCILE            opaque reconciler blob
//! 0b0010 EXCHANGE             want_hash(32) ‖ offer_hops(1) ‖ block bytes
//! 0b0110 EXCHANGE|GIVE        block bytes present
//! 0b1010 EXCHANGE|WANT        want_hash valid
//! 0b1110 EXCHANGE|GIVE|WANT   both
//! ```
//!
//! Unset fields are zero-filled, their width is kept so the block extent is
//! always inferable from the frame size.

use crate::core::types::Hash32;
use thiserror::Error;

/// Hard cap on a frame, type byte included.
pub const FRAME_CAP: usize = 4096;

/// Reconciliation message carrying an opaque reconciler blob.
pub const T_RECONCILE: u8 = 0b0001;
/// Per-round delta exchange.
pub const T_EXCHANGE: u8 = 0b0010;
/// EXCHANGE carries a block.
pub const F_GIVE: u8 = 0b0100;
/// EXCHANGE carries a want-hash.
pub const F_WANT: u8 = 0b1000;

const EXCHANGE_HEADER_LEN: usize = 1 + 32 + 1;

/// Frame codec errors. All of them close the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,
    /// Type byte outside the protocol alphabet.
    #[error("unknown frame type")]
    UnknownType,
    /// Body shorter than the variant requires.
    #[error("truncated frame")]
    Truncated,
    /// GIVE unset but block bytes present, or vice versa.
    #[error("inconsistent exchange body")]
    Inconsistent,
    /// Frame exceeds [`FRAME_CAP`].
    #[error("oversize frame")]
    Oversize,
}

/// A decoded inbound frame, borrowing the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Opaque reconciler blob.
    Reconcile(&'a [u8]),
    /// Delta exchange round.
    Exchange(ExchangeBody<'a>),
}

/// Body of an EXCHANGE frame.
#[derive(Debug, PartialEq, Eq)]
pub struct ExchangeBody<'a> {
    /// Requested content hash, when the WANT bit is set.
    pub want: Option<Hash32>,
    /// Offered block and the sender-side hop count, when GIVE is set.
    pub give: Option<(u8, &'a [u8])>,
}

/// Decode one inbound frame.
pub fn decode(frame: &[u8]) -> Result<Frame<'_>, WireError> {
    if frame.is_empty() {
        return Err(WireError::Empty);
    }
    if frame.len() > FRAME_CAP {
        return Err(WireError::Oversize);
    }
    let tag = frame[0];
    match tag & 0b0011 {
        T_RECONCILE => {
            if tag != T_RECONCILE {
                return Err(WireError::UnknownType);
            }
            Ok(Frame::Reconcile(&frame[1..]))
        }
        T_EXCHANGE => {
            if tag & !(T_EXCHANGE | F_GIVE | F_WANT) != 0 {
                return Err(WireError::UnknownType);
            }
            if frame.len() < EXCHANGE_HEADER_LEN {
                return Err(WireError::Truncated);
            }
            let mut want_bytes = [0u8; 32];
            want_bytes.copy_from_slice(&frame[1..33]);
            let hops = frame[33];
            let block = &frame[EXCHANGE_HEADER_LEN..];

            let give = if tag & F_GIVE != 0 {
                if block.is_empty() {
                    return Err(WireError::Inconsistent);
                }
                Some((hops, block))
            } else {
                if !block.is_empty() {
                    return Err(WireError::Inconsistent);
                }
                None
            };
            let want = if tag & F_WANT != 0 {
                Some(Hash32::from_bytes(want_bytes))
            } else {
                None
            };
            Ok(Frame::Exchange(ExchangeBody { want, give }))
        }
        _ => Err(WireError::UnknownType),
    }
}

/// Encode a reconciliation frame.
pub fn encode_reconcile(blob: &[u8]) -> Result<Vec<u8>, WireError> {
    if 1 + blob.len() > FRAME_CAP {
        return Err(WireError::Oversize);
    }
    let mut out = Vec::with_capacity(1 + blob.len());
    out.push(T_RECONCILE);
    out.extend_from_slice(blob);
    Ok(out)
}

/// Encode an exchange frame; either half may be absent.
pub fn encode_exchange(
    want: Option<&Hash32>,
    give: Option<(u8, &[u8])>,
) -> Result<Vec<u8>, WireError> {
    let block_len = give.map_or(0, |(_, b)| b.len());
    if EXCHANGE_HEADER_LEN + block_len > FRAME_CAP {
        return Err(WireError::Oversize);
    }

    let mut tag = T_EXCHANGE;
    let mut out = Vec::with_capacity(EXCHANGE_HEADER_LEN + block_len);
    out.push(tag);
    match want {
        Some(hash) => {
            tag |= F_WANT;
            out.extend_from_slice(hash.as_bytes());
        }
        None => out.extend_from_slice(&[0u8; 32]),
    }
    match give {
        Some((hops, block)) => {
            tag |= F_GIVE;
            out.push(hops);
            out.extend_from_slice(block);
        }
        None => out.push(0),
    }
    out[0] = tag;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGAL_TAGS: [u8; 5] = [0b0001, 0b0010, 0b0110, 0b1010, 0b1110];

    #[test]
    fn reconcile_roundtrip() {
        let frame = encode_reconcile(b"opaque").expect("encode");
        assert!(frame.len() <= FRAME_CAP);
        assert!(LEGAL_TAGS.contains(&(frame[0] & 0x0f)));
        assert_eq!(decode(&frame).expect("decode"), Frame::Reconcile(b"opaque"));
    }

    #[test]
    fn exchange_roundtrip_all_shapes() {
        let hash = Hash32::from_bytes([9u8; 32]);
        let block = [1u8, 2, 3];

        let cases: [(Option<&Hash32>, Option<(u8, &[u8])>); 4] = [
            (None, None),
            (Some(&hash), None),
            (None, Some((7, &block))),
            (Some(&hash), Some((7, &block))),
        ];
        for (want, give) in cases {
            let frame = encode_exchange(want, give).expect("encode");
            assert!(LEGAL_TAGS.contains(&(frame[0] & 0x0f)));
            match decode(&frame).expect("decode") {
                Frame::Exchange(body) => {
                    assert_eq!(body.want, want.copied());
                    assert_eq!(body.give, give);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert_eq!(decode(&[]), Err(WireError::Empty));
        assert_eq!(decode(&[0b0000]), Err(WireError::UnknownType));
        assert_eq!(decode(&[0b0011]), Err(WireError::UnknownType));
        assert_eq!(decode(&[0b0101]), Err(WireError::UnknownType));
        // GIVE/WANT bits on a reconcile frame are not a thing.
        assert_eq!(decode(&[0b1101]), Err(WireError::UnknownType));
    }

    #[test]
    fn rejects_inconsistent_exchange() {
        // GIVE set, no block bytes.
        let mut frame = encode_exchange(None, Some((1, &[5u8]))).expect("encode");
        frame.truncate(34);
        assert_eq!(decode(&frame), Err(WireError::Inconsistent));

        // GIVE clear, trailing bytes.
        let mut frame = encode_exchange(None, None).expect("encode");
        frame.push(0xaa);
        assert_eq!(decode(&frame), Err(WireError::Inconsistent));

        // Truncated header.
        assert_eq!(decode(&[T_EXCHANGE, 0, 0]), Err(WireError::Truncated));
    }

    #[test]
    fn oversize_is_refused_on_both_paths() {
        let big = vec![0u8; FRAME_CAP];
        assert_eq!(encode_reconcile(&big), Err(WireError::Oversize));
        let block = vec![0u8; FRAME_CAP - 10];
        assert_eq!(encode_exchange(None, Some((0, &block))), Err(WireError::Oversize));
    }
}
