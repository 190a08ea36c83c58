#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Synchronization: frame codec, set reconciliation and the session engine.

pub mod reconcile;
pub mod session;
pub mod wire;

/// Hop ceiling: a replica at or beyond this distance is kept but no longer
/// announced for further relay.
pub const MAX_HOPS: u8 = 50;
