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

//! Per-link session engine.
//!
//! A session is a half-duplex conversation: a reconciliation handshake
//! followed by exchange rounds in which the initiator pulls one wanted
//! block and pushes one offered block per round. The non-initiator only
//! ever replies; the initiator drives termination.

use crate::core::block::BlockView;
use crate::core::clock::SwarmClock;
use crate::core::types::Hash32;
use crate::monitoring::metrics::Metrics;
use crate::networking::transport::{Action, LinkHandler};
use crate::storage::repo::{BlockRepo, WriteError};
use crate::sync::reconcile::{Reconciler, SyncIndex};
use crate::sync::wire::{self, Frame};
use crate::sync::MAX_HOPS;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Clean completion.
pub const EXIT_OK: i32 = 0;
/// Malformed or unexpected frame.
pub const EXIT_PROTOCOL: i32 = 1;
/// A received block failed verification.
pub const EXIT_VERIFY: i32 = 2;
/// Flash failure while storing.
pub const EXIT_STORAGE: i32 = 3;
/// Transport fault (timeout, reset).
pub const EXIT_TRANSPORT: i32 = 4;
/// Session refused for lack of resources.
pub const EXIT_RESOURCE: i32 = 5;
/// Round cap tripped.
pub const EXIT_ROUNDS: i32 = 6;

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionCtx {
    /// Block repository.
    pub repo: Arc<BlockRepo>,
    /// Live reconciliation index.
    pub index: Arc<Mutex<SyncIndex>>,
    /// Swarm clock.
    pub clock: Arc<SwarmClock>,
    /// Metrics sink.
    pub metrics: Arc<Metrics>,
    /// Cap on initiator rounds.
    pub max_rounds: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Reconciling,
    Exchanging,
    Done,
}

/// One session over one link.
pub struct Session {
    ctx: SessionCtx,
    initiator: bool,
    phase: Phase,
    recon: Box<dyn Reconciler>,
    have: Vec<Hash32>,
    need: Vec<Hash32>,
    cont: Option<Vec<u8>>,
    rounds: u16,
    rx_bytes: u64,
    tx_bytes: u64,
    started: Instant,
    fault: Option<i32>,
}

impl Session {
    /// New session for a link in the given role.
    pub fn new(ctx: SessionCtx, initiator: bool, recon: Box<dyn Reconciler>) -> Self {
        Self {
            ctx,
            initiator,
            phase: Phase::Open,
            recon,
            have: Vec::new(),
            need: Vec::new(),
            cont: None,
            rounds: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            started: Instant::now(),
            fault: None,
        }
    }

    fn reply(&mut self, frame: Vec<u8>) -> Action {
        self.tx_bytes += frame.len() as u64;
        Action::Reply(frame)
    }

    fn fail(&mut self, code: i32) -> Action {
        if self.fault.is_none() {
            self.fault = Some(code);
        }
        Action::Close
    }

    /// Verify and store an offered block; hop attribution happens here, on
    /// the receiving side. Returns false only for faults that must abort
    /// the session.
    fn accept_block(&mut self, offer_hops: u8, bytes: &[u8]) -> bool {
        let hops = offer_hops.saturating_add(1);
        match self.ctx.repo.write(bytes, hops) {
            Ok(slot) => {
                // Write verified the block; the parse cannot fail now.
                if let Ok(view) = BlockView::parse(bytes) {
                    let date = view.date_utc_ms();
                    if hops < MAX_HOPS {
                        if let Ok(mut index) = self.ctx.index.lock() {
                            index.insert(date, view.content_hash());
                        }
                    }
                    self.ctx.clock.bump(date);
                    debug!(slot, hops, hash = %view.content_hash().short(), "block accepted");
                }
                self.ctx.metrics.blocks_stored_total.inc();
                true
            }
            Err(WriteError::Storage(e)) => {
                warn!(error = %e, "flash fault while storing block");
                self.fault = Some(EXIT_STORAGE);
                false
            }
            Err(e) => {
                warn!(error = %e, "offered block rejected");
                self.ctx.metrics.verify_failures_total.inc();
                if self.fault.is_none() {
                    self.fault = Some(EXIT_VERIFY);
                }
                true
            }
        }
    }

    /// Look an offered/wanted hash up in the repository; fulfilment burns
    /// one decay share of the slot.
    fn resolve_want(&mut self, hash: &Hash32) -> Option<(u8, Vec<u8>)> {
        let slot = match self.ctx.repo.find_by_hash(hash) {
            Some(s) => s,
            None => {
                debug!(hash = %hash.short(), "want not resolvable");
                return None;
            }
        };
        if let Err(e) = self.ctx.repo.decay_decrement(slot.index) {
            warn!(slot = slot.index, error = %e, "decay burn failed");
        }
        self.ctx.metrics.blocks_relayed_total.inc();
        Some((slot.meta.hops, slot.block))
    }

    /// Initiator: construct the next outbound message from session state.
    fn initiator_next(&mut self) -> Action {
        if self.rounds >= self.ctx.max_rounds {
            warn!(rounds = self.rounds, "round cap tripped");
            return self.fail(EXIT_ROUNDS);
        }
        self.rounds += 1;

        if self.have.is_empty() && self.need.is_empty() {
            return match self.cont.take() {
                Some(blob) => {
                    self.phase = Phase::Reconciling;
                    match wire::encode_reconcile(&blob) {
                        Ok(frame) => self.reply(frame),
                        Err(_) => self.fail(EXIT_PROTOCOL),
                    }
                }
                None => {
                    self.phase = Phase::Done;
                    Action::Close
                }
            };
        }

        self.phase = Phase::Exchanging;
        let want = self.need.pop();
        let give = match self.have.pop() {
            Some(hash) => self.resolve_want(&hash),
            None => None,
        };
        match wire::encode_exchange(want.as_ref(), give.as_ref().map(|(h, b)| (*h, b.as_slice()))) {
            Ok(frame) => self.reply(frame),
            Err(_) => self.fail(EXIT_PROTOCOL),
        }
    }

    fn on_data_initiator(&mut self, frame: Frame<'_>) -> Action {
        match frame {
            Frame::Reconcile(blob) => match self.recon.fold(blob) {
                Ok(fold) => {
                    self.have = fold.have;
                    self.need = fold.need;
                    self.cont = fold.cont;
                }
                Err(e) => {
                    warn!(error = %e, "reconcile fold failed");
                    return self.fail(EXIT_PROTOCOL);
                }
            },
            Frame::Exchange(body) => {
                if let Some((hops, block)) = body.give {
                    let block = block.to_vec();
                    if !self.accept_block(hops, &block) {
                        return Action::Close;
                    }
                }
            }
        }
        self.initiator_next()
    }

    fn on_data_responder(&mut self, frame: Frame<'_>) -> Action {
        match frame {
            Frame::Reconcile(blob) => match self.recon.respond(blob) {
                Ok(Some(out)) => match wire::encode_reconcile(&out) {
                    Ok(frame) => self.reply(frame),
                    Err(_) => self.fail(EXIT_PROTOCOL),
                },
                // Converged from this side: empty exchange signal keeps the
                // initiator driving termination.
                Ok(None) => match wire::encode_exchange(None, None) {
                    Ok(frame) => self.reply(frame),
                    Err(_) => self.fail(EXIT_PROTOCOL),
                },
                Err(e) => {
                    warn!(error = %e, "reconcile respond failed");
                    self.fail(EXIT_PROTOCOL)
                }
            },
            Frame::Exchange(body) => {
                if let Some((hops, block)) = body.give {
                    let block = block.to_vec();
                    if !self.accept_block(hops, &block) {
                        return Action::Close;
                    }
                }
                let give = match body.want {
                    Some(hash) => self.resolve_want(&hash),
                    None => None,
                };
                // Always answer with an exchange, even an empty one.
                match wire::encode_exchange(None, give.as_ref().map(|(h, b)| (*h, b.as_slice())))
                {
                    Ok(frame) => self.reply(frame),
                    Err(_) => self.fail(EXIT_PROTOCOL),
                }
            }
        }
    }
}

impl LinkHandler for Session {
    fn on_open(&mut self) -> Action {
        self.started = Instant::now();
        debug!(initiator = self.initiator, "session open");
        if !self.initiator {
            return Action::NoOp;
        }
        self.phase = Phase::Reconciling;
        self.rounds = 1;
        let blob = self.recon.initiate();
        match wire::encode_reconcile(&blob) {
            Ok(frame) => self.reply(frame),
            Err(_) => self.fail(EXIT_PROTOCOL),
        }
    }

    fn on_data(&mut self, frame: &[u8]) -> Action {
        self.rx_bytes += frame.len() as u64;
        let decoded = match wire::decode(frame) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "undecodable frame");
                return self.fail(EXIT_PROTOCOL);
            }
        };
        if self.initiator {
            self.on_data_initiator(decoded)
        } else {
            self.on_data_responder(decoded)
        }
    }

    fn on_close(&mut self, transport_code: i32) -> i32 {
        let code = self.fault.unwrap_or(if transport_code != 0 {
            EXIT_TRANSPORT
        } else {
            EXIT_OK
        });
        self.ctx.metrics.sessions_total.inc();
        if code != EXIT_OK {
            self.ctx.metrics.session_failures_total.inc();
        }
        info!(
            initiator = self.initiator,
            phase = ?self.phase,
            rounds = self.rounds,
            rx = self.rx_bytes,
            tx = self.tx_bytes,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            code,
            "session closed"
        );
        code
    }
}
