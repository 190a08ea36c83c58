// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Drives initiator and responder sessions against each other in-process,
//! frame by frame, and checks the observable protocol outcomes.

use std::sync::{Arc, Mutex};

use driftnet::core::block::{compose, content_hash};
use driftnet::core::clock::SwarmClock;
use driftnet::core::keys::AuthorKey;
use driftnet::monitoring::metrics::Metrics;
use driftnet::networking::transport::{Action, LinkHandler};
use driftnet::storage::partition::MemPartition;
use driftnet::storage::repo::BlockRepo;
use driftnet::sync::reconcile::{PagedDiffReconciler, SyncIndex};
use driftnet::sync::session::{Session, SessionCtx, EXIT_ROUNDS, EXIT_VERIFY};
use driftnet::sync::wire::{FRAME_CAP, T_EXCHANGE, T_RECONCILE};

struct Peer {
    ctx: SessionCtx,
    repo: Arc<BlockRepo>,
    index: Arc<Mutex<SyncIndex>>,
    clock: Arc<SwarmClock>,
    key: AuthorKey,
}

fn peer(slots: usize, max_rounds: u16) -> Peer {
    let part = MemPartition::new(slots * 4096, 4096).expect("partition");
    let repo = Arc::new(BlockRepo::open(Box::new(part)).expect("repo"));
    let index = Arc::new(Mutex::new(SyncIndex::new()));
    let clock = Arc::new(SwarmClock::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    Peer {
        ctx: SessionCtx {
            repo: repo.clone(),
            index: index.clone(),
            clock: clock.clone(),
            metrics,
            max_rounds,
        },
        repo,
        index,
        clock,
        key: AuthorKey::generate().expect("key"),
    }
}

impl Peer {
    fn seed(&self, body: &[u8], date: u64, hops: u8) -> Vec<u8> {
        let bytes = compose(body, date, &self.key).expect("compose");
        self.repo.write(&bytes, hops).expect("seed write");
        if hops < driftnet::sync::MAX_HOPS {
            self.index
                .lock()
                .expect("index")
                .insert(date, content_hash(&bytes));
        }
        bytes
    }

    fn session(&self, initiator: bool) -> Session {
        let snapshot = self.index.lock().expect("index").snapshot();
        Session::new(
            self.ctx.clone(),
            initiator,
            Box::new(PagedDiffReconciler::new(snapshot)),
        )
    }
}

#[derive(Default)]
struct WireStats {
    reconcile_frames: usize,
    exchange_frames: usize,
}

fn audit(frame: &[u8], stats: &mut WireStats) {
    assert!(!frame.is_empty(), "empty outbound frame");
    assert!(frame.len() <= FRAME_CAP, "frame over cap");
    let tag = frame[0] & 0x0f;
    assert!(
        [0b0001, 0b0010, 0b0110, 0b1010, 0b1110].contains(&tag),
        "illegal type byte {tag:#06b}"
    );
    match tag & 0b0011 {
        T_RECONCILE => stats.reconcile_frames += 1,
        T_EXCHANGE => stats.exchange_frames += 1,
        _ => unreachable!(),
    }
}

/// Ping-pong frames until the initiator terminates. Returns both exit
/// codes and the audited frame counts.
fn pump(initiator: &mut Session, responder: &mut Session) -> (i32, i32, WireStats) {
    let mut stats = WireStats::default();

    assert!(matches!(responder.on_open(), Action::NoOp));
    let mut outbound = match initiator.on_open() {
        Action::Reply(frame) => frame,
        other => panic!("initiator must transmit on open, got {other:?}"),
    };

    for _ in 0..1000 {
        audit(&outbound, &mut stats);
        let reply = match responder.on_data(&outbound) {
            Action::Reply(frame) => frame,
            Action::Close => {
                let r = responder.on_close(0);
                let i = initiator.on_close(0);
                return (i, r, stats);
            }
            Action::NoOp => panic!("responder went silent"),
        };
        audit(&reply, &mut stats);
        outbound = match initiator.on_data(&reply) {
            Action::Reply(frame) => frame,
            Action::Close => {
                // Initiator closed the link; the responder sees an orderly
                // remote close.
                let i = initiator.on_close(0);
                let r = responder.on_close(0);
                return (i, r, stats);
            }
            Action::NoOp => panic!("initiator went silent"),
        };
    }
    panic!("session never terminated");
}

#[test]
fn empty_versus_empty_closes_after_one_reconcile_roundtrip() {
    let a = peer(4, 60);
    let b = peer(4, 60);
    let mut ini = a.session(true);
    let mut res = b.session(false);

    let (code_a, code_b, stats) = pump(&mut ini, &mut res);
    assert_eq!(code_a, 0);
    assert_eq!(code_b, 0);
    assert_eq!(stats.reconcile_frames, 2);
    assert_eq!(stats.exchange_frames, 0);
    assert_eq!(a.repo.count(), 0);
    assert_eq!(b.repo.count(), 0);
}

#[test]
fn one_way_delivery_stores_everything_at_one_hop() {
    let a = peer(8, 60);
    let b = peer(8, 60);
    let mut blocks = Vec::new();
    for i in 0..3u64 {
        blocks.push(a.seed(format!("note {i}").as_bytes(), 1_650_000_000_000 + i, 0));
    }

    let mut ini = a.session(true);
    let mut res = b.session(false);
    let (code_a, code_b, _) = pump(&mut ini, &mut res);
    assert_eq!(code_a, 0);
    assert_eq!(code_b, 0);

    assert_eq!(a.repo.count(), 3);
    assert_eq!(b.repo.count(), 3);
    for bytes in &blocks {
        let found = b.repo.find_by_hash(&content_hash(bytes)).expect("replica");
        assert_eq!(found.block, *bytes);
        assert_eq!(found.meta.hops, 1);
    }
    // A's replicas keep their original hop count.
    for bytes in &blocks {
        assert_eq!(
            a.repo.find_by_hash(&content_hash(bytes)).expect("origin").meta.hops,
            0
        );
    }
    // The receiving clock adopted the newest block date.
    assert!(b.clock.now() > 0);
}

#[test]
fn symmetric_delta_converges_both_repositories() {
    let a = peer(8, 60);
    let b = peer(8, 60);

    let b1 = a.seed(b"b1", 1_650_000_000_001, 0);
    // b2 exists on both sides, authored by the same key.
    let b2 = compose(b"b2", 1_650_000_000_002, &a.key).expect("compose");
    a.repo.write(&b2, 0).expect("write");
    a.index
        .lock()
        .unwrap()
        .insert(1_650_000_000_002, content_hash(&b2));
    b.repo.write(&b2, 0).expect("write");
    b.index
        .lock()
        .unwrap()
        .insert(1_650_000_000_002, content_hash(&b2));
    let b3 = b.seed(b"b3", 1_650_000_000_003, 0);

    let mut ini = a.session(true);
    let mut res = b.session(false);
    let (code_a, code_b, _) = pump(&mut ini, &mut res);
    assert_eq!(code_a, 0);
    assert_eq!(code_b, 0);

    assert_eq!(a.repo.count(), 3);
    assert_eq!(b.repo.count(), 3);
    assert_eq!(b.repo.find_by_hash(&content_hash(&b1)).expect("b1").meta.hops, 1);
    assert_eq!(a.repo.find_by_hash(&content_hash(&b3)).expect("b3").meta.hops, 1);
    // The shared block was not rewritten.
    assert_eq!(a.repo.find_by_hash(&content_hash(&b2)).expect("b2").meta.hops, 0);
    assert_eq!(b.repo.find_by_hash(&content_hash(&b2)).expect("b2").meta.hops, 0);
}

#[test]
fn forged_block_is_dropped_and_session_exits_nonzero() {
    let b = peer(4, 60);
    let mut res = b.session(false);

    let key = AuthorKey::generate().expect("key");
    let mut forged = compose(b"forged", 1_650_000_000_000, &key).expect("compose");
    forged[40] ^= 0x01; // flip one signature byte

    let frame = driftnet::sync::wire::encode_exchange(None, Some((0, &forged))).expect("frame");
    // The responder keeps the conversation alive...
    assert!(matches!(res.on_data(&frame), Action::Reply(_)));
    // ...but nothing was stored, and the failure shows in the exit code.
    assert_eq!(b.repo.count(), 0);
    assert_eq!(res.on_close(0), EXIT_VERIFY);
}

#[test]
fn round_cap_terminates_runaway_sessions() {
    let a = peer(16, 3);
    let b = peer(16, 60);
    for i in 0..8u64 {
        a.seed(format!("bulk {i}").as_bytes(), 1_650_000_000_000 + i, 0);
    }

    let mut ini = a.session(true);
    let mut res = b.session(false);
    let (code_a, _, _) = pump(&mut ini, &mut res);
    assert_eq!(code_a, EXIT_ROUNDS);
    assert!(b.repo.count() < 8);
}

#[test]
fn replicas_at_the_hop_ceiling_are_not_reannounced() {
    let a = peer(4, 60);
    let b = peer(4, 60);
    let bytes = a.seed(b"well travelled", 1_650_000_000_000, driftnet::sync::MAX_HOPS - 1);

    let mut ini = a.session(true);
    let mut res = b.session(false);
    let (code_a, code_b, _) = pump(&mut ini, &mut res);
    assert_eq!(code_a, 0);
    assert_eq!(code_b, 0);

    let hash = content_hash(&bytes);
    // Stored at the ceiling, kept, but excluded from B's live index.
    let replica = b.repo.find_by_hash(&hash).expect("replica");
    assert_eq!(replica.meta.hops, driftnet::sync::MAX_HOPS);
    assert!(!b.index.lock().unwrap().contains_hash(&hash));
    assert!(a.index.lock().unwrap().contains_hash(&hash));
}

#[test]
fn want_fulfilment_burns_one_decay_share() {
    let a = peer(4, 60);
    let b = peer(4, 60);
    let bytes = a.seed(b"shared once", 1_650_000_000_000, 0);

    let mut ini = a.session(true);
    let mut res = b.session(false);
    pump(&mut ini, &mut res);

    let origin = a.repo.find_by_hash(&content_hash(&bytes)).expect("origin");
    assert_eq!(
        origin.meta.shares_left(),
        driftnet::storage::repo::DECAY_SHARES - 1
    );
}
