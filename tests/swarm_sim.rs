// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Two full nodes on a simulated ether: lifecycle loops, discovery, link
//! establishment and a complete delta sync, all in one process.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use driftnet::core::block::{compose, content_hash};
use driftnet::core::clock::SwarmClock;
use driftnet::core::keys::AuthorKey;
use driftnet::core::types::{Bssid, SwarmConfig};
use driftnet::monitoring::metrics::Metrics;
use driftnet::networking::peer_table::{PeerTable, PeerTableParams};
use driftnet::networking::sim::SimCloud;
use driftnet::networking::transport::HandlerFactory;
use driftnet::node::machine::{Node, NodeDeps};
use driftnet::storage::partition::MemPartition;
use driftnet::storage::repo::BlockRepo;
use driftnet::sync::reconcile::{PagedDiffReconciler, SyncIndex};
use driftnet::sync::session::{Session, SessionCtx};

struct SimNode {
    repo: Arc<BlockRepo>,
    index: Arc<Mutex<SyncIndex>>,
    clock: Arc<SwarmClock>,
    key: AuthorKey,
    node: Option<Node>,
}

fn fast_swarm_config() -> SwarmConfig {
    SwarmConfig {
        notify_ms: 100,
        notify_jitter_ms: 50,
        link_up_timeout_ms: 2_000,
        establish_timeout_ms: 2_000,
        backoff_ok_ms: 60_000,
        backoff_fail_ms: 1_000,
        max_rounds: 60,
    }
}

/// Build a node on the ether; the lifecycle loop starts on `launch`.
fn build_node(cloud: &Arc<SimCloud>, bssid: Bssid, rssi: i8) -> SimNode {
    let part = MemPartition::new(16 * 4096, 4096).expect("partition");
    let repo = Arc::new(BlockRepo::open(Box::new(part)).expect("repo"));
    let index = Arc::new(Mutex::new(SyncIndex::new()));
    let clock = Arc::new(SwarmClock::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));

    let ctx = SessionCtx {
        repo: repo.clone(),
        index: index.clone(),
        clock: clock.clone(),
        metrics: metrics.clone(),
        max_rounds: 60,
    };
    let factory: HandlerFactory = Arc::new(move |initiator| {
        let snapshot = ctx.index.lock().map(|i| i.snapshot()).unwrap_or_default();
        let handler: Box<dyn driftnet::networking::transport::LinkHandler> = Box::new(
            Session::new(
                ctx.clone(),
                initiator,
                Box::new(PagedDiffReconciler::new(snapshot)),
            ),
        );
        handler
    });

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
    let radio = cloud.register(bssid, rssi, event_tx, factory, Duration::from_secs(2));

    let peers = Arc::new(Mutex::new(PeerTable::new(PeerTableParams {
        backoff_ok: Duration::from_secs(60),
        backoff_fail: Duration::from_secs(1),
        ..PeerTableParams::default()
    })));

    let (node, _status_rx) = Node::new(
        fast_swarm_config(),
        NodeDeps {
            discovery: radio.clone(),
            transport: radio,
            peers,
            repo: repo.clone(),
            clock: clock.clone(),
            metrics,
        },
        event_rx,
        false,
    );

    SimNode {
        repo,
        index,
        clock,
        key: AuthorKey::generate().expect("key"),
        node: Some(node),
    }
}

impl SimNode {
    fn seed(&self, body: &[u8], date: u64) -> Vec<u8> {
        let bytes = compose(body, date, &self.key).expect("compose");
        self.repo.write(&bytes, 0).expect("write");
        self.index
            .lock()
            .expect("index")
            .insert(date, content_hash(&bytes));
        bytes
    }

    fn launch(&mut self) -> tokio::task::JoinHandle<()> {
        let node = self.node.take().expect("already launched");
        tokio::spawn(node.run())
    }
}

async fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_nodes_find_each_other_and_sync() {
    let cloud = SimCloud::new();
    let mut alpha = build_node(&cloud, Bssid([0xaa; 6]), -40);
    let mut beta = build_node(&cloud, Bssid([0xbb; 6]), -55);

    let blocks: Vec<Vec<u8>> = (0..3u64)
        .map(|i| alpha.seed(format!("field report {i}").as_bytes(), 1_650_000_000_000 + i))
        .collect();

    let a_run = alpha.launch();
    let b_run = beta.launch();

    let synced = wait_until(Duration::from_secs(15), || beta.repo.count() == 3).await;
    assert!(synced, "beta never received the blocks");

    for bytes in &blocks {
        let replica = beta.repo.find_by_hash(&content_hash(bytes)).expect("replica");
        assert_eq!(replica.block, *bytes);
        assert_eq!(replica.meta.hops, 1);
    }
    // Origin repository unchanged.
    assert_eq!(alpha.repo.count(), 3);
    for bytes in &blocks {
        assert_eq!(
            alpha
                .repo
                .find_by_hash(&content_hash(bytes))
                .expect("origin")
                .meta
                .hops,
            0
        );
    }
    // Beta's swarm clock adopted the block dates.
    assert!(beta.clock.now() > 0);

    a_run.abort();
    b_run.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn symmetric_deltas_merge_across_the_ether() {
    let cloud = SimCloud::new();
    let mut alpha = build_node(&cloud, Bssid([0x01; 6]), -40);
    let mut beta = build_node(&cloud, Bssid([0x02; 6]), -50);

    let a_only = alpha.seed(b"seen in the north", 1_650_000_000_100);
    let b_only = beta.seed(b"seen in the south", 1_650_000_000_200);

    let a_run = alpha.launch();
    let b_run = beta.launch();

    let merged = wait_until(Duration::from_secs(15), || {
        alpha.repo.count() == 2 && beta.repo.count() == 2
    })
    .await;
    assert!(merged, "repositories never converged");

    assert!(alpha.repo.find_by_hash(&content_hash(&b_only)).is_some());
    assert!(beta.repo.find_by_hash(&content_hash(&a_only)).is_some());

    a_run.abort();
    b_run.abort();
}
