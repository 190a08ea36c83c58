#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Driftnet node entrypoint (systemd-friendly).
//! Binds the block repository, starts the link transport and runs the
//! lifecycle loop until interrupted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use driftnet::core::clock::SwarmClock;
use driftnet::core::keys::AuthorKey;
use driftnet::core::types::{LinkConfig, NodeConfig, StorageConfig, SwarmConfig};
use driftnet::monitoring::metrics::Metrics;
use driftnet::networking::discovery::StaticDiscovery;
use driftnet::networking::peer_table::{PeerTable, PeerTableParams};
use driftnet::networking::tcp::{spawn_tcp_transport, TcpTransportConfig};
use driftnet::networking::transport::HandlerFactory;
use driftnet::node::machine::{Node, NodeDeps};
use driftnet::storage::partition::FilePartition;
use driftnet::storage::repo::BlockRepo;
use driftnet::sync::reconcile::{PagedDiffReconciler, SyncIndex};
use driftnet::sync::session::{Session, SessionCtx};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true"))
}

fn load_config() -> Result<NodeConfig> {
    if let Ok(path) = std::env::var("DRIFT_CONFIG") {
        let raw = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
        return toml::from_str(&raw).with_context(|| format!("parse {path}"));
    }

    // Environment-only bring-up.
    let peers: Vec<String> = env("DRIFT_PEERS", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Ok(NodeConfig {
        node: driftnet::core::types::NodeSettings {
            name: env("DRIFT_NAME", "driftnet"),
            data_dir: env("DRIFT_DATA_DIR", "./data"),
        },
        storage: StorageConfig::default(),
        link: LinkConfig {
            listen_port: env("DRIFT_LISTEN_PORT", "1984").parse().unwrap_or(1984),
            peers,
            ..LinkConfig::default()
        },
        swarm: SwarmConfig::default(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let cfg = load_config()?;
    info!(name = %cfg.node.name, data_dir = %cfg.node.data_dir, "driftnet node starting");

    let metrics = Arc::new(Metrics::new().map_err(|e| anyhow::anyhow!("metrics init: {e}"))?);

    let key = AuthorKey::load_or_create(&cfg.node.data_dir)
        .map_err(|e| anyhow::anyhow!("author key: {e}"))?;
    info!(author = %hex::encode(key.public_key()), "author identity");

    let partition = FilePartition::bind(
        &cfg.node.data_dir,
        &cfg.storage.partition_label,
        cfg.storage.slots * 4096,
    )
    .map_err(|e| anyhow::anyhow!("partition: {e}"))?;
    let repo = Arc::new(BlockRepo::open(Box::new(partition)).map_err(|e| anyhow::anyhow!("repository: {e}"))?);

    // Long-press analogue: factory reset before the swarm loop starts.
    if env_flag("DRIFT_PURGE") {
        warn!("purging repository on operator request");
        repo.purge().map_err(|e| anyhow::anyhow!("purge: {e}"))?;
    }

    let clock = Arc::new(SwarmClock::new());
    let index = Arc::new(Mutex::new(SyncIndex::build(&repo)));
    for slot in repo.iter() {
        if let Ok(view) = slot.block_view() {
            clock.bump(view.date_utc_ms());
        }
    }
    metrics.blocks_stored.set(repo.count() as i64);
    info!(
        blocks = repo.count(),
        indexed = index.lock().map(|i| i.len()).unwrap_or(0),
        swarm_time = clock.now(),
        "repository online"
    );

    let ctx = SessionCtx {
        repo: repo.clone(),
        index: index.clone(),
        clock: clock.clone(),
        metrics: metrics.clone(),
        max_rounds: cfg.swarm.max_rounds,
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
    let transport = spawn_tcp_transport(
        TcpTransportConfig {
            listen_port: cfg.link.listen_port,
            inactivity: Duration::from_millis(cfg.link.inactivity_ms),
            connect_timeout: Duration::from_millis(cfg.swarm.link_up_timeout_ms),
        },
        factory,
        event_tx.clone(),
    );
    let discovery = Arc::new(StaticDiscovery::new(
        &cfg.link.peers,
        transport.dial_handle(),
        event_tx,
    ));

    let peers = Arc::new(Mutex::new(PeerTable::new(PeerTableParams {
        backoff_ok: Duration::from_millis(cfg.swarm.backoff_ok_ms),
        backoff_fail: Duration::from_millis(cfg.swarm.backoff_fail_ms),
        ..PeerTableParams::default()
    })));

    let (node, _status_rx) = Node::new(
        cfg.swarm.clone(),
        NodeDeps {
            discovery,
            transport,
            peers,
            repo,
            clock,
            metrics,
        },
        event_rx,
        env_flag("DRIFT_GATEWAY"),
    );

    tokio::select! {
        _ = node.run() => {
            warn!("lifecycle loop ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
    Ok(())
}
