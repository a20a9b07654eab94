// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Long-running node assembly: wiring, background tasks and the
//! metrics endpoint

use crate::config::{load_wallet, RedPacketConfig};
use crate::controller::RedPacketManager;
use crate::error::RedPacketError;
use crate::eth_rpc::EthContractRpc;
use crate::metrics::RedPacketMetrics;
use crate::store::PacketStore;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use ethers::signers::Signer;
use prometheus::{Registry, TextEncoder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builds the manager and its live RPC client from the config. The
/// store is primed from the snapshot file if one exists.
pub async fn build_manager(
    config: &RedPacketConfig,
    metrics: Arc<RedPacketMetrics>,
) -> anyhow::Result<Arc<RedPacketManager<EthContractRpc>>> {
    config.validate().map_err(RedPacketError::InvalidConfig)?;

    let wallet = load_wallet(&config.chain.key_path)?;
    let mut own_addresses = config.chain.own_addresses.clone();
    own_addresses.push(wallet.address());

    let rpc = Arc::new(
        EthContractRpc::new(&config.chain.rpc_url, config.chain.contract_address, wallet).await?,
    );
    let store = Arc::new(PacketStore::new());
    let loaded = store.load(&config.store_path).await?;
    metrics.stored_packets.set(loaded as i64);

    Ok(RedPacketManager::new(
        rpc,
        store,
        own_addresses,
        config.watcher.retry.clone(),
        config.watcher.expiry_interval,
        metrics,
    ))
}

/// Full node startup: build, resume in-flight watches, start the
/// snapshot and uptime tasks.
pub async fn run_node(
    config: &RedPacketConfig,
    registry: &Registry,
) -> anyhow::Result<Arc<RedPacketManager<EthContractRpc>>> {
    let metrics = Arc::new(RedPacketMetrics::new(registry));
    let manager = build_manager(config, metrics.clone()).await?;
    let resumed = manager.resume().await;
    info!(
        "red packet node ready on {} ({} record(s), {resumed} watch(es) resumed)",
        config.chain.network,
        manager.store().len().await
    );

    spawn_snapshot_task(
        manager.store().clone(),
        config.store_path.clone(),
        metrics.clone(),
    );
    spawn_uptime_task(metrics);
    Ok(manager)
}

/// Rewrites the snapshot after every store change
fn spawn_snapshot_task(
    store: Arc<PacketStore>,
    path: PathBuf,
    metrics: Arc<RedPacketMetrics>,
) -> JoinHandle<()> {
    // Subscribe before spawning so no change between startup and the
    // task's first poll is missed.
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                // A lagged receiver missed intermediate states, but the
                // snapshot always writes the current one.
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if let Err(e) = store.save(&path).await {
                        warn!("snapshot write failed: {e}");
                    }
                    metrics.stored_packets.set(store.len().await as i64);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_uptime_task(metrics: Arc<RedPacketMetrics>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            metrics.uptime.set(started.elapsed().as_secs() as i64);
        }
    })
}

pub fn start_metrics_server(addr: SocketAddr, registry: Registry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(registry);
        info!("metrics server listening on {addr}");
        if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
            error!("metrics server stopped: {e}");
        }
    })
}

async fn metrics_handler(State(registry): State<Registry>) -> String {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap_or_default()
}
