// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use prometheus::Registry;
use redpacket::config::{PersistedConfig, RedPacketConfig};
use redpacket::node::{run_node, start_metrics_server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "redpacket-node", rename_all = "kebab-case")]
struct Args {
    #[clap(long)]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RedPacketConfig::load(&args.config_path)?;
    let registry = Registry::new();

    let manager = run_node(&config, &registry).await?;
    start_metrics_server(config.metrics_addr, registry);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.shutdown();
    manager.store().save(&config.store_path).await?;
    Ok(())
}
