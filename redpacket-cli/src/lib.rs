// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Command line client for the red packet library.
//!
//! Every on-chain command loads the node config, drives the operation
//! through a [`RedPacketManager`], waits until the record settles, and
//! snapshots the store before exiting.

use anyhow::{anyhow, Context};
use clap::Parser;
use ethers::signers::Signer;
use ethers::types::{Address, U256};
use redpacket::config::{load_wallet, PersistedConfig, RedPacketConfig};
use redpacket::controller::{RedPacketManager, TIMEOUT_REASON};
use redpacket::error::RedPacketError;
use redpacket::eth_rpc::EthContractRpc;
use redpacket::metrics::RedPacketMetrics;
use redpacket::node::build_manager;
use redpacket::relay::{RelayClient, DEFAULT_RELAY_ENDPOINT, DEFAULT_RELAY_SECRET};
use redpacket::store::PacketStore;
use redpacket::types::{
    CreateRequest, IncomingPayload, RedPacket, RedPacketStatus, TokenType, DEFAULT_DURATION_SECS,
};
use redpacket::utils::format_balance;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Decimals of the native coin, used to pretty-print amounts
const NATIVE_DECIMALS: u32 = 18;

#[derive(Parser)]
#[clap(name = "redpacket-cli", rename_all = "kebab-case")]
pub struct Args {
    #[clap(subcommand)]
    pub command: RedPacketCommand,
}

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
pub enum RedPacketCommand {
    #[clap(name = "gen-config")]
    GenConfig { path: PathBuf },
    // Create a packet and wait until the chain confirms it
    #[clap(name = "create")]
    Create {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        // Total amount in the token's smallest unit
        #[clap(long = "total")]
        total: String,
        #[clap(long = "shares")]
        shares: u64,
        #[clap(long = "message", default_value = "Best wishes!")]
        message: String,
        // Sender name shown to recipients
        #[clap(long = "name", default_value = "anonymous")]
        name: String,
        // Split the total randomly instead of evenly
        #[clap(long = "random")]
        random: bool,
        // ERC20 contract address; omit to send the native coin
        #[clap(long = "token")]
        token: Option<Address>,
        // Seconds until the sender may refund; defaults to one day
        #[clap(long = "duration")]
        duration: Option<u64>,
    },
    #[clap(name = "claim")]
    Claim {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        id: String,
        password: String,
    },
    // Claim a share through the gas relay, for accounts without coin
    #[clap(name = "claim-via-relay")]
    ClaimViaRelay {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        id: String,
        password: String,
    },
    #[clap(name = "refund")]
    Refund {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        id: String,
    },
    // Query the contract's availability view for a confirmed packet
    #[clap(name = "check")]
    Check {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        id: String,
    },
    // List the addresses that already claimed a share
    #[clap(name = "claimers")]
    Claimers {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        id: String,
    },
    #[clap(name = "list")]
    List {
        #[clap(long = "config-path")]
        config_path: PathBuf,
    },
    // Register a packet from a payload file a sender shared with us
    #[clap(name = "import")]
    Import {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        payload_path: PathBuf,
    },
}

impl RedPacketCommand {
    pub async fn handle(self) -> anyhow::Result<()> {
        match self {
            RedPacketCommand::GenConfig { path } => {
                RedPacketConfig::example().save(&path)?;
                println!("example config written to {}", path.display());
                Ok(())
            }
            RedPacketCommand::Create {
                config_path,
                total,
                shares,
                message,
                name,
                random,
                token,
                duration,
            } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let wallet = load_wallet(&config.chain.key_path)?;
                let total =
                    U256::from_dec_str(&total).context("total must be a decimal amount")?;

                let request = CreateRequest {
                    sender_address: wallet.address(),
                    sender_name: name,
                    token_type: if token.is_some() {
                        TokenType::Erc20
                    } else {
                        TokenType::Native
                    },
                    token_address: token,
                    total_amount: total,
                    share_count: shares,
                    is_random_split: random,
                    message,
                    network: config.chain.network,
                    duration: duration.unwrap_or(DEFAULT_DURATION_SECS),
                };
                let (record, password) = manager.create(request).await?;
                println!("packet {} submitted, waiting for confirmation", record.id);

                let record =
                    settle(&manager, &config, &record.id, RedPacketStatus::Pending).await?;
                println!("packet confirmed ({})", record.status);
                println!("password: {password}");
                println!("hand this payload to the recipients:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&share_payload(&record, password)?)?
                );
                Ok(())
            }
            RedPacketCommand::Claim {
                config_path,
                id,
                password,
            } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let wallet = load_wallet(&config.chain.key_path)?;

                manager.claim(&id, &password, wallet.address()).await?;
                println!("claim submitted, waiting for confirmation");
                let record =
                    settle(&manager, &config, &id, RedPacketStatus::ClaimPending).await?;
                print_claimed(&record);
                Ok(())
            }
            RedPacketCommand::ClaimViaRelay {
                config_path,
                id,
                password,
            } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let relay = relay_client(&config)?;
                let wallet = load_wallet(&config.chain.key_path)?;

                let tx_hash = manager
                    .claim_via_relay(&id, &password, wallet.address(), &relay)
                    .await?;
                println!("relay broadcast transaction {tx_hash:?}, waiting for confirmation");
                let record =
                    settle(&manager, &config, &id, RedPacketStatus::ClaimPending).await?;
                print_claimed(&record);
                Ok(())
            }
            RedPacketCommand::Refund { config_path, id } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;

                manager.refund(&id).await?;
                println!("refund submitted, waiting for confirmation");
                let record =
                    settle(&manager, &config, &id, RedPacketStatus::RefundPending).await?;
                match record.remaining_balance {
                    Some(balance) => println!(
                        "refunded {} to {:?}",
                        describe_amount(&record, balance),
                        record.sender_address
                    ),
                    None => println!("refund finished with status {}", record.status),
                }
                Ok(())
            }
            RedPacketCommand::Check { config_path, id } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let record = manager
                    .store()
                    .get(&id)
                    .await
                    .ok_or_else(|| anyhow!("no packet with id {id}"))?;

                let availability = manager.check_availability(&id).await?;
                manager.shutdown();
                println!("token:   {}", describe_token(&record));
                println!(
                    "balance: {}",
                    describe_amount(&record, availability.balance)
                );
                println!(
                    "claimed: {} of {} share(s)",
                    availability.claimed, availability.total
                );
                println!("expired: {}", availability.expired);
                if availability.if_claimed {
                    println!("this account has already claimed a share");
                }
                Ok(())
            }
            RedPacketCommand::Claimers { config_path, id } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let claimers = manager.claimed_list(&id).await?;
                manager.shutdown();
                if claimers.is_empty() {
                    println!("nobody has claimed a share yet");
                }
                for address in claimers {
                    println!("{address:?}");
                }
                Ok(())
            }
            RedPacketCommand::List { config_path } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let records = manager.store().list().await;
                manager.shutdown();
                if records.is_empty() {
                    println!("the store is empty");
                }
                for record in records {
                    println!(
                        "{}  {:<14} {:>10} x{:<3} \"{}\" from {}",
                        record.id,
                        record.status.to_string(),
                        describe_amount(&record, record.total_amount),
                        record.share_count,
                        record.message,
                        record.sender_name,
                    );
                }
                Ok(())
            }
            RedPacketCommand::Import {
                config_path,
                payload_path,
            } => {
                let config = RedPacketConfig::load(&config_path)?;
                let manager = cli_manager(&config).await?;
                let contents = fs::read_to_string(&payload_path).with_context(|| {
                    format!("unable to read payload {}", payload_path.display())
                })?;
                let payload: IncomingPayload =
                    serde_json::from_str(&contents).context("unable to parse payload")?;

                let record = manager.import_incoming(payload).await?;
                println!(
                    "imported packet {} from {}, waiting for confirmation",
                    record.id, record.sender_name
                );
                let record =
                    settle(&manager, &config, &record.id, RedPacketStatus::Pending).await?;
                println!(
                    "packet is {} and holds {} across {} share(s)",
                    record.status,
                    describe_amount(&record, record.total_amount),
                    record.share_count
                );
                Ok(())
            }
        }
    }
}

/// Builds a manager the way the node does, with a throwaway metrics
/// registry, and re-arms whatever a previous run left in flight.
pub async fn cli_manager(
    config: &RedPacketConfig,
) -> anyhow::Result<Arc<RedPacketManager<EthContractRpc>>> {
    let metrics = Arc::new(RedPacketMetrics::new_for_testing());
    let manager = build_manager(config, metrics).await?;
    manager.resume().await;
    Ok(manager)
}

fn relay_client(config: &RedPacketConfig) -> anyhow::Result<RelayClient> {
    let wallet = load_wallet(&config.chain.key_path)?;
    let (endpoint, secret) = match &config.relay {
        Some(relay) => (relay.endpoint.as_str(), relay.shared_token.clone()),
        None => (DEFAULT_RELAY_ENDPOINT, DEFAULT_RELAY_SECRET.to_string()),
    };
    Ok(RelayClient::new(endpoint, wallet, secret)?)
}

/// Waits until the record leaves `busy`, snapshots the store, and
/// turns a failed packet into an error carrying its reason.
async fn settle(
    manager: &Arc<RedPacketManager<EthContractRpc>>,
    config: &RedPacketConfig,
    id: &str,
    busy: RedPacketStatus,
) -> anyhow::Result<RedPacket> {
    let record = wait_while(manager.store(), id, busy).await?;
    manager.store().save(&config.store_path).await?;
    manager.shutdown();
    if record.status == RedPacketStatus::Failed {
        // A timeout only means we could not confirm; the transaction
        // may still land later.
        return match record.failure_reason.as_deref() {
            Some(TIMEOUT_REASON) => Err(RedPacketError::ConfirmTimeout.into()),
            reason => Err(anyhow!(
                "packet {id} failed: {}",
                reason.unwrap_or("unknown reason")
            )),
        };
    }
    Ok(record)
}

async fn wait_while(
    store: &Arc<PacketStore>,
    id: &str,
    busy: RedPacketStatus,
) -> anyhow::Result<RedPacket> {
    let mut changes = store.subscribe();
    loop {
        let record = store
            .get(id)
            .await
            .ok_or_else(|| anyhow!("packet {id} is gone from the store"))?;
        if record.status != busy {
            return Ok(record);
        }
        let _ = changes.recv().await;
    }
}

/// The payload a sender hands to recipients so they can claim
fn share_payload(record: &RedPacket, password: String) -> anyhow::Result<IncomingPayload> {
    Ok(IncomingPayload {
        password,
        create_transaction_hash: record.create_transaction_hash.ok_or_else(|| {
            anyhow!("packet {} has no creation transaction hash", record.id)
        })?,
        sender_address: record.sender_address,
        sender_name: record.sender_name.clone(),
        token_type: record.token_type,
        token_address: record.token_address,
        total_amount: record.total_amount,
        share_count: record.share_count,
        is_random_split: record.is_random_split,
        message: record.message.clone(),
        network: record.network,
        duration: record.duration,
    })
}

fn print_claimed(record: &RedPacket) {
    match record.claimed_amount {
        Some(amount) => println!("claimed {}", describe_amount(record, amount)),
        None => println!("claim finished with status {}", record.status),
    }
}

/// Native amounts render in whole coins; ERC20 decimals are unknown
/// here, so those stay in base units.
fn describe_amount(record: &RedPacket, amount: U256) -> String {
    match record.token_type {
        TokenType::Native => format!("{} ETH", format_balance(amount, NATIVE_DECIMALS, 6)),
        TokenType::Erc20 => amount.to_string(),
    }
}

fn describe_token(record: &RedPacket) -> String {
    match (record.token_type, record.token_address) {
        (TokenType::Erc20, Some(address)) => format!("ERC20 {address:?}"),
        _ => "native coin".to_string(),
    }
}
