// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node configuration, loaded from YAML or JSON

use crate::relay::{DEFAULT_RELAY_ENDPOINT, DEFAULT_RELAY_SECRET};
use crate::retry::RetryPolicy;
use crate::types::ChainNetwork;
use anyhow::Context;
use ethers::signers::LocalWallet;
use ethers::types::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedPacketConfig {
    pub chain: ChainConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Optional gas relay for claims from accounts without coin
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    pub network: ChainNetwork,
    /// File holding the hex private key of the signing account
    pub key_path: PathBuf,
    /// Extra addresses whose creations count as our own; the signing
    /// account is always included
    #[serde(default)]
    pub own_addresses: Vec<Address>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// How often live packets are checked for expiry, in seconds
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            expiry_interval: default_expiry_interval(),
        }
    }
}

impl WatcherConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    pub endpoint: String,
    /// HS256 secret shared with the relay deployment
    pub shared_token: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("redpacket-store.json")
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9185))
}

fn default_expiry_interval() -> Duration {
    Duration::from_secs(60)
}

impl RedPacketConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.chain.rpc_url.starts_with("http://")
            && !self.chain.rpc_url.starts_with("https://")
        {
            return Err(format!(
                "rpc-url must be an http(s) endpoint, got {}",
                self.chain.rpc_url
            ));
        }
        self.watcher.retry.validate()?;
        if self.watcher.expiry_interval.is_zero() {
            return Err("expiry-interval must be positive".into());
        }
        if let Some(relay) = &self.relay {
            Url::parse(&relay.endpoint).map_err(|e| format!("bad relay endpoint: {e}"))?;
        }
        Ok(())
    }

    /// Starting point written by `gen-config`
    pub fn example() -> Self {
        Self {
            chain: ChainConfig {
                rpc_url: "https://ropsten.infura.io/v3/your-project-id".into(),
                contract_address: Address::zero(),
                network: ChainNetwork::Ropsten,
                key_path: PathBuf::from("redpacket.key"),
                own_addresses: Vec::new(),
            },
            watcher: WatcherConfig::default(),
            relay: Some(RelayConfig {
                endpoint: DEFAULT_RELAY_ENDPOINT.into(),
                shared_token: DEFAULT_RELAY_SECRET.into(),
            }),
            store_path: default_store_path(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Load and save behavior shared by config types. `.yaml`/`.yml`
/// files parse as YAML, anything else as JSON; saving always writes
/// pretty JSON.
pub trait PersistedConfig: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to load config from {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&contents).context("unable to parse yaml config")
            }
            _ => serde_json::from_str(&contents).context("unable to parse json config"),
        }
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("unable to save config to {}", path.display()))?;
        Ok(())
    }
}

impl PersistedConfig for RedPacketConfig {}

/// Reads a hex private key (with or without `0x`) from `path`
pub fn load_wallet(path: &Path) -> anyhow::Result<LocalWallet> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("unable to read key file {}", path.display()))?;
    let trimmed = raw.trim();
    let key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    key.parse::<LocalWallet>()
        .with_context(|| format!("invalid private key in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        fs::write(
            &path,
            concat!(
                "chain:\n",
                "  rpc-url: https://ropsten.example.org\n",
                "  contract-address: \"0x5fbdb2315678afecb367f032d93f642f64180aa3\"\n",
                "  network: ropsten\n",
                "  key-path: /var/lib/redpacket/key\n",
            ),
        )
        .unwrap();

        let config = RedPacketConfig::load(&path).unwrap();
        assert_eq!(config.chain.network, ChainNetwork::Ropsten);
        assert!(config.chain.own_addresses.is_empty());
        assert_eq!(config.watcher.retry.max_attempts, 10);
        assert_eq!(config.watcher.expiry_interval, Duration::from_secs(60));
        assert!(config.relay.is_none());
        assert_eq!(config.store_path, default_store_path());
        assert_eq!(config.metrics_addr, default_metrics_addr());
        config.validate().unwrap();
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        let config = RedPacketConfig::example();
        config.save(&path).unwrap();
        assert_eq!(RedPacketConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = RedPacketConfig::example();
        config.chain.rpc_url = "ftp://nope".into();
        assert!(config.validate().is_err());

        let mut config = RedPacketConfig::example();
        config.watcher.expiry_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = RedPacketConfig::example();
        config.relay = Some(RelayConfig {
            endpoint: "not a url".into(),
            shared_token: String::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_wallet_accepts_prefixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, format!("0x{KEY}\n")).unwrap();

        let expected: LocalWallet = KEY.parse().unwrap();
        let loaded = load_wallet(&path).unwrap();
        assert_eq!(loaded.address(), expected.address());
    }

    #[test]
    fn test_load_wallet_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, "not a key").unwrap();
        assert!(load_wallet(&path).is_err());
    }
}
