// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client for the gas relay service.
//!
//! Recipients without coin for gas can have the relay submit the claim
//! for them: fetch a challenge from `/hi`, sign it with the local key,
//! then post a JWT carrying the claim arguments and the signature to
//! `/please`. The relay answers with the hash of the transaction it
//! submitted.

use crate::error::{RedPacketError, RedPacketResult};
use crate::types::ChainNetwork;
use crate::utils::parse_tx_hash;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TxHash, H256};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_RELAY_ENDPOINT: &str = "https://redpacket.gives";
/// Shared HS256 secret of the public relay deployment
pub const DEFAULT_RELAY_SECRET: &str = "a3323cd1-fa42-44cd-b053-e474365ab3da";

/// One relayed claim
#[derive(Debug, Clone)]
pub struct RelayClaimRequest {
    pub red_packet_id: H256,
    pub password: String,
    pub recipient: Address,
    /// keccak256 of the recipient's raw address bytes
    pub validation: H256,
    pub network: ChainNetwork,
}

/// JWT claims the relay expects; hashes and addresses travel as
/// 0x-prefixed hex strings
#[derive(Debug, Serialize, Deserialize)]
struct RelayClaims {
    password: String,
    recipient: String,
    redpacket_id: String,
    validation: String,
    signature: String,
}

pub struct RelayClient {
    endpoint: Url,
    http: reqwest::Client,
    wallet: LocalWallet,
    secret: String,
}

impl RelayClient {
    pub fn new(endpoint: &str, wallet: LocalWallet, secret: String) -> RedPacketResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RedPacketError::InvalidConfig(format!("bad relay endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RedPacketError::Generic(format!("http client: {e}")))?;
        Ok(Self {
            endpoint,
            http,
            wallet,
            secret,
        })
    }

    /// Runs the challenge / sign / submit exchange and returns the
    /// hash of the claim transaction the relay broadcast.
    pub async fn claim(&self, request: &RelayClaimRequest) -> RedPacketResult<TxHash> {
        let network = request.network.as_str();
        let sender = format!("{:?}", self.wallet.address());

        let response = self
            .http
            .get(self.url("hi")?)
            .query(&[("id", sender.as_str()), ("network", network)])
            .send()
            .await
            .map_err(|e| RedPacketError::RelayError(format!("challenge request: {e}")))?;
        if !response.status().is_success() {
            return Err(RedPacketError::RelayError(format!(
                "challenge request returned {}",
                response.status()
            )));
        }
        let challenge = response
            .text()
            .await
            .map_err(|e| RedPacketError::RelayError(format!("challenge body: {e}")))?;

        let signature = self
            .wallet
            .sign_message(challenge.as_bytes())
            .await
            .map_err(|e| RedPacketError::RelayError(format!("challenge signing: {e}")))?;

        let claims = RelayClaims {
            password: request.password.clone(),
            recipient: format!("{:?}", request.recipient),
            redpacket_id: format!("{:?}", request.red_packet_id),
            validation: format!("{:?}", request.validation),
            signature: format!("0x{signature}"),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| RedPacketError::RelayError(format!("token encoding: {e}")))?;

        let response = self
            .http
            .get(self.url("please")?)
            .query(&[("payload", token.as_str()), ("network", network)])
            .send()
            .await
            .map_err(|e| RedPacketError::RelayError(format!("claim request: {e}")))?;
        if !response.status().is_success() {
            return Err(RedPacketError::RelayError(format!(
                "claim request returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| RedPacketError::RelayError(format!("claim body: {e}")))?;
        parse_tx_hash(&body).map_err(RedPacketError::RelayError)
    }

    fn url(&self, path: &str) -> RedPacketResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| RedPacketError::RelayError(format!("bad relay path: {e}")))
    }
}
