// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Live [`ContractRpc`] implementation backed by an Ethereum JSON-RPC node

use crate::abi::{
    ClaimSuccessFilter, CreationSuccessFilter, Erc20Token, HappyRedPacket, RefundSuccessFilter,
};
use crate::error::{RedPacketError, RedPacketResult};
use crate::rpc::ContractRpc;
use crate::types::{
    Availability, CallOptions, ClaimOutcome, ContractCall, CreationOutcome, EventKind,
    EventPayload, ObservedEvent, ReceiptInfo, RefundOutcome,
};
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TxHash, H256, U256};
use std::sync::Arc;
use std::time::Duration;

pub type RpcMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Signing client bound to one HappyRedPacket deployment
#[derive(Debug, Clone)]
pub struct EthContractRpc {
    provider: Arc<RpcMiddleware>,
    contract: HappyRedPacket<RpcMiddleware>,
    contract_address: Address,
}

impl EthContractRpc {
    pub async fn new(
        rpc_url: &str,
        contract_address: Address,
        wallet: LocalWallet,
    ) -> RedPacketResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RedPacketError::InvalidConfig(format!("bad rpc url: {e}")))?
            .interval(Duration::from_millis(2000));
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| to_rpc_err(e.to_string()))?
            .as_u64();
        let provider = Arc::new(SignerMiddleware::new(
            provider,
            wallet.with_chain_id(chain_id),
        ));
        let contract = HappyRedPacket::new(contract_address, provider.clone());
        Ok(Self {
            provider,
            contract,
            contract_address,
        })
    }

    /// Unsigned transaction for the call, before gas settings are known
    fn typed_tx(&self, call: &ContractCall, opts: &CallOptions) -> TypedTransaction {
        let mut tx = match call {
            ContractCall::CreateRedPacket(create) => {
                self.contract
                    .create_red_packet(
                        create.hash_of_password.0,
                        U256::from(create.quantity),
                        create.is_random,
                        U256::from(create.duration),
                        create.seed.0,
                        create.message.clone(),
                        create.name.clone(),
                        create.token_type.contract_code(),
                        create.token_addr,
                        create.total_tokens,
                    )
                    .tx
            }
            ContractCall::Claim(claim) => {
                self.contract
                    .claim(
                        claim.id.0,
                        claim.password.clone(),
                        claim.recipient,
                        claim.validation.0,
                    )
                    .tx
            }
            ContractCall::Refund { id } => self.contract.refund(id.0).tx,
            // Goes to the token contract; the deployment is the spender
            ContractCall::Approve { token, amount } => {
                Erc20Token::new(*token, self.provider.clone())
                    .approve(self.contract_address, *amount)
                    .tx
            }
        };
        tx.set_from(opts.from);
        if let Some(value) = opts.value {
            tx.set_value(value);
        }
        tx
    }
}

#[async_trait]
impl ContractRpc for EthContractRpc {
    async fn estimate_gas(
        &self,
        call: &ContractCall,
        opts: &CallOptions,
    ) -> RedPacketResult<U256> {
        let tx = self.typed_tx(call, opts);
        self.provider
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| RedPacketError::EstimateFailed(e.to_string()))
    }

    async fn gas_price(&self) -> RedPacketResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| to_rpc_err(e.to_string()))
    }

    async fn submit(&self, call: &ContractCall, opts: &CallOptions) -> RedPacketResult<TxHash> {
        let mut tx = self.typed_tx(call, opts);
        if let Some(gas) = opts.gas {
            tx.set_gas(gas);
        }
        if let Some(gas_price) = opts.gas_price {
            tx.set_gas_price(gas_price);
        }
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(|e| RedPacketError::SubmitFailed(e.to_string()))?;
        Ok(*pending)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> RedPacketResult<ReceiptInfo> {
        let pending = PendingTransaction::new(tx_hash, self.provider.provider());
        let receipt = pending
            .await
            .map_err(|e| to_rpc_err(e.to_string()))?
            .ok_or_else(|| {
                RedPacketError::Rpc(format!("transaction {tx_hash:?} dropped without a receipt"))
            })?;
        Ok(ReceiptInfo {
            transaction_hash: tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            succeeded: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
        })
    }

    async fn transaction_block_number(&self, tx_hash: TxHash) -> RedPacketResult<Option<u64>> {
        let tx = self
            .provider
            .get_transaction(tx_hash)
            .await
            .map_err(|e| to_rpc_err(e.to_string()))?;
        Ok(tx.and_then(|t| t.block_number).map(|b| b.as_u64()))
    }

    async fn events_in_block(
        &self,
        kind: EventKind,
        block: u64,
    ) -> RedPacketResult<Vec<ObservedEvent>> {
        let topic = match kind {
            EventKind::Creation => CreationSuccessFilter::signature(),
            EventKind::Claim => ClaimSuccessFilter::signature(),
            EventKind::Refund => RefundSuccessFilter::signature(),
        };
        let filter = Filter::new()
            .from_block(block)
            .to_block(block)
            .address(self.contract_address)
            .topic0(topic);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| to_rpc_err(e.to_string()))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log.transaction_hash.unwrap_or_default();
            let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(block);
            let raw = RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            };
            let payload = match kind {
                EventKind::Creation => {
                    let ev = CreationSuccessFilter::decode_log(&raw)
                        .map_err(|e| RedPacketError::SerializationError(e.to_string()))?;
                    EventPayload::Creation(CreationOutcome {
                        id: H256(ev.id),
                        creator: ev.creator,
                        total: ev.total,
                        creation_time: ev.creation_time.min(U256::from(u64::MAX)).as_u64(),
                        token_address: ev.token_address,
                    })
                }
                EventKind::Claim => {
                    let ev = ClaimSuccessFilter::decode_log(&raw)
                        .map_err(|e| RedPacketError::SerializationError(e.to_string()))?;
                    EventPayload::Claim(ClaimOutcome {
                        id: H256(ev.id),
                        claimer: ev.claimer,
                        claimed_value: ev.claimed_value,
                        token_address: ev.token_address,
                    })
                }
                EventKind::Refund => {
                    let ev = RefundSuccessFilter::decode_log(&raw)
                        .map_err(|e| RedPacketError::SerializationError(e.to_string()))?;
                    EventPayload::Refund(RefundOutcome {
                        id: H256(ev.id),
                        token_address: ev.token_address,
                        remaining_balance: ev.remaining_balance,
                    })
                }
            };
            events.push(ObservedEvent {
                tx_hash,
                block_number,
                payload,
            });
        }
        Ok(events)
    }

    async fn check_availability(&self, red_packet_id: H256) -> RedPacketResult<Availability> {
        let (token_address, balance, total, claimed, expired, if_claimed) = self
            .contract
            .check_availability(red_packet_id.0)
            .call()
            .await
            .map_err(|e| to_rpc_err(e.to_string()))?;
        Ok(Availability {
            token_address,
            balance,
            total,
            claimed,
            expired,
            if_claimed,
        })
    }

    async fn check_claimed_list(&self, red_packet_id: H256) -> RedPacketResult<Vec<Address>> {
        self.contract
            .check_claimed_list(red_packet_id.0)
            .call()
            .await
            .map_err(|e| to_rpc_err(e.to_string()))
    }
}

fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    ["timeout", "timed out", "connection", "429", "503"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Split node errors into retryable and permanent
fn to_rpc_err(msg: String) -> RedPacketError {
    if is_transient_message(&msg) {
        RedPacketError::TransientRpc(msg)
    } else {
        RedPacketError::Rpc(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(to_rpc_err("request timed out".into()).is_transient());
        assert!(to_rpc_err("429 Too Many Requests".into()).is_transient());
        assert!(to_rpc_err("connection refused".into()).is_transient());
        assert!(!to_rpc_err("execution reverted".into()).is_transient());
        assert!(!to_rpc_err("invalid argument".into()).is_transient());
    }
}
