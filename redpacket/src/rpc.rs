// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ledger access trait implemented by the live client and by test mocks

use crate::error::RedPacketResult;
use crate::types::{
    Availability, CallOptions, ContractCall, EventKind, ObservedEvent, ReceiptInfo,
};
use async_trait::async_trait;
use ethers::types::{Address, TxHash, H256, U256};

/// Everything the lifecycle manager needs from the chain.
///
/// Mutations go through [`submit`](ContractRpc::submit); confirmation is
/// observed separately through block-number lookups and block-scoped
/// event queries, because a submitted transaction surfaces on chain
/// with an unbounded delay.
#[async_trait]
pub trait ContractRpc: Send + Sync + 'static {
    /// Gas estimate for the call, run before any submission
    async fn estimate_gas(&self, call: &ContractCall, opts: &CallOptions)
        -> RedPacketResult<U256>;

    /// Current gas price suggested by the node
    async fn gas_price(&self) -> RedPacketResult<U256>;

    /// Signs and broadcasts the call, returning its transaction hash
    async fn submit(&self, call: &ContractCall, opts: &CallOptions) -> RedPacketResult<TxHash>;

    /// Blocks until the transaction has a receipt
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> RedPacketResult<ReceiptInfo>;

    /// Block the transaction was mined in; `None` while unmined
    async fn transaction_block_number(&self, tx_hash: TxHash) -> RedPacketResult<Option<u64>>;

    /// All events of one kind emitted in exactly the given block
    async fn events_in_block(
        &self,
        kind: EventKind,
        block: u64,
    ) -> RedPacketResult<Vec<ObservedEvent>>;

    /// The contract's `check_availability` view
    async fn check_availability(&self, red_packet_id: H256) -> RedPacketResult<Availability>;

    /// Addresses that already claimed a share of the packet
    async fn check_claimed_list(&self, red_packet_id: H256) -> RedPacketResult<Vec<Address>>;
}
