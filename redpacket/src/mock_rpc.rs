// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A mock [`ContractRpc`] driven by preset responses, plus shared test
//! fixtures

use crate::error::{RedPacketError, RedPacketResult};
use crate::rpc::ContractRpc;
use crate::types::{
    Availability, CallOptions, ChainNetwork, ClaimOutcome, ContractCall, CreationOutcome,
    EventKind, EventPayload, ObservedEvent, ReceiptInfo, RedPacket, RedPacketStatus,
    RefundOutcome, TokenType, DEFAULT_DURATION_SECS,
};
use async_trait::async_trait;
use ethers::types::{Address, TxHash, H256, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Preset-driven mock. Queued responses are consumed front to back;
/// an empty queue falls back to a benign default (estimation works,
/// submissions are accepted, transactions are unmined, packets are
/// live). Plain `std` locks, never held across an await.
#[derive(Default)]
pub struct MockContractRpc {
    estimate_responses: Mutex<VecDeque<RedPacketResult<U256>>>,
    submit_responses: Mutex<VecDeque<RedPacketResult<TxHash>>>,
    receipts: Mutex<HashMap<TxHash, ReceiptInfo>>,
    block_numbers: Mutex<HashMap<TxHash, u64>>,
    block_number_errors: Mutex<VecDeque<RedPacketError>>,
    events: Mutex<HashMap<(EventKind, u64), Vec<ObservedEvent>>>,
    event_errors: Mutex<VecDeque<RedPacketError>>,
    availability_responses: Mutex<VecDeque<Availability>>,
    claimed_lists: Mutex<HashMap<H256, Vec<Address>>>,
    submitted: Mutex<Vec<(ContractCall, CallOptions)>>,
    estimate_count: AtomicUsize,
    block_number_count: AtomicUsize,
    event_query_count: AtomicUsize,
    availability_count: AtomicUsize,
}

impl MockContractRpc {
    pub fn queue_estimate(&self, result: RedPacketResult<U256>) {
        self.estimate_responses.lock().unwrap().push_back(result);
    }

    pub fn queue_submit(&self, result: RedPacketResult<TxHash>) {
        self.submit_responses.lock().unwrap().push_back(result);
    }

    pub fn set_receipt(&self, receipt: ReceiptInfo) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.transaction_hash, receipt);
    }

    /// Marks the transaction as mined in `block`
    pub fn set_block_number(&self, tx_hash: TxHash, block: u64) {
        self.block_numbers.lock().unwrap().insert(tx_hash, block);
    }

    pub fn queue_block_number_error(&self, err: RedPacketError) {
        self.block_number_errors.lock().unwrap().push_back(err);
    }

    pub fn add_event(&self, kind: EventKind, block: u64, event: ObservedEvent) {
        self.events
            .lock()
            .unwrap()
            .entry((kind, block))
            .or_default()
            .push(event);
    }

    pub fn queue_event_error(&self, err: RedPacketError) {
        self.event_errors.lock().unwrap().push_back(err);
    }

    pub fn queue_availability(&self, availability: Availability) {
        self.availability_responses
            .lock()
            .unwrap()
            .push_back(availability);
    }

    pub fn set_claimed_list(&self, red_packet_id: H256, claimers: Vec<Address>) {
        self.claimed_lists
            .lock()
            .unwrap()
            .insert(red_packet_id, claimers);
    }

    /// Accepted submissions, in order, with the options they carried
    pub fn submitted(&self) -> Vec<(ContractCall, CallOptions)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_count.load(Ordering::SeqCst)
    }

    pub fn block_number_calls(&self) -> usize {
        self.block_number_count.load(Ordering::SeqCst)
    }

    pub fn event_query_calls(&self) -> usize {
        self.event_query_count.load(Ordering::SeqCst)
    }

    pub fn availability_calls(&self) -> usize {
        self.availability_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractRpc for MockContractRpc {
    async fn estimate_gas(
        &self,
        _call: &ContractCall,
        _opts: &CallOptions,
    ) -> RedPacketResult<U256> {
        self.estimate_count.fetch_add(1, Ordering::SeqCst);
        match self.estimate_responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(U256::from(50_000)),
        }
    }

    async fn gas_price(&self) -> RedPacketResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn submit(&self, call: &ContractCall, opts: &CallOptions) -> RedPacketResult<TxHash> {
        let queued = self.submit_responses.lock().unwrap().pop_front();
        let mut submitted = self.submitted.lock().unwrap();
        let result = match queued {
            Some(result) => result,
            None => Ok(TxHash::from_low_u64_be(0xaa00 + submitted.len() as u64)),
        };
        if result.is_ok() {
            submitted.push((call.clone(), opts.clone()));
        }
        result
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> RedPacketResult<ReceiptInfo> {
        if let Some(receipt) = self.receipts.lock().unwrap().get(&tx_hash) {
            return Ok(receipt.clone());
        }
        Ok(ReceiptInfo {
            transaction_hash: tx_hash,
            block_number: Some(1),
            succeeded: true,
        })
    }

    async fn transaction_block_number(&self, tx_hash: TxHash) -> RedPacketResult<Option<u64>> {
        self.block_number_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.block_number_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.block_numbers.lock().unwrap().get(&tx_hash).copied())
    }

    async fn events_in_block(
        &self,
        kind: EventKind,
        block: u64,
    ) -> RedPacketResult<Vec<ObservedEvent>> {
        self.event_query_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.event_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&(kind, block))
            .cloned()
            .unwrap_or_default())
    }

    async fn check_availability(&self, _red_packet_id: H256) -> RedPacketResult<Availability> {
        self.availability_count.fetch_add(1, Ordering::SeqCst);
        match self.availability_responses.lock().unwrap().pop_front() {
            Some(availability) => Ok(availability),
            None => Ok(live_availability()),
        }
    }

    async fn check_claimed_list(&self, red_packet_id: H256) -> RedPacketResult<Vec<Address>> {
        Ok(self
            .claimed_lists
            .lock()
            .unwrap()
            .get(&red_packet_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn live_availability() -> Availability {
    Availability {
        token_address: Address::zero(),
        balance: U256::from(1000),
        total: U256::from(5),
        claimed: U256::zero(),
        expired: false,
        if_claimed: false,
    }
}

pub fn expired_availability(balance: U256) -> Availability {
    Availability {
        balance,
        expired: true,
        ..live_availability()
    }
}

pub fn creation_event(
    tx_hash: TxHash,
    block: u64,
    id: H256,
    creator: Address,
    total: U256,
    creation_time: u64,
) -> ObservedEvent {
    ObservedEvent {
        tx_hash,
        block_number: block,
        payload: EventPayload::Creation(CreationOutcome {
            id,
            creator,
            total,
            creation_time,
            token_address: Address::zero(),
        }),
    }
}

pub fn claim_event(
    tx_hash: TxHash,
    block: u64,
    id: H256,
    claimer: Address,
    claimed_value: U256,
) -> ObservedEvent {
    ObservedEvent {
        tx_hash,
        block_number: block,
        payload: EventPayload::Claim(ClaimOutcome {
            id,
            claimer,
            claimed_value,
            token_address: Address::zero(),
        }),
    }
}

pub fn refund_event(
    tx_hash: TxHash,
    block: u64,
    id: H256,
    remaining_balance: U256,
) -> ObservedEvent {
    ObservedEvent {
        tx_hash,
        block_number: block,
        payload: EventPayload::Refund(RefundOutcome {
            id,
            token_address: Address::zero(),
            remaining_balance,
        }),
    }
}

pub fn sample_record(id: &str, status: RedPacketStatus) -> RedPacket {
    RedPacket {
        id: id.to_string(),
        red_packet_id: None,
        create_transaction_hash: None,
        claim_transaction_hash: None,
        refund_transaction_hash: None,
        erc20_approve_transaction_hash: None,
        erc20_approve_value: None,
        sender_address: Address::from_low_u64_be(1),
        sender_name: "alice".into(),
        token_type: TokenType::Native,
        token_address: None,
        total_amount: U256::from(1000),
        share_count: 5,
        is_random_split: false,
        message: "happy lunar new year".into(),
        password_hash: H256::from_low_u64_be(2),
        network: ChainNetwork::Ropsten,
        creation_time: None,
        duration: DEFAULT_DURATION_SECS,
        status,
        claimed_amount: None,
        claimer_address: None,
        remaining_balance: None,
        failure_reason: None,
    }
}
