// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Red packet records, the lifecycle status graph and contract-facing types

use ethers::types::{Address, TxHash, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local record key, a uuid-v4 string assigned when the record is created
pub type RecordId = String;

/// Default claim window for a new packet, in seconds
pub const DEFAULT_DURATION_SECS: u64 = 86_400;

/// Networks the manager can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainNetwork {
    Mainnet,
    Ropsten,
    Rinkeby,
}

impl ChainNetwork {
    /// Name used in relay query strings
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainNetwork::Mainnet => "mainnet",
            ChainNetwork::Ropsten => "ropsten",
            ChainNetwork::Rinkeby => "rinkeby",
        }
    }
}

impl fmt::Display for ChainNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which asset backs a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    Native,
    Erc20,
}

impl TokenType {
    /// Encoding used by the contract call (0 = native coin, 1 = ERC20)
    pub fn contract_code(&self) -> U256 {
        match self {
            TokenType::Native => U256::zero(),
            TokenType::Erc20 => U256::one(),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Native => write!(f, "native"),
            TokenType::Erc20 => write!(f, "erc20"),
        }
    }
}

/// Lifecycle status of a packet record.
///
/// `Incoming` marks a packet the local identity may claim but did not
/// send; the remaining states follow the packet through creation, claim
/// and refund confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedPacketStatus {
    Pending,
    Normal,
    Incoming,
    ClaimPending,
    Claimed,
    RefundPending,
    Refunded,
    Expired,
    Failed,
}

impl RedPacketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedPacketStatus::Pending => "pending",
            RedPacketStatus::Normal => "normal",
            RedPacketStatus::Incoming => "incoming",
            RedPacketStatus::ClaimPending => "claim_pending",
            RedPacketStatus::Claimed => "claimed",
            RedPacketStatus::RefundPending => "refund_pending",
            RedPacketStatus::Refunded => "refunded",
            RedPacketStatus::Expired => "expired",
            RedPacketStatus::Failed => "failed",
        }
    }

    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RedPacketStatus::Claimed
                | RedPacketStatus::Refunded
                | RedPacketStatus::Expired
                | RedPacketStatus::Failed
        )
    }

    /// Whether claim or refund may still be requested
    pub fn is_open(&self) -> bool {
        matches!(self, RedPacketStatus::Normal | RedPacketStatus::Incoming)
    }

    /// Legal forward edges of the lifecycle graph
    pub fn can_transition_to(&self, next: RedPacketStatus) -> bool {
        use RedPacketStatus::*;
        matches!(
            (*self, next),
            (Pending, Normal)
                | (Pending, Incoming)
                | (Pending, Failed)
                | (Normal, ClaimPending)
                | (Normal, RefundPending)
                | (Normal, Expired)
                | (Incoming, ClaimPending)
                | (Incoming, RefundPending)
                | (Incoming, Expired)
                | (ClaimPending, Claimed)
                | (ClaimPending, Expired)
                | (ClaimPending, Failed)
                | (RefundPending, Refunded)
                | (RefundPending, Failed)
        )
    }
}

impl fmt::Display for RedPacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events emitted by the red packet contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Creation,
    Claim,
    Refund,
}

impl EventKind {
    /// Event name as declared in the contract ABI
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::Creation => "CreationSuccess",
            EventKind::Claim => "ClaimSuccess",
            EventKind::Refund => "RefundSuccess",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// Decoded `CreationSuccess` fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationOutcome {
    /// On-chain packet id
    pub id: H256,
    pub creator: Address,
    pub total: U256,
    /// Unix seconds reported by the contract
    pub creation_time: u64,
    pub token_address: Address,
}

/// Decoded `ClaimSuccess` fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub id: H256,
    pub claimer: Address,
    pub claimed_value: U256,
    pub token_address: Address,
}

/// Decoded `RefundSuccess` fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    pub id: H256,
    pub token_address: Address,
    pub remaining_balance: U256,
}

/// Payload of one decoded contract event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Creation(CreationOutcome),
    Claim(ClaimOutcome),
    Refund(RefundOutcome),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Creation(_) => EventKind::Creation,
            EventPayload::Claim(_) => EventKind::Claim,
            EventPayload::Refund(_) => EventKind::Refund,
        }
    }
}

/// One decoded contract event together with where it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    /// Transaction that emitted the event
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub payload: EventPayload,
}

/// Receipt summary reported back by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    /// False when the transaction was mined but reverted
    pub succeeded: bool,
}

/// Result of the contract's `check_availability` view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub token_address: Address,
    /// Unclaimed balance left in the packet
    pub balance: U256,
    /// Total number of shares
    pub total: U256,
    /// Number of shares already handed out
    pub claimed: U256,
    pub expired: bool,
    /// Whether the queried account already claimed a share
    pub if_claimed: bool,
}

/// Arguments of the contract's `create_red_packet` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    pub hash_of_password: H256,
    pub quantity: u64,
    pub is_random: bool,
    pub duration: u64,
    pub seed: H256,
    pub message: String,
    pub name: String,
    pub token_type: TokenType,
    /// Zero address for native-coin packets
    pub token_addr: Address,
    pub total_tokens: U256,
}

/// Arguments of the contract's `claim` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCall {
    pub id: H256,
    pub password: String,
    pub recipient: Address,
    /// keccak256 of the recipient's raw address bytes
    pub validation: H256,
}

/// Contract mutation carried by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateRedPacket(CreateCall),
    Claim(ClaimCall),
    Refund { id: H256 },
    /// ERC20 allowance for the deployment, sent to the token contract
    /// rather than the red packet contract
    Approve { token: Address, amount: U256 },
}

impl ContractCall {
    /// Contract method name, used in logs and metric labels
    pub fn method_name(&self) -> &'static str {
        match self {
            ContractCall::CreateRedPacket(_) => "create_red_packet",
            ContractCall::Claim(_) => "claim",
            ContractCall::Refund { .. } => "refund",
            ContractCall::Approve { .. } => "approve",
        }
    }
}

/// Per-submission options. Absent gas settings are filled in from the
/// node before the transaction is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub from: Address,
    /// Coin attached to the call (native-coin packet creation)
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
}

/// The persisted red packet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedPacket {
    /// Local record key
    pub id: RecordId,
    /// On-chain id, assigned once creation confirms
    pub red_packet_id: Option<H256>,
    pub create_transaction_hash: Option<TxHash>,
    pub claim_transaction_hash: Option<TxHash>,
    pub refund_transaction_hash: Option<TxHash>,
    /// Allowance transaction backing an ERC20 creation
    pub erc20_approve_transaction_hash: Option<TxHash>,
    /// Amount the allowance granted, recorded once it confirms
    pub erc20_approve_value: Option<U256>,
    pub sender_address: Address,
    pub sender_name: String,
    pub token_type: TokenType,
    /// Present iff `token_type` is ERC20
    pub token_address: Option<Address>,
    pub total_amount: U256,
    pub share_count: u64,
    pub is_random_split: bool,
    pub message: String,
    /// keccak256 of the cleartext password
    pub password_hash: H256,
    pub network: ChainNetwork,
    /// Unix seconds, from the creation event
    pub creation_time: Option<u64>,
    /// Claim window in seconds
    pub duration: u64,
    pub status: RedPacketStatus,
    pub claimed_amount: Option<U256>,
    pub claimer_address: Option<Address>,
    pub remaining_balance: Option<U256>,
    pub failure_reason: Option<String>,
}

/// Inputs to a packet creation
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub sender_address: Address,
    pub sender_name: String,
    pub token_type: TokenType,
    pub token_address: Option<Address>,
    pub total_amount: U256,
    pub share_count: u64,
    pub is_random_split: bool,
    pub message: String,
    pub network: ChainNetwork,
    pub duration: u64,
}

/// A packet announced by a remote sender, registered locally so the
/// creation can be watched and the packet claimed. This is the payload
/// a sender shares out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncomingPayload {
    /// Cleartext password needed to claim
    pub password: String,
    pub create_transaction_hash: TxHash,
    pub sender_address: Address,
    pub sender_name: String,
    pub token_type: TokenType,
    pub token_address: Option<Address>,
    pub total_amount: U256,
    pub share_count: u64,
    pub is_random_split: bool,
    pub message: String,
    pub network: ChainNetwork,
    pub duration: u64,
}

/// Store change notification, published fire-and-forget after a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketChange {
    pub id: RecordId,
    pub red_packet_id: Option<H256>,
    /// `None` when the record was first inserted
    pub old_status: Option<RedPacketStatus>,
    pub new_status: RedPacketStatus,
}
