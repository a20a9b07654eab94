// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Red packet lifecycle manager.
//!
//! Every operation writes its intent to the store first, submits
//! through the gateway, then lets a confirmation watch promote or fail
//! the record. The store's transition check is the single authority on
//! status, so a watcher that finished late simply loses its write.

use crate::error::{RedPacketError, RedPacketResult};
use crate::gateway::{LedgerGateway, TxSignal};
use crate::metrics::RedPacketMetrics;
use crate::poller::{EventPoller, WatchOutcome};
use crate::relay::{RelayClaimRequest, RelayClient};
use crate::retry::RetryPolicy;
use crate::rpc::ContractRpc;
use crate::store::{PacketStore, TransitionOutcome};
use crate::types::{
    Availability, CallOptions, ChainNetwork, ClaimCall, ContractCall, CreateCall, CreateRequest,
    EventKind, EventPayload, IncomingPayload, RecordId, RedPacket, RedPacketStatus, TokenType,
};
use ethers::types::{Address, TxHash, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure reason recorded when a confirmation watch exhausts its
/// attempts without an error
pub const TIMEOUT_REASON: &str = "timeout";

pub struct RedPacketManager<C> {
    store: Arc<PacketStore>,
    gateway: LedgerGateway<C>,
    poller: EventPoller<C>,
    rpc: Arc<C>,
    /// Addresses this process signs for; creations by anyone else land
    /// as incoming packets
    own_addresses: HashSet<Address>,
    expiry_interval: Duration,
    metrics: Arc<RedPacketMetrics>,
    cancel: CancellationToken,
    watchers: Mutex<HashMap<RecordId, Vec<CancellationToken>>>,
}

impl<C: ContractRpc> RedPacketManager<C> {
    pub fn new(
        rpc: Arc<C>,
        store: Arc<PacketStore>,
        own_addresses: Vec<Address>,
        policy: RetryPolicy,
        expiry_interval: Duration,
        metrics: Arc<RedPacketMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway: LedgerGateway::new(rpc.clone(), metrics.clone()),
            poller: EventPoller::new(rpc.clone(), policy, metrics.clone()),
            rpc,
            store,
            own_addresses: own_addresses.into_iter().collect(),
            expiry_interval,
            metrics,
            cancel: CancellationToken::new(),
            watchers: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<PacketStore> {
        &self.store
    }

    /// Creates a packet. The record is written as `pending` before
    /// anything reaches the chain; the cleartext password is returned
    /// once and never stored. An ERC20 creation first grants the
    /// contract an allowance for the packet's total.
    pub async fn create(
        self: &Arc<Self>,
        request: CreateRequest,
    ) -> RedPacketResult<(RedPacket, String)> {
        if request.share_count == 0 {
            return Err(RedPacketError::InvalidRequest(
                "share count must be at least 1".into(),
            ));
        }
        if request.total_amount.is_zero() {
            return Err(RedPacketError::InvalidRequest(
                "total amount must be positive".into(),
            ));
        }
        if request.token_type == TokenType::Erc20 && request.token_address.is_none() {
            return Err(RedPacketError::InvalidRequest(
                "an ERC20 packet needs a token address".into(),
            ));
        }

        let password = Uuid::new_v4().to_string();
        let password_hash = H256(keccak256(password.as_bytes()));
        let seed = H256(keccak256(Uuid::new_v4().to_string().as_bytes()));
        let id: RecordId = Uuid::new_v4().to_string();

        let record = RedPacket {
            id: id.clone(),
            red_packet_id: None,
            create_transaction_hash: None,
            claim_transaction_hash: None,
            refund_transaction_hash: None,
            erc20_approve_transaction_hash: None,
            erc20_approve_value: None,
            sender_address: request.sender_address,
            sender_name: request.sender_name.clone(),
            token_type: request.token_type,
            token_address: request.token_address,
            total_amount: request.total_amount,
            share_count: request.share_count,
            is_random_split: request.is_random_split,
            message: request.message.clone(),
            password_hash,
            network: request.network,
            creation_time: None,
            duration: request.duration,
            status: RedPacketStatus::Pending,
            claimed_amount: None,
            claimer_address: None,
            remaining_balance: None,
            failure_reason: None,
        };
        self.store.put(record.clone()).await;
        self.metrics.packets_created.inc();
        info!("creating packet {id} ({} shares)", request.share_count);

        let call = ContractCall::CreateRedPacket(CreateCall {
            hash_of_password: password_hash,
            quantity: request.share_count,
            is_random: request.is_random_split,
            duration: request.duration,
            seed,
            message: request.message,
            name: request.sender_name,
            token_type: request.token_type,
            token_addr: request.token_address.unwrap_or_else(Address::zero),
            total_tokens: request.total_amount,
        });
        let opts = CallOptions {
            from: request.sender_address,
            value: (request.token_type == TokenType::Native).then_some(request.total_amount),
            ..Default::default()
        };
        // The contract pulls ERC20 funds out of the sender's allowance,
        // so the creation is held back until the approve confirms.
        if request.token_type == TokenType::Erc20 {
            let token_addr = request.token_address.unwrap_or_else(Address::zero);
            let amount = request.total_amount;
            let from = request.sender_address;
            let manager = self.clone();
            tokio::spawn(async move {
                if manager.drive_approval(&id, token_addr, amount, from).await {
                    manager
                        .start_submission(id, EventKind::Creation, call, opts)
                        .await;
                }
            });
        } else {
            self.start_submission(id, EventKind::Creation, call, opts)
                .await;
        }
        Ok((record, password))
    }

    /// Claims a share, submitting the claim transaction directly.
    /// Rejected without any network traffic unless the packet is
    /// claimable right now.
    pub async fn claim(
        self: &Arc<Self>,
        id: &str,
        password: &str,
        recipient: Address,
    ) -> RedPacketResult<()> {
        let (red_packet_id, _) = self.reserve_claim(id).await?;

        let call = ContractCall::Claim(ClaimCall {
            id: red_packet_id,
            password: password.to_string(),
            recipient,
            validation: H256(keccak256(recipient.as_bytes())),
        });
        let opts = CallOptions {
            from: recipient,
            ..Default::default()
        };
        self.start_submission(id.to_string(), EventKind::Claim, call, opts)
            .await;
        Ok(())
    }

    /// Claims a share through the gas-relay service instead of
    /// submitting from a local account. Confirmation is watched the
    /// same way as for a direct claim.
    pub async fn claim_via_relay(
        self: &Arc<Self>,
        id: &str,
        password: &str,
        recipient: Address,
        relay: &RelayClient,
    ) -> RedPacketResult<TxHash> {
        let (red_packet_id, network) = self.reserve_claim(id).await?;

        let request = RelayClaimRequest {
            red_packet_id,
            password: password.to_string(),
            recipient,
            validation: H256(keccak256(recipient.as_bytes())),
            network,
        };
        let tx_hash = match relay.claim(&request).await {
            Ok(hash) => hash,
            Err(e) => {
                self.mark_failed(id, e.to_string()).await;
                return Err(e);
            }
        };
        self.store
            .update(id, |record| {
                record.claim_transaction_hash = Some(tx_hash);
            })
            .await?;
        let token = self.register_watcher(id).await;
        let manager = self.clone();
        let record_id = id.to_string();
        tokio::spawn(async move {
            manager
                .watch_confirmation(record_id, EventKind::Claim, tx_hash, token)
                .await;
        });
        Ok(tx_hash)
    }

    /// Refunds the unclaimed remainder back to the sender
    pub async fn refund(self: &Arc<Self>, id: &str) -> RedPacketResult<()> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
        let red_packet_id = Self::require_open(&record, "refund")?;
        match self
            .store
            .transition(id, RedPacketStatus::RefundPending, |_| {})
            .await?
        {
            TransitionOutcome::Applied { from } => {
                self.note_transition(from, RedPacketStatus::RefundPending)
            }
            TransitionOutcome::Superseded { current } => {
                return Err(RedPacketError::InvalidStatus {
                    id: id.to_string(),
                    status: current,
                    operation: "refund",
                })
            }
        }
        self.metrics.refunds_started.inc();

        let call = ContractCall::Refund { id: red_packet_id };
        let opts = CallOptions {
            from: record.sender_address,
            ..Default::default()
        };
        self.start_submission(id.to_string(), EventKind::Refund, call, opts)
            .await;
        Ok(())
    }

    /// Starts the periodic expiry check for a live packet. Runs until
    /// the packet expires, reaches any terminal status, or the manager
    /// shuts down.
    pub async fn watch_expiry(self: &Arc<Self>, id: &str) -> RedPacketResult<()> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(RedPacketError::InvalidStatus {
                id: id.to_string(),
                status: record.status,
                operation: "watch_expiry",
            });
        }
        let red_packet_id = record.red_packet_id.ok_or_else(|| {
            RedPacketError::Generic(format!("packet {} has no on-chain id", record.id))
        })?;

        let token = self.register_watcher(id).await;
        let manager = self.clone();
        let record_id = id.to_string();
        tokio::spawn(async move {
            manager.drive_expiry(record_id, red_packet_id, token).await;
        });
        Ok(())
    }

    /// Registers a packet announced by a remote sender so its creation
    /// can be confirmed and the packet claimed here. Importing the
    /// same creation transaction twice returns the existing record.
    pub async fn import_incoming(
        self: &Arc<Self>,
        payload: IncomingPayload,
    ) -> RedPacketResult<RedPacket> {
        if let Some(existing) = self
            .store
            .list()
            .await
            .into_iter()
            .find(|record| record.create_transaction_hash == Some(payload.create_transaction_hash))
        {
            debug!(
                "creation transaction {:?} already imported as {}",
                payload.create_transaction_hash, existing.id
            );
            return Ok(existing);
        }

        let id: RecordId = Uuid::new_v4().to_string();
        let record = RedPacket {
            id: id.clone(),
            red_packet_id: None,
            create_transaction_hash: Some(payload.create_transaction_hash),
            claim_transaction_hash: None,
            refund_transaction_hash: None,
            erc20_approve_transaction_hash: None,
            erc20_approve_value: None,
            sender_address: payload.sender_address,
            sender_name: payload.sender_name,
            token_type: payload.token_type,
            token_address: payload.token_address,
            total_amount: payload.total_amount,
            share_count: payload.share_count,
            is_random_split: payload.is_random_split,
            message: payload.message,
            password_hash: H256(keccak256(payload.password.as_bytes())),
            network: payload.network,
            creation_time: None,
            duration: payload.duration,
            status: RedPacketStatus::Pending,
            claimed_amount: None,
            claimer_address: None,
            remaining_balance: None,
            failure_reason: None,
        };
        self.store.put(record.clone()).await;
        info!("imported packet {id} from {}", record.sender_name);

        let token = self.register_watcher(&id).await;
        let manager = self.clone();
        let record_id = id;
        let tx_hash = payload.create_transaction_hash;
        tokio::spawn(async move {
            manager
                .watch_confirmation(record_id, EventKind::Creation, tx_hash, token)
                .await;
        });
        Ok(record)
    }

    /// Re-arms confirmation watches for records a previous process
    /// left in flight. Records that never got a transaction hash are
    /// failed outright, nothing can confirm them.
    pub async fn resume(self: &Arc<Self>) -> usize {
        let in_flight = self
            .store
            .find_by_status(|status| {
                matches!(
                    status,
                    RedPacketStatus::Pending
                        | RedPacketStatus::ClaimPending
                        | RedPacketStatus::RefundPending
                )
            })
            .await;

        let mut resumed = 0;
        for record in in_flight {
            let (kind, tx_hash) = match record.status {
                RedPacketStatus::Pending => (EventKind::Creation, record.create_transaction_hash),
                RedPacketStatus::ClaimPending => (EventKind::Claim, record.claim_transaction_hash),
                RedPacketStatus::RefundPending => {
                    (EventKind::Refund, record.refund_transaction_hash)
                }
                _ => continue,
            };
            match tx_hash {
                Some(tx_hash) => {
                    let token = self.register_watcher(&record.id).await;
                    let manager = self.clone();
                    let record_id = record.id.clone();
                    tokio::spawn(async move {
                        manager
                            .watch_confirmation(record_id, kind, tx_hash, token)
                            .await;
                    });
                    resumed += 1;
                }
                None => {
                    self.mark_failed(&record.id, "interrupted before submission".to_string())
                        .await;
                }
            }
        }
        if resumed > 0 {
            info!("resumed {resumed} in-flight confirmation watch(es)");
        }
        resumed
    }

    /// Stops all watchers. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The contract's availability view for a confirmed packet
    pub async fn check_availability(&self, id: &str) -> RedPacketResult<Availability> {
        let red_packet_id = self.onchain_id(id).await?;
        self.rpc.check_availability(red_packet_id).await
    }

    /// Addresses that already claimed a share of a confirmed packet
    pub async fn claimed_list(&self, id: &str) -> RedPacketResult<Vec<Address>> {
        let red_packet_id = self.onchain_id(id).await?;
        self.rpc.check_claimed_list(red_packet_id).await
    }

    /// Moves the record to `claim_pending` if it is claimable,
    /// returning its on-chain id and network. This is the synchronous
    /// gate that rejects double claims.
    async fn reserve_claim(&self, id: &str) -> RedPacketResult<(H256, ChainNetwork)> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
        let red_packet_id = Self::require_open(&record, "claim")?;
        match self
            .store
            .transition(id, RedPacketStatus::ClaimPending, |_| {})
            .await?
        {
            TransitionOutcome::Applied { from } => {
                self.note_transition(from, RedPacketStatus::ClaimPending);
                self.metrics.claims_started.inc();
                Ok((red_packet_id, record.network))
            }
            TransitionOutcome::Superseded { current } => Err(RedPacketError::InvalidStatus {
                id: id.to_string(),
                status: current,
                operation: "claim",
            }),
        }
    }

    fn require_open(record: &RedPacket, operation: &'static str) -> RedPacketResult<H256> {
        if !record.status.is_open() {
            return Err(RedPacketError::InvalidStatus {
                id: record.id.clone(),
                status: record.status,
                operation,
            });
        }
        record.red_packet_id.ok_or_else(|| {
            RedPacketError::Generic(format!("packet {} has no on-chain id", record.id))
        })
    }

    async fn start_submission(
        self: &Arc<Self>,
        id: RecordId,
        kind: EventKind,
        call: ContractCall,
        opts: CallOptions,
    ) {
        let signals = self.gateway.submit(call, opts);
        let token = self.register_watcher(&id).await;
        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive_submission(id, kind, signals, token).await;
        });
    }

    /// Consumes the gateway's signal stream for one submission. The
    /// watch token belongs to this task until a hash is known and the
    /// confirmation watch takes it over.
    async fn drive_submission(
        self: Arc<Self>,
        id: RecordId,
        kind: EventKind,
        mut signals: mpsc::Receiver<TxSignal>,
        token: CancellationToken,
    ) {
        let mut handed_off = false;
        while let Some(signal) = signals.recv().await {
            match signal {
                TxSignal::HashObserved(tx_hash) => {
                    let written = self
                        .store
                        .update(&id, |record| match kind {
                            EventKind::Creation => {
                                record.create_transaction_hash = Some(tx_hash)
                            }
                            EventKind::Claim => record.claim_transaction_hash = Some(tx_hash),
                            EventKind::Refund => record.refund_transaction_hash = Some(tx_hash),
                        })
                        .await;
                    if let Err(e) = written {
                        warn!("could not record {kind} hash for {id}: {e}");
                        break;
                    }
                    handed_off = true;
                    let manager = self.clone();
                    let record_id = id.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        manager
                            .watch_confirmation(record_id, kind, tx_hash, token)
                            .await;
                    });
                }
                TxSignal::EstimateError(reason) | TxSignal::SubmitError(reason) => {
                    self.mark_failed(&id, reason).await;
                }
                TxSignal::Confirmed(receipt) => {
                    // The receipt is informational; only the matched
                    // event promotes the record.
                    debug!(
                        "{kind} transaction for {id} confirmed in block {:?}",
                        receipt.block_number
                    );
                }
            }
        }
        if !handed_off {
            self.release_watcher(&id, &token).await;
        }
    }

    /// Submits an ERC20 `approve` for the packet's total and waits for
    /// its receipt. Reports whether the allowance is in place; any
    /// failure marks the record so the creation is never submitted.
    async fn drive_approval(
        self: &Arc<Self>,
        id: &str,
        token_addr: Address,
        amount: U256,
        from: Address,
    ) -> bool {
        let call = ContractCall::Approve {
            token: token_addr,
            amount,
        };
        let opts = CallOptions {
            from,
            ..Default::default()
        };
        let mut signals = self.gateway.submit(call, opts);
        while let Some(signal) = signals.recv().await {
            match signal {
                TxSignal::HashObserved(tx_hash) => {
                    let written = self
                        .store
                        .update(id, |record| {
                            record.erc20_approve_transaction_hash = Some(tx_hash);
                        })
                        .await;
                    if let Err(e) = written {
                        warn!("could not record approve hash for {id}: {e}");
                        return false;
                    }
                }
                TxSignal::Confirmed(receipt) => {
                    debug!(
                        "allowance for {id} confirmed in block {:?}",
                        receipt.block_number
                    );
                    let written = self
                        .store
                        .update(id, |record| {
                            record.erc20_approve_value = Some(amount);
                        })
                        .await;
                    if let Err(e) = written {
                        warn!("could not record approve value for {id}: {e}");
                        return false;
                    }
                    return true;
                }
                TxSignal::EstimateError(reason) | TxSignal::SubmitError(reason) => {
                    self.mark_failed(id, reason).await;
                    return false;
                }
            }
        }
        false
    }

    async fn watch_confirmation(
        self: Arc<Self>,
        id: RecordId,
        kind: EventKind,
        tx_hash: TxHash,
        token: CancellationToken,
    ) {
        match self.poller.watch(tx_hash, kind, token.clone()).await {
            WatchOutcome::Matched(event) => self.apply_event(&id, event.payload).await,
            WatchOutcome::Timeout => self.mark_failed(&id, TIMEOUT_REASON.to_string()).await,
            WatchOutcome::Failed(reason) => self.mark_failed(&id, reason).await,
            WatchOutcome::Aborted => debug!("{kind} watch for {id} aborted"),
        }
        self.release_watcher(&id, &token).await;
    }

    async fn apply_event(&self, id: &str, payload: EventPayload) {
        match payload {
            EventPayload::Creation(outcome) => {
                let target = if self.own_addresses.contains(&outcome.creator) {
                    RedPacketStatus::Normal
                } else {
                    RedPacketStatus::Incoming
                };
                self.apply_transition(id, target, |record| {
                    record.red_packet_id = Some(outcome.id);
                    record.creation_time = Some(outcome.creation_time);
                    record.total_amount = outcome.total;
                })
                .await;
            }
            EventPayload::Claim(outcome) => {
                let applied = self
                    .apply_transition(id, RedPacketStatus::Claimed, |record| {
                        record.claimed_amount = Some(outcome.claimed_value);
                        record.claimer_address = Some(outcome.claimer);
                    })
                    .await;
                if applied {
                    self.cancel_watchers(id).await;
                }
            }
            EventPayload::Refund(outcome) => {
                let applied = self
                    .apply_transition(id, RedPacketStatus::Refunded, |record| {
                        record.remaining_balance = Some(outcome.remaining_balance);
                    })
                    .await;
                if applied {
                    self.cancel_watchers(id).await;
                }
            }
        }
    }

    /// Periodic availability check; stops at the first `expired`
    /// observation or when the record goes terminal by other means
    async fn drive_expiry(self: Arc<Self>, id: RecordId, red_packet_id: H256, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.expiry_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("expiry watch for {id} stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }
            // Another watcher may have finished the packet while we
            // slept.
            match self.store.get(&id).await {
                Some(record) if !record.status.is_terminal() => {}
                _ => break,
            }
            self.metrics.expiry_polls.inc();
            match self.rpc.check_availability(red_packet_id).await {
                Ok(availability) if availability.expired => {
                    let applied = self
                        .apply_transition(&id, RedPacketStatus::Expired, |record| {
                            record.remaining_balance = Some(availability.balance);
                        })
                        .await;
                    if applied {
                        info!("packet {id} expired with {} unclaimed", availability.balance);
                        self.cancel_watchers(&id).await;
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("availability check for {id} failed: {e}");
                    self.metrics
                        .errors
                        .with_label_values(&[e.error_type()])
                        .inc();
                }
            }
        }
        self.release_watcher(&id, &token).await;
    }

    async fn mark_failed(&self, id: &str, reason: String) {
        let applied = self
            .apply_transition(id, RedPacketStatus::Failed, |record| {
                record.failure_reason = Some(reason.clone());
            })
            .await;
        if applied {
            warn!("packet {id} failed: {reason}");
            self.cancel_watchers(id).await;
        }
    }

    /// Runs a transition and reports whether it was applied. Losing a
    /// race is logged and swallowed here; callers that need to reject
    /// use the store directly.
    async fn apply_transition(
        &self,
        id: &str,
        target: RedPacketStatus,
        mutate: impl FnOnce(&mut RedPacket),
    ) -> bool {
        match self.store.transition(id, target, mutate).await {
            Ok(TransitionOutcome::Applied { from }) => {
                self.note_transition(from, target);
                true
            }
            Ok(TransitionOutcome::Superseded { current }) => {
                debug!("move of {id} to {target} ignored, record is {current}");
                false
            }
            Err(e) => {
                warn!("could not move {id} to {target}: {e}");
                false
            }
        }
    }

    async fn register_watcher(&self, id: &str) -> CancellationToken {
        let token = self.cancel.child_token();
        self.watchers
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .push(token.clone());
        token
    }

    /// Cancels every watcher of the record; they notice at their next
    /// attempt boundary
    async fn cancel_watchers(&self, id: &str) {
        if let Some(tokens) = self.watchers.lock().await.remove(id) {
            for token in tokens {
                token.cancel();
            }
        }
    }

    /// Drops a finished watch's token from the registry. Tokens carry
    /// no identity, so the spent one is cancelled first and the prune
    /// removes every cancelled token of the record.
    async fn release_watcher(&self, id: &str, token: &CancellationToken) {
        token.cancel();
        let mut watchers = self.watchers.lock().await;
        if let Some(tokens) = watchers.get_mut(id) {
            tokens.retain(|t| !t.is_cancelled());
            if tokens.is_empty() {
                watchers.remove(id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn watcher_count(&self, id: &str) -> usize {
        self.watchers.lock().await.get(id).map_or(0, Vec::len)
    }

    async fn onchain_id(&self, id: &str) -> RedPacketResult<H256> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
        record
            .red_packet_id
            .ok_or_else(|| RedPacketError::Generic(format!("packet {id} has no on-chain id")))
    }

    fn note_transition(&self, from: RedPacketStatus, to: RedPacketStatus) {
        self.metrics
            .status_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }
}
