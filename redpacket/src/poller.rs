// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confirmation polling: repeatedly look up the block a transaction
//! landed in and scan exactly that block for the expected event

use crate::error::RedPacketError;
use crate::error::RedPacketResult;
use crate::metrics::RedPacketMetrics;
use crate::retry::RetryPolicy;
use crate::rpc::ContractRpc;
use crate::types::{EventKind, ObservedEvent};
use ethers::types::TxHash;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Final result of one confirmation watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The expected event was found in the transaction's block
    Matched(ObservedEvent),
    /// Attempts exhausted without a match
    Timeout,
    /// Attempts exhausted and the last error was permanent
    Failed(String),
    /// Cancelled before a result was reached
    Aborted,
}

impl WatchOutcome {
    pub fn outcome_type(&self) -> &'static str {
        match self {
            WatchOutcome::Matched(_) => "matched",
            WatchOutcome::Timeout => "timeout",
            WatchOutcome::Failed(_) => "failed",
            WatchOutcome::Aborted => "aborted",
        }
    }
}

type WatchKey = (TxHash, EventKind);

enum WatchRole {
    Driver(broadcast::Sender<WatchOutcome>),
    Follower(broadcast::Receiver<WatchOutcome>),
}

/// Polls for event confirmation of submitted transactions.
///
/// Watches are deduplicated by `(transaction hash, event kind)`: the
/// first caller drives the ledger queries and any concurrent caller
/// for the same key attaches to the driver's result.
pub struct EventPoller<C> {
    rpc: Arc<C>,
    policy: RetryPolicy,
    in_flight: Mutex<HashMap<WatchKey, broadcast::Sender<WatchOutcome>>>,
    metrics: Arc<RedPacketMetrics>,
}

impl<C: ContractRpc> EventPoller<C> {
    pub fn new(rpc: Arc<C>, policy: RetryPolicy, metrics: Arc<RedPacketMetrics>) -> Self {
        Self {
            rpc,
            policy,
            in_flight: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Runs until the event is found, the policy is exhausted, or
    /// `cancel` fires.
    pub async fn watch(
        &self,
        tx_hash: TxHash,
        kind: EventKind,
        cancel: CancellationToken,
    ) -> WatchOutcome {
        let key = (tx_hash, kind);
        let role = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(existing) => WatchRole::Follower(existing.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    in_flight.insert(key, sender.clone());
                    WatchRole::Driver(sender)
                }
            }
        };

        match role {
            WatchRole::Follower(mut rx) => {
                self.metrics.watches_attached.inc();
                debug!("watch for {tx_hash:?}/{kind} attached to the running query stream");
                tokio::select! {
                    _ = cancel.cancelled() => WatchOutcome::Aborted,
                    res = rx.recv() => res.unwrap_or(WatchOutcome::Aborted),
                }
            }
            WatchRole::Driver(sender) => {
                let outcome = self.run_attempts(tx_hash, kind, &cancel).await;
                // Deregister before publishing so a watch arriving
                // after the outcome starts a fresh query stream.
                self.in_flight.lock().await.remove(&key);
                let _ = sender.send(outcome.clone());
                self.metrics
                    .watch_outcomes
                    .with_label_values(&[kind.event_name(), outcome.outcome_type()])
                    .inc();
                outcome
            }
        }
    }

    async fn run_attempts(
        &self,
        tx_hash: TxHash,
        kind: EventKind,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        let max = self.policy.max_attempts;
        let mut delays = self.policy.delays();
        let mut last_error: Option<RedPacketError> = None;

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return WatchOutcome::Aborted;
            }
            match self.attempt(tx_hash, kind).await {
                Ok(Some(event)) => {
                    info!(
                        "[{kind}] confirmed {tx_hash:?} in block {} after {attempt} attempt(s)",
                        event.block_number
                    );
                    self.metrics.watch_attempts.observe(attempt as f64);
                    return WatchOutcome::Matched(event);
                }
                Ok(None) => last_error = None,
                Err(e) => {
                    debug!("[{kind}] attempt {attempt}/{max} for {tx_hash:?} failed: {e}");
                    self.metrics
                        .errors
                        .with_label_values(&[e.error_type()])
                        .inc();
                    last_error = Some(e);
                }
            }
            if attempt < max {
                let delay = delays.next().unwrap_or(self.policy.max_interval);
                tokio::select! {
                    _ = cancel.cancelled() => return WatchOutcome::Aborted,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.metrics.watch_attempts.observe(max as f64);
        match last_error {
            Some(e) if !e.is_transient() => {
                warn!("[{kind}] watch for {tx_hash:?} failed: {e}");
                WatchOutcome::Failed(e.to_string())
            }
            _ => {
                warn!("[{kind}] no confirmation for {tx_hash:?} after {max} attempts");
                WatchOutcome::Timeout
            }
        }
    }

    async fn attempt(
        &self,
        tx_hash: TxHash,
        kind: EventKind,
    ) -> RedPacketResult<Option<ObservedEvent>> {
        // An unmined transaction has no block to scope the event query
        // to, so a missing block number is a clean non-match.
        let block = match self.rpc.transaction_block_number(tx_hash).await? {
            Some(block) => block,
            None => return Ok(None),
        };
        let events = self.rpc.events_in_block(kind, block).await?;
        Ok(events.into_iter().find(|event| event.tx_hash == tx_hash))
    }
}
