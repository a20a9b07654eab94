// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction gateway: estimate, price, submit, then report progress
//! as a tagged signal stream

use crate::metrics::RedPacketMetrics;
use crate::rpc::ContractRpc;
use crate::types::{CallOptions, ContractCall, ReceiptInfo};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Progress of one submission. At most one `HashObserved` is emitted,
/// followed by exactly one terminal signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxSignal {
    /// The node accepted the transaction under this hash
    HashObserved(ethers::types::TxHash),
    /// Mined with a successful status
    Confirmed(ReceiptInfo),
    /// Rejected by the node, dropped, or reverted on chain
    SubmitError(String),
    /// Failed before submission; nothing reached the chain
    EstimateError(String),
}

impl TxSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxSignal::HashObserved(_))
    }
}

/// Runs contract mutations through the estimate / price / submit
/// sequence and streams the outcome back to the caller.
pub struct LedgerGateway<C> {
    rpc: Arc<C>,
    metrics: Arc<RedPacketMetrics>,
}

impl<C: ContractRpc> LedgerGateway<C> {
    pub fn new(rpc: Arc<C>, metrics: Arc<RedPacketMetrics>) -> Self {
        Self { rpc, metrics }
    }

    /// Starts the submission and returns its signal stream. The
    /// receiver sees signals in emission order and the channel closes
    /// after the terminal signal.
    pub fn submit(&self, call: ContractCall, opts: CallOptions) -> mpsc::Receiver<TxSignal> {
        let (out, rx) = mpsc::channel(4);
        tokio::spawn(Self::drive(
            self.rpc.clone(),
            self.metrics.clone(),
            call,
            opts,
            out,
        ));
        rx
    }

    async fn drive(
        rpc: Arc<C>,
        metrics: Arc<RedPacketMetrics>,
        call: ContractCall,
        mut opts: CallOptions,
        out: mpsc::Sender<TxSignal>,
    ) {
        let method = call.method_name();

        if opts.gas.is_none() {
            match rpc.estimate_gas(&call, &opts).await {
                Ok(gas) => opts.gas = Some(gas),
                Err(e) => {
                    metrics
                        .submit_failures
                        .with_label_values(&[method, "estimate"])
                        .inc();
                    warn!("gas estimation for {method} failed: {e}");
                    let _ = out.send(TxSignal::EstimateError(e.to_string())).await;
                    return;
                }
            }
        }
        if opts.gas_price.is_none() {
            match rpc.gas_price().await {
                Ok(price) => opts.gas_price = Some(price),
                Err(e) => {
                    metrics
                        .submit_failures
                        .with_label_values(&[method, "gas-price"])
                        .inc();
                    warn!("gas price lookup for {method} failed: {e}");
                    let _ = out.send(TxSignal::EstimateError(e.to_string())).await;
                    return;
                }
            }
        }

        let tx_hash = match rpc.submit(&call, &opts).await {
            Ok(hash) => hash,
            Err(e) => {
                metrics
                    .submit_failures
                    .with_label_values(&[method, "submit"])
                    .inc();
                warn!("submission of {method} failed: {e}");
                let _ = out.send(TxSignal::SubmitError(e.to_string())).await;
                return;
            }
        };
        metrics
            .transactions_submitted
            .with_label_values(&[method])
            .inc();
        debug!("{method} submitted as {tx_hash:?}");
        let _ = out.send(TxSignal::HashObserved(tx_hash)).await;

        match rpc.wait_for_receipt(tx_hash).await {
            Ok(receipt) if receipt.succeeded => {
                let _ = out.send(TxSignal::Confirmed(receipt)).await;
            }
            Ok(_) => {
                metrics
                    .submit_failures
                    .with_label_values(&[method, "revert"])
                    .inc();
                let _ = out
                    .send(TxSignal::SubmitError(format!(
                        "transaction {tx_hash:?} reverted"
                    )))
                    .await;
            }
            Err(e) => {
                let _ = out.send(TxSignal::SubmitError(e.to_string())).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedPacketError;
    use crate::mock_rpc::MockContractRpc;
    use ethers::types::{TxHash, H256, U256};

    fn refund_call() -> ContractCall {
        ContractCall::Refund {
            id: H256::from_low_u64_be(7),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<TxSignal>) -> Vec<TxSignal> {
        let mut signals = Vec::new();
        while let Some(signal) = rx.recv().await {
            signals.push(signal);
        }
        signals
    }

    #[tokio::test]
    async fn test_hash_precedes_confirmation() {
        let rpc = Arc::new(MockContractRpc::default());
        let gateway =
            LedgerGateway::new(rpc.clone(), Arc::new(RedPacketMetrics::new_for_testing()));

        let signals = drain(gateway.submit(refund_call(), CallOptions::default())).await;
        assert_eq!(signals.len(), 2);
        let hash = match &signals[0] {
            TxSignal::HashObserved(hash) => *hash,
            other => panic!("expected a hash first, got {other:?}"),
        };
        match &signals[1] {
            TxSignal::Confirmed(receipt) => {
                assert_eq!(receipt.transaction_hash, hash);
                assert!(receipt.succeeded);
            }
            other => panic!("expected a confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_estimate_failure_prevents_submission() {
        let rpc = Arc::new(MockContractRpc::default());
        rpc.queue_estimate(Err(RedPacketError::EstimateFailed("out of gas".into())));
        let gateway =
            LedgerGateway::new(rpc.clone(), Arc::new(RedPacketMetrics::new_for_testing()));

        let signals = drain(gateway.submit(refund_call(), CallOptions::default())).await;
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], TxSignal::EstimateError(_)));
        assert!(rpc.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_is_terminal() {
        let rpc = Arc::new(MockContractRpc::default());
        rpc.queue_submit(Err(RedPacketError::SubmitFailed("nonce too low".into())));
        let gateway =
            LedgerGateway::new(rpc.clone(), Arc::new(RedPacketMetrics::new_for_testing()));

        let signals = drain(gateway.submit(refund_call(), CallOptions::default())).await;
        assert_eq!(signals.len(), 1);
        match &signals[0] {
            TxSignal::SubmitError(reason) => assert!(reason.contains("nonce too low")),
            other => panic!("expected a submit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reverted_transaction_reports_submit_error() {
        let rpc = Arc::new(MockContractRpc::default());
        let hash = TxHash::from_low_u64_be(0x51);
        rpc.queue_submit(Ok(hash));
        rpc.set_receipt(ReceiptInfo {
            transaction_hash: hash,
            block_number: Some(9),
            succeeded: false,
        });
        let gateway =
            LedgerGateway::new(rpc.clone(), Arc::new(RedPacketMetrics::new_for_testing()));

        let signals = drain(gateway.submit(refund_call(), CallOptions::default())).await;
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0], TxSignal::HashObserved(hash));
        match &signals[1] {
            TxSignal::SubmitError(reason) => assert!(reason.contains("reverted")),
            other => panic!("expected a submit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gas_override_skips_estimation() {
        let rpc = Arc::new(MockContractRpc::default());
        let gateway =
            LedgerGateway::new(rpc.clone(), Arc::new(RedPacketMetrics::new_for_testing()));

        let opts = CallOptions {
            gas: Some(U256::from(90_000)),
            ..Default::default()
        };
        let signals = drain(gateway.submit(refund_call(), opts)).await;
        assert!(matches!(signals.last(), Some(TxSignal::Confirmed(_))));
        assert_eq!(rpc.estimate_calls(), 0);

        let submitted = rpc.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1.gas, Some(U256::from(90_000)));
    }
}
