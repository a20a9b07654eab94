// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

#[derive(Clone, Debug)]
pub struct RedPacketMetrics {
    pub(crate) packets_created: IntCounter,
    pub(crate) claims_started: IntCounter,
    pub(crate) refunds_started: IntCounter,
    pub(crate) transactions_submitted: IntCounterVec,
    pub(crate) submit_failures: IntCounterVec,
    pub(crate) watch_outcomes: IntCounterVec,
    pub(crate) watch_attempts: Histogram,
    pub(crate) watches_attached: IntCounter,
    pub(crate) status_transitions: IntCounterVec,
    pub(crate) expiry_polls: IntCounter,
    pub(crate) errors: IntCounterVec,
    pub(crate) stored_packets: IntGauge,
    pub(crate) uptime: IntGauge,
}

impl RedPacketMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            packets_created: register_int_counter_with_registry!(
                "redpacket_packets_created",
                "Total number of packet creations started",
                registry,
            )
            .unwrap(),
            claims_started: register_int_counter_with_registry!(
                "redpacket_claims_started",
                "Total number of claims started",
                registry,
            )
            .unwrap(),
            refunds_started: register_int_counter_with_registry!(
                "redpacket_refunds_started",
                "Total number of refunds started",
                registry,
            )
            .unwrap(),
            transactions_submitted: register_int_counter_vec_with_registry!(
                "redpacket_transactions_submitted",
                "Total number of transactions accepted by the node, by contract method",
                &["method"],
                registry,
            )
            .unwrap(),
            submit_failures: register_int_counter_vec_with_registry!(
                "redpacket_submit_failures",
                "Total number of submissions that failed, by contract method and stage",
                &["method", "stage"],
                registry,
            )
            .unwrap(),
            watch_outcomes: register_int_counter_vec_with_registry!(
                "redpacket_watch_outcomes",
                "Total number of finished confirmation watches, by event and outcome",
                &["event", "outcome"],
                registry,
            )
            .unwrap(),
            watch_attempts: register_histogram_with_registry!(
                "redpacket_watch_attempts",
                "Number of ledger queries a finished confirmation watch needed",
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0],
                registry,
            )
            .unwrap(),
            watches_attached: register_int_counter_with_registry!(
                "redpacket_watches_attached",
                "Total number of watches that attached to an already running query stream",
                registry,
            )
            .unwrap(),
            status_transitions: register_int_counter_vec_with_registry!(
                "redpacket_status_transitions",
                "Total number of applied record transitions, by edge",
                &["from", "to"],
                registry,
            )
            .unwrap(),
            expiry_polls: register_int_counter_with_registry!(
                "redpacket_expiry_polls",
                "Total number of availability checks run by expiry watchers",
                registry,
            )
            .unwrap(),
            errors: register_int_counter_vec_with_registry!(
                "redpacket_errors",
                "Total number of errors observed, by type",
                &["type"],
                registry,
            )
            .unwrap(),
            stored_packets: register_int_gauge_with_registry!(
                "redpacket_stored_packets",
                "Number of packet records currently in the store",
                registry,
            )
            .unwrap(),
            uptime: register_int_gauge_with_registry!(
                "redpacket_uptime_seconds",
                "Uptime of the node in seconds",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_cleanly() {
        let registry = Registry::new();
        let metrics = RedPacketMetrics::new(&registry);
        metrics.packets_created.inc();
        metrics
            .transactions_submitted
            .with_label_values(&["claim"])
            .inc();
        metrics.watch_attempts.observe(3.0);

        let families = registry.gather();
        assert!(!families.is_empty());
        assert!(families
            .iter()
            .all(|family| family.get_name().starts_with("redpacket_")));
    }

    #[test]
    fn test_new_for_testing_does_not_collide() {
        let _a = RedPacketMetrics::new_for_testing();
        let _b = RedPacketMetrics::new_for_testing();
    }
}
