// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory packet store with JSON snapshots.
//!
//! All status writes go through [`PacketStore::transition`], which
//! checks the lifecycle graph under the write lock. A write that lost
//! its race reports [`TransitionOutcome::Superseded`] instead of
//! clobbering the newer status.

use crate::error::{RedPacketError, RedPacketResult};
use crate::types::{PacketChange, RecordId, RedPacket, RedPacketStatus};
use ethers::types::H256;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Result of a transition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The move was made; `from` is the status it was made from
    Applied { from: RedPacketStatus },
    /// The record is no longer in a status the move is legal from
    Superseded { current: RedPacketStatus },
}

#[derive(Default)]
struct StoreInner {
    records: BTreeMap<RecordId, RedPacket>,
    by_onchain: HashMap<H256, RecordId>,
}

pub struct PacketStore {
    inner: RwLock<StoreInner>,
    changes: broadcast::Sender<PacketChange>,
}

impl Default for PacketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(StoreInner::default()),
            changes,
        }
    }

    /// Change feed. Fire-and-forget: a slow subscriber lags, it never
    /// blocks a write.
    pub fn subscribe(&self) -> broadcast::Receiver<PacketChange> {
        self.changes.subscribe()
    }

    pub async fn get(&self, id: &str) -> Option<RedPacket> {
        self.inner.read().await.records.get(id).cloned()
    }

    pub async fn find_by_onchain_id(&self, red_packet_id: H256) -> Option<RedPacket> {
        let inner = self.inner.read().await;
        inner
            .by_onchain
            .get(&red_packet_id)
            .and_then(|id| inner.records.get(id))
            .cloned()
    }

    pub async fn find_by_status(
        &self,
        pred: impl Fn(RedPacketStatus) -> bool,
    ) -> Vec<RedPacket> {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|record| pred(record.status))
            .cloned()
            .collect()
    }

    pub async fn list(&self) -> Vec<RedPacket> {
        self.inner.read().await.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Inserts or replaces a record wholesale. Lifecycle moves should
    /// use [`transition`](Self::transition) instead.
    pub async fn put(&self, record: RedPacket) {
        let change = {
            let mut inner = self.inner.write().await;
            if let Some(rp) = record.red_packet_id {
                inner.by_onchain.insert(rp, record.id.clone());
            }
            let old = inner.records.insert(record.id.clone(), record.clone());
            match old {
                Some(ref previous) if *previous == record => None,
                _ => Some(PacketChange {
                    id: record.id.clone(),
                    red_packet_id: record.red_packet_id,
                    old_status: old.map(|r| r.status),
                    new_status: record.status,
                }),
            }
        };
        if let Some(change) = change {
            let _ = self.changes.send(change);
        }
    }

    /// Moves the record to `to` if the lifecycle graph allows it,
    /// applying `mutate` to the record first. The closure cannot
    /// change the status; that stays under the store's control.
    pub async fn transition(
        &self,
        id: &str,
        to: RedPacketStatus,
        mutate: impl FnOnce(&mut RedPacket),
    ) -> RedPacketResult<TransitionOutcome> {
        let (from, change) = {
            let mut inner = self.inner.write().await;
            let record = inner
                .records
                .get_mut(id)
                .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
            let from = record.status;
            if !from.can_transition_to(to) {
                debug!("transition of {id} to {to} rejected, record is {from}");
                return Ok(TransitionOutcome::Superseded { current: from });
            }
            mutate(record);
            record.status = to;
            let red_packet_id = record.red_packet_id;
            if let Some(rp) = red_packet_id {
                inner.by_onchain.insert(rp, id.to_string());
            }
            info!("packet {id} moved {from} -> {to}");
            let change = PacketChange {
                id: id.to_string(),
                red_packet_id,
                old_status: Some(from),
                new_status: to,
            };
            (from, change)
        };
        let _ = self.changes.send(change);
        Ok(TransitionOutcome::Applied { from })
    }

    /// Applies `mutate` without touching the status
    pub async fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut RedPacket),
    ) -> RedPacketResult<()> {
        let change = {
            let mut inner = self.inner.write().await;
            let record = inner
                .records
                .get_mut(id)
                .ok_or_else(|| RedPacketError::PacketNotFound(id.to_string()))?;
            let before = record.clone();
            mutate(record);
            record.status = before.status;
            if *record == before {
                None
            } else {
                let red_packet_id = record.red_packet_id;
                let status = record.status;
                if let Some(rp) = red_packet_id {
                    inner.by_onchain.insert(rp, id.to_string());
                }
                Some(PacketChange {
                    id: id.to_string(),
                    red_packet_id,
                    old_status: Some(status),
                    new_status: status,
                })
            }
        };
        if let Some(change) = change {
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Option<RedPacket> {
        let mut inner = self.inner.write().await;
        let record = inner.records.remove(id)?;
        if let Some(rp) = record.red_packet_id {
            inner.by_onchain.remove(&rp);
        }
        Some(record)
    }

    /// Writes all records to `path` as pretty JSON
    pub async fn save(&self, path: &Path) -> RedPacketResult<()> {
        let bytes = {
            let inner = self.inner.read().await;
            serde_json::to_vec_pretty(&inner.records)
                .map_err(|e| RedPacketError::SerializationError(e.to_string()))?
        };
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| RedPacketError::StoreError(format!("write {}: {e}", path.display())))
    }

    /// Replaces the store contents with the snapshot at `path`.
    /// A missing file is an empty store, not an error.
    pub async fn load(&self, path: &Path) -> RedPacketResult<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(RedPacketError::StoreError(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };
        let records: BTreeMap<RecordId, RedPacket> = serde_json::from_slice(&bytes)
            .map_err(|e| RedPacketError::SerializationError(e.to_string()))?;
        let count = records.len();
        {
            let mut inner = self.inner.write().await;
            inner.by_onchain = records
                .iter()
                .filter_map(|(id, record)| record.red_packet_id.map(|rp| (rp, id.clone())))
                .collect();
            inner.records = records;
        }
        info!("loaded {count} packet record(s) from {}", path.display());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainNetwork, TokenType, DEFAULT_DURATION_SECS};
    use ethers::types::{Address, TxHash, U256};
    use tokio::sync::broadcast::error::TryRecvError;

    fn sample(id: &str) -> RedPacket {
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
            status: RedPacketStatus::Pending,
            claimed_amount: None,
            claimer_address: None,
            remaining_balance: None,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = PacketStore::new();
        store.put(sample("a")).await;
        assert_eq!(store.get("a").await, Some(sample("a")));
        assert_eq!(store.get("missing").await, None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_transition_applies_and_indexes() {
        let store = PacketStore::new();
        store.put(sample("a")).await;

        let rp = H256::from_low_u64_be(77);
        let outcome = store
            .transition("a", RedPacketStatus::Normal, |record| {
                record.red_packet_id = Some(rp);
                record.creation_time = Some(1_700_000_000);
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: RedPacketStatus::Pending
            }
        );
        let record = store.get("a").await.unwrap();
        assert_eq!(record.status, RedPacketStatus::Normal);
        assert_eq!(record.red_packet_id, Some(rp));
        assert_eq!(store.find_by_onchain_id(rp).await.unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_illegal_transition_is_superseded() {
        let store = PacketStore::new();
        let mut record = sample("a");
        record.status = RedPacketStatus::Claimed;
        store.put(record.clone()).await;

        let outcome = store
            .transition("a", RedPacketStatus::Failed, |r| {
                r.failure_reason = Some("too late".into())
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Superseded {
                current: RedPacketStatus::Claimed
            }
        );
        // the losing write must not leak any of its edits
        assert_eq!(store.get("a").await, Some(record));
    }

    #[tokio::test]
    async fn test_transition_unknown_record() {
        let store = PacketStore::new();
        let err = store
            .transition("ghost", RedPacketStatus::Normal, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, RedPacketError::PacketNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let store = PacketStore::new();
        let mut rx = store.subscribe();

        store.put(sample("a")).await;
        let change = rx.try_recv().unwrap();
        assert_eq!(change.id, "a");
        assert_eq!(change.old_status, None);
        assert_eq!(change.new_status, RedPacketStatus::Pending);

        store
            .transition("a", RedPacketStatus::Failed, |r| {
                r.failure_reason = Some("timeout".into())
            })
            .await
            .unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.old_status, Some(RedPacketStatus::Pending));
        assert_eq!(change.new_status, RedPacketStatus::Failed);

        // an identical put is not a change
        store.put(store.get("a").await.unwrap()).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_update_preserves_status() {
        let store = PacketStore::new();
        store.put(sample("a")).await;

        store
            .update("a", |record| {
                record.claim_transaction_hash = Some(TxHash::from_low_u64_be(3));
                record.status = RedPacketStatus::Claimed;
            })
            .await
            .unwrap();

        let record = store.get("a").await.unwrap();
        assert_eq!(record.status, RedPacketStatus::Pending);
        assert_eq!(
            record.claim_transaction_hash,
            Some(TxHash::from_low_u64_be(3))
        );
    }

    #[tokio::test]
    async fn test_remove_cleans_index() {
        let store = PacketStore::new();
        let mut record = sample("a");
        let rp = H256::from_low_u64_be(5);
        record.red_packet_id = Some(rp);
        store.put(record).await;

        assert!(store.remove("a").await.is_some());
        assert!(store.get("a").await.is_none());
        assert!(store.find_by_onchain_id(rp).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.json");

        let store = PacketStore::new();
        let mut record = sample("a");
        record.red_packet_id = Some(H256::from_low_u64_be(9));
        record.total_amount = U256::from_dec_str("123456789012345678901234567890").unwrap();
        record.claimed_amount = Some(U256::MAX);
        record.erc20_approve_transaction_hash = Some(TxHash::from_low_u64_be(0xab));
        record.erc20_approve_value = Some(U256::from(777));
        store.put(record.clone()).await;
        store.put(sample("b")).await;
        store.save(&path).await.unwrap();

        let restored = PacketStore::new();
        assert_eq!(restored.load(&path).await.unwrap(), 2);
        // amounts survive byte for byte, no float rounding anywhere
        assert_eq!(restored.get("a").await, Some(record.clone()));
        assert_eq!(restored.get("b").await, Some(sample("b")));
        assert_eq!(
            restored
                .find_by_onchain_id(H256::from_low_u64_be(9))
                .await
                .unwrap()
                .id,
            "a"
        );
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PacketStore::new();
        assert_eq!(store.load(&dir.path().join("nope.json")).await.unwrap(), 0);
        assert!(store.is_empty().await);
    }
}
