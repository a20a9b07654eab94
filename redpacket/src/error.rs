// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Central error enum shared across the crate

use crate::types::RedPacketStatus;

pub type RedPacketResult<T> = Result<T, RedPacketError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedPacketError {
    // Gas estimation failed; the transaction was never submitted
    #[error("gas estimation failed: {0}")]
    EstimateFailed(String),
    // The node rejected the transaction, or it reverted on chain
    #[error("submission failed: {0}")]
    SubmitFailed(String),
    // Event confirmation gave up after exhausting its attempts
    #[error("could not confirm the transaction on chain")]
    ConfirmTimeout,
    // Query failure worth retrying (connectivity, rate limiting)
    #[error("transient rpc error: {0}")]
    TransientRpc(String),
    // Query failure that retrying will not fix
    #[error("rpc error: {0}")]
    Rpc(String),
    // Operation not legal in the record's current status
    #[error("cannot {operation} packet {id} while {status}")]
    InvalidStatus {
        id: String,
        status: RedPacketStatus,
        operation: &'static str,
    },
    // No record with the given id
    #[error("no packet with id {0}")]
    PacketNotFound(String),
    // The relay endpoint refused or garbled a request
    #[error("relay error: {0}")]
    RelayError(String),
    // Snapshot file could not be read or written
    #[error("store error: {0}")]
    StoreError(String),
    // JSON or log payload failed to encode or decode
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Generic(String),
}

impl RedPacketError {
    /// Short stable label for metrics and logs
    pub fn error_type(&self) -> &'static str {
        match self {
            RedPacketError::EstimateFailed(_) => "estimate_failed",
            RedPacketError::SubmitFailed(_) => "submit_failed",
            RedPacketError::ConfirmTimeout => "confirm_timeout",
            RedPacketError::TransientRpc(_) => "transient_rpc",
            RedPacketError::Rpc(_) => "rpc",
            RedPacketError::InvalidStatus { .. } => "invalid_status",
            RedPacketError::PacketNotFound(_) => "packet_not_found",
            RedPacketError::RelayError(_) => "relay_error",
            RedPacketError::StoreError(_) => "store_error",
            RedPacketError::SerializationError(_) => "serialization_error",
            RedPacketError::InvalidConfig(_) => "invalid_config",
            RedPacketError::InvalidRequest(_) => "invalid_request",
            RedPacketError::Generic(_) => "generic",
        }
    }

    /// Whether a retry of the same query may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RedPacketError::TransientRpc(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<RedPacketError> {
        vec![
            RedPacketError::EstimateFailed("e".into()),
            RedPacketError::SubmitFailed("e".into()),
            RedPacketError::ConfirmTimeout,
            RedPacketError::TransientRpc("e".into()),
            RedPacketError::Rpc("e".into()),
            RedPacketError::InvalidStatus {
                id: "r".into(),
                status: RedPacketStatus::Claimed,
                operation: "claim",
            },
            RedPacketError::PacketNotFound("r".into()),
            RedPacketError::RelayError("e".into()),
            RedPacketError::StoreError("e".into()),
            RedPacketError::SerializationError("e".into()),
            RedPacketError::InvalidConfig("e".into()),
            RedPacketError::InvalidRequest("e".into()),
            RedPacketError::Generic("e".into()),
        ]
    }

    /// Labels feed metric label values, so keep them lowercase
    /// identifiers with no surrounding underscores.
    #[test]
    fn test_error_types_are_valid_labels() {
        for err in all_variants() {
            let label = err.error_type();
            assert!(!label.is_empty());
            assert!(
                label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_'),
                "bad label: {label}"
            );
            assert!(!label.starts_with('_') && !label.ends_with('_'));
        }
    }

    /// The label must not depend on the payload carried by the variant
    #[test]
    fn test_error_type_ignores_payload() {
        assert_eq!(
            RedPacketError::Rpc("one thing".into()).error_type(),
            RedPacketError::Rpc("another".into()).error_type()
        );
        assert_eq!(
            RedPacketError::SubmitFailed(String::new()).error_type(),
            "submit_failed"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RedPacketError::TransientRpc("503".into()).is_transient());
        assert!(!RedPacketError::Rpc("bad request".into()).is_transient());
        assert!(!RedPacketError::ConfirmTimeout.is_transient());
    }

    #[test]
    fn test_invalid_status_display() {
        let err = RedPacketError::InvalidStatus {
            id: "abc".into(),
            status: RedPacketStatus::ClaimPending,
            operation: "refund",
        };
        assert_eq!(err.to_string(), "cannot refund packet abc while claim_pending");
    }
}
