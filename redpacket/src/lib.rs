// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client-side lifecycle management for on-chain red packets.
//!
//! A red packet locks coin in the HappyRedPacket contract for a group
//! of recipients to claim; whatever is left after the claim window can
//! be refunded to the sender. The chain is asynchronous and
//! eventually consistent, so every mutation here follows the same
//! shape: record the intent locally, submit, then poll for the
//! confirming contract event before promoting the record. Stale
//! observations lose against the store's transition check instead of
//! overwriting newer state.

pub mod abi;
pub mod config;
pub mod controller;
pub mod error;
pub mod eth_rpc;
pub mod gateway;
pub mod metrics;
pub mod node;
pub mod poller;
pub mod relay;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod mock_rpc;
