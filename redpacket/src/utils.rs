// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::{TxHash, U256};

/// Renders a raw token amount as a decimal string, keeping at most
/// `precision` fractional digits and trimming trailing zeros. All
/// arithmetic is integral; amounts never pass through floats.
pub fn format_balance(amount: U256, decimals: u32, precision: usize) -> String {
    let base = match U256::from(10).checked_pow(U256::from(decimals)) {
        Some(base) => base,
        None => return amount.to_string(),
    };
    let whole = amount / base;
    let padded = format!(
        "{digits:0>width$}",
        digits = (amount % base).to_string(),
        width = decimals as usize
    );
    let value = if padded == "0" {
        whole.to_string()
    } else {
        let truncated: String = padded.chars().take(precision).collect();
        format!("{whole}.{truncated}")
    };
    if value.contains('.') {
        value.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        value
    }
}

/// Parses a transaction hash from text, with or without a `0x` prefix
pub fn parse_tx_hash(text: &str) -> Result<TxHash, String> {
    let trimmed = text.trim();
    let cleaned = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes =
        hex::decode(cleaned).map_err(|e| format!("bad transaction hash {trimmed:?}: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!(
            "bad transaction hash {trimmed:?}: expected 32 bytes, got {}",
            bytes.len()
        ));
    }
    Ok(TxHash::from_slice(&bytes))
}
