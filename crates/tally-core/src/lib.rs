// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - CORE MODULE
//
// Ledger primitives: Transaction, Block, Chain, Merkle summary and the
// balance tracker. Blocks are sealed by hashing; every hash is recomputed
// on verification and never trusted from input.
// All monetary arithmetic uses u128 whole units (no floating-point).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod balances;
pub mod block;
pub mod chain;
pub mod error;
pub mod transaction;

pub use balances::BalanceTracker;
pub use block::{merkle_root, verify_block, Block};
pub use chain::{verify_chain, verify_chain_detailed, Chain, ChainViolation};
pub use error::CoreError;
pub use tally_crypto::Hash;
pub use transaction::Transaction;

/// Monetary amount in whole units. Negative values are unrepresentable.
pub type Amount = u128;

/// Account identifier (free-form name).
pub type AccountId = String;

/// Sender that bypasses the balance check. Used only for the genesis mint.
pub const SYSTEM_SENDER: &str = "system";

/// Balance credited to an account the first time the ledger sees it.
pub const STARTING_ALLOWANCE: Amount = 100;

/// previous_hash of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Merkle root of a block with no transactions.
pub const EMPTY_MERKLE_ROOT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Genesis timestamp (2025-01-30T00:00:00Z). Fixed so every node derives
/// the same genesis hash and their chains can link.
pub const GENESIS_TIMESTAMP_MS: u64 = 1_738_195_200_000;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse a user-supplied amount. Rejects negative, fractional and
/// non-numeric input with `InvalidAmount`.
pub fn parse_amount(input: &str) -> Result<Amount, CoreError> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(CoreError::InvalidAmount(format!(
            "amount must not be negative: {}",
            trimmed
        )));
    }
    trimmed
        .parse::<Amount>()
        .map_err(|e| CoreError::InvalidAmount(format!("{:?}: {}", trimmed, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("42").unwrap(), 42);
        assert_eq!(parse_amount(" 7 ").unwrap(), 7);
        assert_eq!(parse_amount("0").unwrap(), 0);
        assert!(matches!(
            parse_amount("-5"),
            Err(CoreError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_amount("1.5"),
            Err(CoreError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_amount("ten"),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_empty_merkle_sentinel_width() {
        assert_eq!(EMPTY_MERKLE_ROOT.len(), tally_crypto::DIGEST_HEX_LEN);
    }
}
