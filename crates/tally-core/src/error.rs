use crate::Amount;
use thiserror::Error;

/// Failures raised by the ledger model, balance tracker and registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: {account} holds {balance}, needs {required}")]
    InsufficientFunds {
        account: String,
        balance: Amount,
        required: Amount,
    },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Block {index} failed verification: {reason}")]
    BlockVerificationFailed { index: u64, reason: String },

    #[error("Unknown validator: {0}")]
    UnknownValidator(String),
}
