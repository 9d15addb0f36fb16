use serde::{Deserialize, Serialize};
use tally_crypto::{Credential, DigestInput, Hash};

use crate::{now_millis, Amount, SYSTEM_SENDER};

/// A transfer of `amount` from `sender` to `receiver`.
///
/// Identity is `id`; two transfers with identical parties and amount but
/// different timestamps are distinct transactions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: Amount,
    /// Unix milliseconds at construction
    pub timestamp: u64,
    pub id: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    /// Build a transaction stamped with the current time.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        signature: Option<String>,
    ) -> Self {
        Self::with_timestamp(sender, receiver, amount, now_millis(), signature)
    }

    pub fn with_timestamp(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        timestamp: u64,
        signature: Option<String>,
    ) -> Self {
        let sender = sender.into();
        let receiver = receiver.into();
        let id = compute_id(&sender, &receiver, amount, timestamp);
        Self {
            sender,
            receiver,
            amount,
            timestamp,
            id,
            signature,
        }
    }

    /// Build a transaction and attach `credential`'s signature over its id.
    pub fn signed(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: Amount,
        credential: &dyn Credential,
    ) -> Self {
        let mut tx = Self::new(sender, receiver, amount, None);
        tx.signature = Some(credential.sign(tx.id.as_bytes()));
        tx
    }

    /// Genesis mint: credits `receiver` without debiting anyone.
    pub fn mint(receiver: impl Into<String>, amount: Amount) -> Self {
        Self::new(SYSTEM_SENDER, receiver, amount, None)
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Recompute the id from the stated fields.
    pub fn compute_id(&self) -> Hash {
        compute_id(&self.sender, &self.receiver, self.amount, self.timestamp)
    }

    /// True if the stored id matches the stated fields.
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// True if a signature is present and `credential` accepts it.
    /// Unsigned transactions never verify.
    pub fn verify_signature(&self, credential: &dyn Credential) -> bool {
        match &self.signature {
            Some(sig) => credential.verify(self.id.as_bytes(), sig),
            None => false,
        }
    }
}

fn compute_id(sender: &str, receiver: &str, amount: Amount, timestamp: u64) -> Hash {
    DigestInput::new()
        .str(sender)
        .str(receiver)
        .u128(amount)
        .u64(timestamp)
        .finish()
}
