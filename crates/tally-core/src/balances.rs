// ─────────────────────────────────────────────────────────────────
// Balance Tracker: per-account spendable balance
// ─────────────────────────────────────────────────────────────────
// Accounts are created lazily with STARTING_ALLOWANCE the first time
// a transaction names them. A transaction is applied whole or not at
// all: the sender check happens before either side is touched.
// SYSTEM_SENDER skips the check and is never itself debited.
// ─────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Amount, Block, CoreError, Transaction, STARTING_ALLOWANCE, SYSTEM_SENDER};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BalanceTracker {
    /// BTreeMap keeps snapshots and totals deterministic across nodes.
    balances: BTreeMap<String, Amount>,
    starting_allowance: Amount,
}

impl Default for BalanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceTracker {
    pub fn new() -> Self {
        Self::with_allowance(STARTING_ALLOWANCE)
    }

    pub fn with_allowance(starting_allowance: Amount) -> Self {
        Self {
            balances: BTreeMap::new(),
            starting_allowance,
        }
    }

    pub fn starting_allowance(&self) -> Amount {
        self.starting_allowance
    }

    /// Idempotent. Returns the account's current balance.
    pub fn ensure_account(&mut self, id: &str) -> Amount {
        *self
            .balances
            .entry(id.to_string())
            .or_insert(self.starting_allowance)
    }

    /// Spendable balance as the ledger would see it, without creating the
    /// account. Unseen accounts report the starting allowance.
    pub fn balance_of(&self, id: &str) -> Amount {
        self.balances
            .get(id)
            .copied()
            .unwrap_or(self.starting_allowance)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.balances.contains_key(id)
    }

    /// Debit sender and credit receiver, or reject without touching state.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), CoreError> {
        if tx.sender == SYSTEM_SENDER {
            let receiver = self.ensure_account(&tx.receiver);
            self.balances
                .insert(tx.receiver.clone(), receiver.saturating_add(tx.amount));
            return Ok(());
        }

        let sender_balance = self.ensure_account(&tx.sender);
        self.ensure_account(&tx.receiver);

        if sender_balance < tx.amount {
            return Err(CoreError::InsufficientFunds {
                account: tx.sender.clone(),
                balance: sender_balance,
                required: tx.amount,
            });
        }

        if let Some(balance) = self.balances.get_mut(&tx.sender) {
            *balance -= tx.amount;
        }
        if let Some(balance) = self.balances.get_mut(&tx.receiver) {
            *balance = balance.saturating_add(tx.amount);
        }
        Ok(())
    }

    /// Apply every transaction in order, absorbing rejections.
    /// Returns the transactions that were rejected.
    pub fn apply_all<'a, I>(&mut self, txs: I) -> Vec<(&'a Transaction, CoreError)>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut rejected = Vec::new();
        for tx in txs {
            if let Err(e) = self.apply(tx) {
                rejected.push((tx, e));
            }
        }
        rejected
    }

    /// Reset and replay every sealed transaction in `blocks`.
    /// Returns how many transactions were rejected during replay.
    pub fn rebuild_from(&mut self, blocks: &[Block]) -> usize {
        self.balances.clear();
        let mut rejected = 0;
        for block in blocks {
            rejected += self.apply_all(&block.transactions).len();
        }
        if rejected > 0 {
            log::warn!(
                "Balance rebuild skipped {} transaction(s) with insufficient funds",
                rejected
            );
        }
        rejected
    }

    pub fn snapshot(&self) -> BTreeMap<String, Amount> {
        self.balances.clone()
    }

    /// Sum over every known account.
    pub fn total_supply(&self) -> Amount {
        self.balances
            .values()
            .fold(0, |acc: Amount, b| acc.saturating_add(*b))
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(from: &str, to: &str, amount: Amount) -> Transaction {
        Transaction::new(from, to, amount, None)
    }

    #[test]
    fn test_ensure_account_idempotent() {
        let mut t = BalanceTracker::new();
        assert_eq!(t.ensure_account("alice"), STARTING_ALLOWANCE);
        t.apply(&tx("alice", "bob", 30)).unwrap();
        assert_eq!(t.ensure_account("alice"), STARTING_ALLOWANCE - 30);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_apply_moves_funds() {
        let mut t = BalanceTracker::new();
        t.apply(&tx("alice", "bob", 10)).unwrap();
        assert_eq!(t.balance_of("alice"), 90);
        assert_eq!(t.balance_of("bob"), 110);
    }

    #[test]
    fn test_insufficient_funds_leaves_state_untouched() {
        let mut t = BalanceTracker::new();
        t.apply(&tx("alice", "bob", 60)).unwrap();
        let before = t.snapshot();

        let err = t.apply(&tx("alice", "carol", 50)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientFunds {
                account: "alice".into(),
                balance: 40,
                required: 50,
            }
        );
        // carol was created (lazily) but no funds moved
        assert_eq!(t.balance_of("alice"), before["alice"]);
        assert_eq!(t.balance_of("bob"), before["bob"]);
        assert_eq!(t.balance_of("carol"), STARTING_ALLOWANCE);
    }

    #[test]
    fn test_exact_balance_spend() {
        let mut t = BalanceTracker::new();
        t.apply(&tx("alice", "bob", STARTING_ALLOWANCE)).unwrap();
        assert_eq!(t.balance_of("alice"), 0);
        assert!(t.apply(&tx("alice", "bob", 1)).is_err());
    }

    #[test]
    fn test_system_sender_bypasses_check() {
        let mut t = BalanceTracker::new();
        t.apply(&Transaction::mint("first_user", 1_000)).unwrap();
        assert_eq!(t.balance_of("first_user"), STARTING_ALLOWANCE + 1_000);
        assert!(!t.contains(SYSTEM_SENDER));
    }

    #[test]
    fn test_self_transfer_is_neutral() {
        let mut t = BalanceTracker::new();
        t.apply(&tx("alice", "alice", 40)).unwrap();
        assert_eq!(t.balance_of("alice"), STARTING_ALLOWANCE);
    }

    #[test]
    fn test_apply_all_absorbs_rejections() {
        let mut t = BalanceTracker::new();
        let txs = vec![
            tx("alice", "bob", 80),
            tx("alice", "bob", 80),
            tx("bob", "carol", 150),
        ];
        let rejected = t.apply_all(&txs);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.id, txs[1].id);
        assert_eq!(t.balance_of("carol"), 250);
    }

    #[test]
    fn test_rebuild_replays_blocks() {
        let genesis = Block::genesis();
        let block = Block::new(
            1,
            genesis.hash.clone(),
            vec![tx("alice", "bob", 10), tx("bob", "carol", 20)],
            Some("v".into()),
        )
        .unwrap();

        let mut t = BalanceTracker::new();
        t.apply(&tx("zed", "alice", 5)).unwrap();
        let rejected = t.rebuild_from(&[genesis, block]);
        assert_eq!(rejected, 0);
        assert!(!t.contains("zed"));
        assert_eq!(t.balance_of("alice"), 90);
        assert_eq!(t.balance_of("bob"), 90);
        assert_eq!(t.balance_of("carol"), 120);
    }
}
