// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - PENDING POOL
//
// Transactions accepted by this node but not yet sealed into a block.
// - Kept in submission order; the same transaction may appear twice
// - Optional capacity, unbounded by default
// - Entries leave when sealed, discarded at screening, or found in an
//   adopted chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tally_core::{Hash, Transaction};

use crate::NodeError;

#[derive(Debug, Clone, Default)]
pub struct PendingPool {
    transactions: Vec<Transaction>,
    capacity: Option<usize>,

    /// Statistics
    pub total_received: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_sealed: u64,
    pub total_discarded: u64,
}

impl PendingPool {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Add a transaction. Returns its id.
    pub fn add(&mut self, tx: Transaction) -> Result<Hash, NodeError> {
        self.total_received += 1;

        if let Some(limit) = self.capacity {
            if self.transactions.len() >= limit {
                self.total_rejected += 1;
                return Err(NodeError::PoolFull(limit));
            }
        }

        let id = tx.id.clone();
        self.transactions.push(tx);
        self.total_accepted += 1;
        Ok(id)
    }

    /// Empty the pool, returning its contents in submission order.
    pub fn take_all(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.transactions)
    }

    /// Put transactions back at the front, ahead of anything submitted since.
    pub fn restore(&mut self, mut txs: Vec<Transaction>) {
        txs.append(&mut self.transactions);
        self.transactions = txs;
    }

    /// Drop every entry whose id is in `sealed`. Returns how many left.
    pub fn remove_sealed(&mut self, sealed: &BTreeSet<Hash>) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|tx| !sealed.contains(&tx.id));
        let removed = before - self.transactions.len();
        self.total_sealed += removed as u64;
        removed
    }

    pub fn record_sealed(&mut self, count: usize) {
        self.total_sealed += count as u64;
    }

    pub fn record_discarded(&mut self, count: usize) {
        self.total_discarded += count as u64;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id == id)
    }

    pub fn has_system_transaction(&self) -> bool {
        self.transactions.iter().any(Transaction::is_system)
    }

    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.transactions.len(),
            capacity: self.capacity,
            total_received: self.total_received,
            total_accepted: self.total_accepted,
            total_rejected: self.total_rejected,
            total_sealed: self.total_sealed,
            total_discarded: self.total_discarded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub capacity: Option<usize>,
    pub total_received: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_sealed: u64,
    pub total_discarded: u64,
}
