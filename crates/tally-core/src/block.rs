use serde::{Deserialize, Serialize};
use tally_crypto::{digest, is_digest_hex, DigestInput, Hash};

use crate::{
    now_millis, CoreError, Transaction, EMPTY_MERKLE_ROOT, GENESIS_PREVIOUS_HASH,
    GENESIS_TIMESTAMP_MS,
};

/// A sealed batch of transactions.
///
/// `hash` covers index, previous_hash, timestamp, merkle_root and producer.
/// Transactions are covered indirectly through the Merkle root.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub index: u64,
    pub previous_hash: Hash,
    /// Unix milliseconds at sealing
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash,
    /// Validator that sealed the block. Absent only on genesis.
    #[serde(default)]
    pub producer: Option<String>,
    pub hash: Hash,
}

impl Block {
    /// Seal a block stamped with the current time.
    pub fn new(
        index: u64,
        previous_hash: impl Into<Hash>,
        transactions: Vec<Transaction>,
        producer: Option<String>,
    ) -> Result<Self, CoreError> {
        Self::with_timestamp(index, previous_hash, now_millis(), transactions, producer)
    }

    pub fn with_timestamp(
        index: u64,
        previous_hash: impl Into<Hash>,
        timestamp: u64,
        transactions: Vec<Transaction>,
        producer: Option<String>,
    ) -> Result<Self, CoreError> {
        let previous_hash = previous_hash.into();
        if !is_valid_previous_hash(&previous_hash) {
            return Err(CoreError::InvalidHash(format!(
                "previous_hash must be {:?} or a 64-char hex digest, got {:?}",
                GENESIS_PREVIOUS_HASH, previous_hash
            )));
        }

        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            transactions,
            merkle_root: String::new(),
            producer,
            hash: String::new(),
        };
        block.merkle_root = block.compute_merkle_root();
        block.hash = block.compute_hash();
        Ok(block)
    }

    /// The fixed first block: no transactions, no producer, sentinel parent.
    pub fn genesis() -> Self {
        let mut block = Self {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp: GENESIS_TIMESTAMP_MS,
            transactions: Vec::new(),
            merkle_root: EMPTY_MERKLE_ROOT.to_string(),
            producer: None,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn compute_merkle_root(&self) -> Hash {
        let ids: Vec<&str> = self.transactions.iter().map(|tx| tx.id.as_str()).collect();
        merkle_root(&ids)
    }

    pub fn compute_hash(&self) -> Hash {
        DigestInput::new()
            .u64(self.index)
            .str(&self.previous_hash)
            .u64(self.timestamp)
            .str(&self.merkle_root)
            .opt_str(self.producer.as_deref())
            .finish()
    }

    /// Recompute every derived field and report the first mismatch.
    pub fn verify_detailed(&self) -> Result<(), CoreError> {
        let fail = |reason: String| CoreError::BlockVerificationFailed {
            index: self.index,
            reason,
        };

        if !is_valid_previous_hash(&self.previous_hash) {
            return Err(fail(format!(
                "malformed previous_hash {:?}",
                self.previous_hash
            )));
        }
        if let Some(tx) = self.transactions.iter().find(|tx| !tx.verify_id()) {
            return Err(fail(format!("transaction id {} does not match its fields", tx.id)));
        }
        let merkle = self.compute_merkle_root();
        if merkle != self.merkle_root {
            return Err(fail(format!(
                "merkle_root mismatch: stored {}, computed {}",
                self.merkle_root, merkle
            )));
        }
        let hash = self.compute_hash();
        if hash != self.hash {
            return Err(fail(format!(
                "hash mismatch: stored {}, computed {}",
                self.hash, hash
            )));
        }
        Ok(())
    }
}

/// Tamper/corruption check: true iff every derived field recomputes.
pub fn verify_block(block: &Block) -> bool {
    block.verify_detailed().is_ok()
}

fn is_valid_previous_hash(value: &str) -> bool {
    value == GENESIS_PREVIOUS_HASH || is_digest_hex(value)
}

/// Pairwise Merkle fold over `items`.
///
/// Leaves are `digest(item)`; each level hashes `left ‖ right`, duplicating
/// the last node when the level is odd. Order-sensitive. Zero items yield
/// `EMPTY_MERKLE_ROOT`.
pub fn merkle_root<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    if items.is_empty() {
        return EMPTY_MERKLE_ROOT.to_string();
    }

    let mut level: Vec<Hash> = items.iter().map(|item| digest(item.as_ref())).collect();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().cloned() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut joined = Vec::with_capacity(pair[0].len() + pair[1].len());
                joined.extend_from_slice(pair[0].as_bytes());
                joined.extend_from_slice(pair[1].as_bytes());
                digest(&joined)
            })
            .collect();
    }
    level.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &Hash, b: &Hash) -> Hash {
        digest(format!("{}{}", a, b).as_bytes())
    }

    #[test]
    fn test_merkle_empty_is_sentinel() {
        let none: [&str; 0] = [];
        assert_eq!(merkle_root(&none), EMPTY_MERKLE_ROOT);
    }

    #[test]
    fn test_merkle_single_is_leaf_digest() {
        assert_eq!(merkle_root(&["a"]), digest(b"a"));
    }

    #[test]
    fn test_merkle_order_sensitive() {
        assert_ne!(merkle_root(&["a", "b"]), merkle_root(&["b", "a"]));
    }

    #[test]
    fn test_merkle_odd_level_duplicates_last() {
        let (a, b, c) = (digest(b"a"), digest(b"b"), digest(b"c"));
        let expected = pair(&pair(&a, &b), &pair(&c, &c));
        assert_eq!(merkle_root(&["a", "b", "c"]), expected);
    }

    #[test]
    fn test_new_block_rejects_bad_previous_hash() {
        let err = Block::new(1, "abc", vec![], Some("v".into())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidHash(_)));
        assert!(Block::new(1, "0", vec![], None).is_ok());
        assert!(Block::new(1, digest(b"x"), vec![], None).is_ok());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let g1 = Block::genesis();
        let g2 = Block::genesis();
        assert_eq!(g1.hash, g2.hash);
        assert!(g1.transactions.is_empty());
        assert!(g1.is_genesis());
        assert!(verify_block(&g1));
    }

    #[test]
    fn test_verify_block_detects_field_tamper() {
        let tx = Transaction::with_timestamp("alice", "bob", 10, 1, None);
        let block =
            Block::with_timestamp(1, Block::genesis().hash, 50, vec![tx], Some("v".into()))
                .unwrap();
        assert!(verify_block(&block));

        let mut b = block.clone();
        b.index = 2;
        assert!(!verify_block(&b));

        let mut b = block.clone();
        b.timestamp += 1;
        assert!(!verify_block(&b));

        let mut b = block.clone();
        b.producer = Some("mallory".into());
        assert!(!verify_block(&b));

        let mut b = block.clone();
        b.transactions[0].amount = 99;
        assert!(!verify_block(&b));

        // Consistent forgery of one tx still breaks the Merkle root
        let mut b = block.clone();
        b.transactions[0] = Transaction::with_timestamp("alice", "bob", 99, 1, None);
        assert!(!verify_block(&b));

        let mut b = block;
        b.transactions.clear();
        assert!(!verify_block(&b));
    }

    #[test]
    fn test_producer_absence_changes_hash() {
        let prev = Block::genesis().hash;
        let with = Block::with_timestamp(1, prev.clone(), 7, vec![], Some("v".into())).unwrap();
        let without = Block::with_timestamp(1, prev, 7, vec![], None).unwrap();
        assert_ne!(with.hash, without.hash);
    }

    #[test]
    fn test_block_without_producer_field_deserializes() {
        let block = Block::with_timestamp(1, Block::genesis().hash, 7, vec![], None).unwrap();
        let mut value = serde_json::to_value(&block).unwrap();
        value.as_object_mut().unwrap().remove("producer");
        let back: Block = serde_json::from_value(value).unwrap();
        assert_eq!(back, block);
    }
}
