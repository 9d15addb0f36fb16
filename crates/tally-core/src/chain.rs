use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Block, CoreError, Hash, GENESIS_PREVIOUS_HASH};

/// First invariant violation found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chain invalid at block {index}: {reason}")]
pub struct ChainViolation {
    /// Position in the chain (not the block's stated index)
    pub index: usize,
    pub reason: String,
}

/// Walk `blocks` and return the first violation.
///
/// Checks, in order: non-empty, genesis parent sentinel, each block's own
/// recomputation, and each link to its predecessor.
pub fn verify_chain_detailed(blocks: &[Block]) -> Result<(), ChainViolation> {
    let genesis = blocks.first().ok_or_else(|| ChainViolation {
        index: 0,
        reason: "chain has no genesis block".to_string(),
    })?;
    if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(ChainViolation {
            index: 0,
            reason: format!(
                "genesis previous_hash is {:?}, expected {:?}",
                genesis.previous_hash, GENESIS_PREVIOUS_HASH
            ),
        });
    }

    for (i, block) in blocks.iter().enumerate() {
        if let Err(e) = block.verify_detailed() {
            return Err(ChainViolation {
                index: i,
                reason: e.to_string(),
            });
        }
        if i == 0 {
            continue;
        }
        let previous = &blocks[i - 1];
        if block.previous_hash != previous.hash {
            return Err(ChainViolation {
                index: i,
                reason: format!(
                    "previous_hash {} does not match predecessor hash {}",
                    block.previous_hash, previous.hash
                ),
            });
        }
    }
    Ok(())
}

/// True iff `blocks` is a well-formed chain. Never panics.
pub fn verify_chain(blocks: &[Block]) -> bool {
    verify_chain_detailed(blocks).is_ok()
}

/// Append-only sequence of blocks starting at genesis.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "Vec<Block>", into = "Vec<Block>")]
pub struct Chain {
    blocks: Vec<Block>,
}

impl From<Vec<Block>> for Chain {
    fn from(blocks: Vec<Block>) -> Self {
        Self::from_blocks_unchecked(blocks)
    }
}

impl From<Chain> for Vec<Block> {
    fn from(chain: Chain) -> Self {
        chain.blocks
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// A chain holding only the genesis block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
        }
    }

    /// Adopt `blocks` only if they form a valid chain.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainViolation> {
        verify_chain_detailed(&blocks)?;
        Ok(Self { blocks })
    }

    /// Adopt `blocks` as-is. Empty input falls back to genesis so `tip()`
    /// always has something to return.
    pub fn from_blocks_unchecked(blocks: Vec<Block>) -> Self {
        if blocks.is_empty() {
            return Self::new();
        }
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Never true for a constructed chain; present for API completeness.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> &Block {
        // Constructors guarantee at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn contains_hash(&self, hash: &Hash) -> bool {
        self.blocks.iter().any(|b| &b.hash == hash)
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Append a block that extends the tip. The block must verify on its own
    /// and link to the current tip.
    pub fn push(&mut self, block: Block) -> Result<(), CoreError> {
        block.verify_detailed()?;
        let tip = self.tip();
        if block.previous_hash != tip.hash {
            return Err(CoreError::BlockVerificationFailed {
                index: block.index,
                reason: format!(
                    "previous_hash {} does not extend tip {}",
                    block.previous_hash, tip.hash
                ),
            });
        }
        if block.index != tip.index + 1 {
            return Err(CoreError::BlockVerificationFailed {
                index: block.index,
                reason: format!("index does not follow tip index {}", tip.index),
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Number of leading blocks that form a valid chain.
    pub fn valid_prefix_len(&self) -> usize {
        match verify_chain_detailed(&self.blocks) {
            Ok(()) => self.blocks.len(),
            Err(violation) => violation.index,
        }
    }

    /// Drop blocks past `len`. Genesis is never removed.
    pub fn truncate(&mut self, len: usize) {
        self.blocks.truncate(len.max(1));
    }

    pub fn verify(&self) -> bool {
        verify_chain(&self.blocks)
    }

    pub fn verify_detailed(&self) -> Result<(), ChainViolation> {
        verify_chain_detailed(&self.blocks)
    }
}
