// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - STORAGE MODULE
//
// sled embedded database for the node's chain and validator registry.
// Blocks are keyed by big-endian height so iteration yields chain order.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sled::{Batch, Db, Tree};
use std::path::Path;
use tally_consensus::ValidatorRegistry;
use tally_core::{Block, Chain};

use crate::NodeError;

const TREE_BLOCKS: &str = "blocks";
const TREE_META: &str = "metadata";
const KEY_REGISTRY: &[u8] = b"registry";

pub struct ChainStore {
    db: Db,
}

impl ChainStore {
    /// Open or create the database under `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| NodeError::Storage(format!("open {}: {}", path.display(), e)))?;
        Ok(Self { db })
    }

    fn blocks_tree(&self) -> Result<Tree, NodeError> {
        Ok(self.db.open_tree(TREE_BLOCKS)?)
    }

    fn meta_tree(&self) -> Result<Tree, NodeError> {
        Ok(self.db.open_tree(TREE_META)?)
    }

    fn height_key(height: usize) -> [u8; 8] {
        (height as u64).to_be_bytes()
    }

    /// Replace the stored chain with `chain` in one atomic batch.
    /// Heights past the new tip (left over from a longer abandoned chain)
    /// are removed in the same batch.
    pub fn save_chain(&self, chain: &Chain) -> Result<(), NodeError> {
        let tree = self.blocks_tree()?;
        let mut batch = Batch::default();

        for (height, block) in chain.blocks().iter().enumerate() {
            let json = serde_json::to_vec(block)
                .map_err(|e| NodeError::Storage(format!("serialize block: {}", e)))?;
            batch.insert(&Self::height_key(height)[..], json);
        }
        for key in tree.range(Self::height_key(chain.len())..).keys() {
            batch.remove(key?);
        }

        tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Stored blocks in height order, unverified. `Ok(None)` when nothing
    /// has been saved yet.
    pub fn load_blocks(&self) -> Result<Option<Vec<Block>>, NodeError> {
        let tree = self.blocks_tree()?;
        let mut blocks = Vec::with_capacity(tree.len());
        for item in tree.iter() {
            let (_, value) = item?;
            let block: Block = serde_json::from_slice(&value)
                .map_err(|e| NodeError::Storage(format!("deserialize block: {}", e)))?;
            blocks.push(block);
        }
        Ok(if blocks.is_empty() { None } else { Some(blocks) })
    }

    /// Stored chain, verified.
    pub fn load_chain(&self) -> Result<Option<Chain>, NodeError> {
        match self.load_blocks()? {
            Some(blocks) => Chain::from_blocks(blocks)
                .map(Some)
                .map_err(|v| NodeError::Storage(format!("stored chain rejected: {}", v))),
            None => Ok(None),
        }
    }

    pub fn save_registry(&self, registry: &ValidatorRegistry) -> Result<(), NodeError> {
        let json = serde_json::to_vec(registry)
            .map_err(|e| NodeError::Storage(format!("serialize registry: {}", e)))?;
        self.meta_tree()?.insert(KEY_REGISTRY, json)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load_registry(&self) -> Result<Option<ValidatorRegistry>, NodeError> {
        match self.meta_tree()?.get(KEY_REGISTRY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| NodeError::Storage(format!("deserialize registry: {}", e))),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<(), NodeError> {
        self.db.flush()?;
        Ok(())
    }
}
