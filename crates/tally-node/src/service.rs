// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - LEDGER SERVICE
//
// The node's mutable blockchain instance. Chain, pending pool, balances
// and validator registry sit behind one mutex that is never held across
// an await: peer I/O (broadcast, chain pulls) happens after the guard is
// dropped, and conflict resolution re-checks lengths once it has the
// lock again.
//
// Balances change only when a block is sealed or appended, never at
// submission. Blocks that do not extend the tip wait in a speculative
// slot beside the chain; the chain itself only ever grows by linked
// blocks or by wholesale adoption of a peer chain.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use async_trait::async_trait;
use rand::RngCore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tally_consensus::{ValidatorRegistry, ValidatorSummary};
use tally_core::{
    verify_chain_detailed, Amount, BalanceTracker, Block, Chain, CoreError, Hash, Transaction,
};
use tally_network::{InboundHandler, PeerTransport, TcpTransport};

use crate::pool::{PendingPool, PoolStats};
use crate::store::ChainStore;
use crate::{safe_lock, short_hash, NodeConfig, NodeError};

/// A chain carries at most one SYSTEM_SENDER transaction: the genesis mint.
const MAX_SYSTEM_TRANSACTIONS: usize = 1;

fn system_transactions(blocks: &[Block]) -> usize {
    blocks
        .iter()
        .flat_map(|b| b.transactions.iter())
        .filter(|tx| tx.is_system())
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Credited to the producer of every appended block
    pub block_reward: Amount,
    /// Skip peer chains that fail verification during conflict resolution
    pub verify_peer_chains: bool,
    pub max_pending: Option<usize>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            block_reward: 10,
            verify_peer_chains: true,
            max_pending: None,
        }
    }
}

/// What happened to a block announced by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Extended the local tip
    Appended,
    /// Already in the local chain
    Duplicate,
    /// Failed verification
    Rejected(String),
    /// Did not extend the tip; held aside while conflict resolution ran
    Speculative { adopted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: String,
    pub height: usize,
    pub tip_hash: Hash,
    pub chain_valid: bool,
    pub validators: usize,
    pub total_stake: Amount,
    pub peers: Vec<String>,
    pub pool: PoolStats,
    /// Unlinked blocks waiting on conflict resolution
    pub speculative: usize,
    pub persistent: bool,
}

struct LedgerState {
    chain: Chain,
    speculative: Vec<Block>,
    pool: PendingPool,
    balances: BalanceTracker,
    registry: ValidatorRegistry,
    rng: Box<dyn RngCore + Send>,
}

pub struct LedgerService {
    node_id: String,
    state: Mutex<LedgerState>,
    transport: Arc<dyn PeerTransport>,
    store: Option<ChainStore>,
    options: ServiceOptions,
}

impl LedgerService {
    /// Service over a fresh chain. `registry` and `rng` are owned by the
    /// service from here on.
    pub fn new(
        node_id: impl Into<String>,
        registry: ValidatorRegistry,
        transport: Arc<dyn PeerTransport>,
        rng: Box<dyn RngCore + Send>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new(LedgerState {
                chain: Chain::new(),
                speculative: Vec::new(),
                pool: PendingPool::new(options.max_pending),
                balances: BalanceTracker::new(),
                registry,
                rng,
            }),
            transport,
            store: None,
            options,
        }
    }

    /// Attach persistence. A chain or registry already on disk replaces
    /// the in-memory one; balances are rebuilt from the restored chain.
    ///
    /// A stored chain that fails verification (adopted while
    /// `verify_peer_chains` was off) is kept as-is when verification is
    /// still off, otherwise cut back to its valid prefix.
    pub fn with_store(mut self, store: ChainStore) -> Result<Self, NodeError> {
        let verify = self.options.verify_peer_chains;
        {
            let state = match self.state.get_mut() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(blocks) = store.load_blocks()? {
                let mut chain = Chain::from_blocks_unchecked(blocks);
                if let Err(violation) = chain.verify_detailed() {
                    if verify {
                        let keep = chain.valid_prefix_len();
                        log::warn!(
                            "Stored chain invalid ({}), keeping first {} block(s) and resyncing",
                            violation,
                            keep
                        );
                        chain.truncate(keep);
                        store.save_chain(&chain)?;
                    } else {
                        log::warn!("Stored chain invalid ({}), kept: verification is off", violation);
                    }
                }
                state.balances.rebuild_from(chain.blocks());
                log::info!("💾 Restored chain of {} blocks from disk", chain.len());
                state.chain = chain;
            } else {
                store.save_chain(&state.chain)?;
            }
            match store.load_registry()? {
                Some(registry) => {
                    log::info!("💾 Restored {} validators from disk", registry.len());
                    state.registry = registry;
                }
                None => store.save_registry(&state.registry)?,
            }
        }
        self.store = Some(store);
        Ok(self)
    }

    /// Build a TCP-connected service from node configuration.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let transport = TcpTransport::new(
            config.peers.clone(),
            Duration::from_millis(config.peer_timeout_ms),
        )
        .with_max_message_bytes(config.max_message_bytes);

        let mut service = Self::new(
            config.node_id.clone(),
            config.build_registry()?,
            Arc::new(transport),
            config.selection_rng(),
            ServiceOptions {
                block_reward: config.block_reward,
                verify_peer_chains: config.verify_peer_chains,
                max_pending: config.max_pending,
            },
        );
        if let Some(dir) = &config.data_dir {
            service = service.with_store(ChainStore::open(dir)?)?;
        }
        if let Some(genesis) = &config.genesis {
            service.seed_genesis_mint(&genesis.mint_to, genesis.mint_amount)?;
        }
        Ok(service)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        safe_lock(&self.state)
    }

    fn persist_chain(&self, state: &LedgerState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_chain(&state.chain) {
                log::error!("Failed to persist chain: {}", e);
            }
        }
    }

    fn persist_registry(&self, state: &LedgerState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_registry(&state.registry) {
                log::error!("Failed to persist validator registry: {}", e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────

    /// Queue a transaction for the next block. Balances are untouched.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash, NodeError> {
        if tx.is_system() {
            return Err(NodeError::ReservedSender(tx.sender));
        }
        if !tx.verify_id() {
            return Err(CoreError::InvalidHash(format!(
                "transaction id {} does not match its contents",
                tx.id
            ))
            .into());
        }
        let (sender, receiver, amount) = (tx.sender.clone(), tx.receiver.clone(), tx.amount);
        let id = self.lock().pool.add(tx)?;
        log::info!(
            "📝 Pending {} -> {} ({}) [{}]",
            sender,
            receiver,
            amount,
            short_hash(&id)
        );
        Ok(id)
    }

    pub fn submit_transfer(
        &self,
        sender: &str,
        receiver: &str,
        amount: Amount,
    ) -> Result<Hash, NodeError> {
        self.submit_transaction(Transaction::new(sender, receiver, amount, None))
    }

    /// Queue the one-off genesis mint unless a mint is already sealed or
    /// pending. Returns whether it was queued.
    pub fn seed_genesis_mint(&self, receiver: &str, amount: Amount) -> Result<bool, NodeError> {
        let mut state = self.lock();
        let sealed = state
            .chain
            .blocks()
            .iter()
            .any(|b| b.transactions.iter().any(Transaction::is_system));
        if sealed || state.pool.has_system_transaction() {
            log::debug!("Genesis mint already present, not queued again");
            return Ok(false);
        }
        state.pool.add(Transaction::mint(receiver, amount))?;
        log::info!("🌱 Genesis mint of {} to {} queued", amount, receiver);
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────
    // Block production
    // ─────────────────────────────────────────────────────────────

    /// Seal pending transactions into a block and broadcast it.
    ///
    /// `Ok(None)` when there is nothing acceptable to seal. Fails with
    /// `NoValidatorAvailable`, leaving all state untouched, when the
    /// registry cannot name a producer.
    pub async fn produce_block(&self) -> Result<Option<Block>, NodeError> {
        let block = {
            let mut guard = self.lock();
            let state = &mut *guard;

            if state.pool.is_empty() {
                log::debug!("Pending pool empty, nothing to seal");
                return Ok(None);
            }
            let producer = state
                .registry
                .select_validator(state.rng.as_mut())
                .ok_or(NodeError::NoValidatorAvailable)?;

            // Screen against a scratch copy so rejected transfers never
            // reach the sealed block.
            let mut scratch = state.balances.clone();
            let mut accepted = Vec::new();
            let mut discarded = 0;
            for tx in state.pool.take_all() {
                match scratch.apply(&tx) {
                    Ok(()) => accepted.push(tx),
                    Err(e) => {
                        discarded += 1;
                        log::warn!("⛔ Discarding transaction {}: {}", short_hash(&tx.id), e);
                    }
                }
            }
            state.pool.record_discarded(discarded);
            if accepted.is_empty() {
                log::info!("All {} pending transaction(s) rejected, no block sealed", discarded);
                return Ok(None);
            }

            let (index, parent) = {
                let tip = state.chain.tip();
                (tip.index + 1, tip.hash.clone())
            };
            let sealed = Block::new(index, parent, accepted.clone(), Some(producer.clone()))
                .and_then(|block| state.chain.push(block.clone()).map(|_| block));
            let block = match sealed {
                Ok(block) => block,
                Err(e) => {
                    state.pool.restore(accepted);
                    return Err(e.into());
                }
            };

            state.balances = scratch;
            state.pool.record_sealed(block.transactions.len());
            let payouts = state.registry.reward(&producer, self.options.block_reward);
            log::info!(
                "⛏️  Block #{} sealed by {} ({} tx) [{}]",
                block.index,
                producer,
                block.transactions.len(),
                short_hash(&block.hash)
            );
            for (delegator, share) in payouts {
                log::debug!("Delegation reward {} -> {}", share, delegator);
            }

            self.persist_chain(state);
            self.persist_registry(state);
            block
        };

        let delivered = self.transport.broadcast_block(&block).await;
        log::debug!(
            "Block #{} delivered to {}/{} peers",
            block.index,
            delivered,
            self.transport.peers().len()
        );
        Ok(Some(block))
    }

    /// Produce on a fixed interval until the task is dropped.
    pub async fn run_producer(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.produce_block().await {
                Ok(_) => {}
                Err(NodeError::NoValidatorAvailable) => {
                    log::debug!("No validator staked, skipping production");
                }
                Err(e) => log::warn!("Block production failed: {}", e),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Remote blocks & conflict resolution
    // ─────────────────────────────────────────────────────────────

    pub async fn receive_remote_block(&self, block: Block) -> ReceiveOutcome {
        if let Err(e) = block.verify_detailed() {
            log::warn!("Rejected remote block #{}: {}", block.index, e);
            return ReceiveOutcome::Rejected(e.to_string());
        }

        {
            let mut guard = self.lock();
            let state = &mut *guard;

            if state.chain.contains_hash(&block.hash)
                || state.speculative.iter().any(|b| b.hash == block.hash)
            {
                log::debug!("Ignoring known block #{}", block.index);
                return ReceiveOutcome::Duplicate;
            }

            if Self::extends_tip(&state.chain, &block) {
                let index = block.index;
                return match self.append_block(state, block) {
                    Ok(()) => {
                        self.persist_chain(state);
                        self.persist_registry(state);
                        ReceiveOutcome::Appended
                    }
                    Err(reason) => {
                        log::warn!("Rejected remote block #{}: {}", index, reason);
                        ReceiveOutcome::Rejected(reason)
                    }
                };
            }

            log::info!(
                "Remote block #{} does not extend tip #{}, holding it speculatively",
                block.index,
                state.chain.tip().index
            );
            state.speculative.push(block);
        }

        let adopted = self.resolve_conflicts().await;
        ReceiveOutcome::Speculative { adopted }
    }

    fn extends_tip(chain: &Chain, block: &Block) -> bool {
        let tip = chain.tip();
        block.previous_hash == tip.hash && block.index == tip.index + 1
    }

    /// Link a verified block onto the tip: apply its transactions, reward
    /// its producer and drop its transactions from the pool.
    fn append_block(&self, state: &mut LedgerState, block: Block) -> Result<(), String> {
        let mints = system_transactions(std::slice::from_ref(&block));
        if mints > 0 && system_transactions(state.chain.blocks()) + mints > MAX_SYSTEM_TRANSACTIONS
        {
            return Err(format!(
                "block carries {} mint(s) beyond the genesis mint",
                mints
            ));
        }
        state.chain.push(block.clone()).map_err(|e| e.to_string())?;

        for (tx, e) in state.balances.apply_all(&block.transactions) {
            log::warn!("Remote transaction {} not applied: {}", short_hash(&tx.id), e);
        }
        if let Some(producer) = &block.producer {
            state.registry.reward(producer, self.options.block_reward);
        }
        let sealed: BTreeSet<Hash> = block.transactions.iter().map(|tx| tx.id.clone()).collect();
        let cleared = state.pool.remove_sealed(&sealed);
        log::info!(
            "📦 Appended remote block #{} from {} ({} pending cleared)",
            block.index,
            block.producer.as_deref().unwrap_or("-"),
            cleared
        );
        Ok(())
    }

    /// Longest-chain rule against every peer.
    ///
    /// Adopts the longest peer chain strictly longer than the local chain;
    /// ties keep local. Afterwards any held speculative block that now
    /// links onto the tip is appended and the rest are dropped.
    /// Returns whether a peer chain was adopted.
    pub async fn resolve_conflicts(&self) -> bool {
        let local_len = self.lock().chain.len();

        let mut best: Option<(String, Vec<Block>)> = None;
        let mut best_len = local_len;
        for peer in self.transport.peers() {
            match self.transport.fetch_chain(&peer).await {
                Ok(blocks) => {
                    if blocks.len() <= best_len {
                        log::debug!("Peer {} chain length {} not longer", peer, blocks.len());
                        continue;
                    }
                    if self.options.verify_peer_chains {
                        if let Err(violation) = verify_chain_detailed(&blocks) {
                            log::warn!("Ignoring invalid chain from {}: {}", peer, violation);
                            continue;
                        }
                        if system_transactions(&blocks) > MAX_SYSTEM_TRANSACTIONS {
                            log::warn!("Ignoring chain from {}: more than one mint", peer);
                            continue;
                        }
                    }
                    best_len = blocks.len();
                    best = Some((peer, blocks));
                }
                Err(e) => log::warn!("Skipping peer {}: {}", peer, e),
            }
        }

        // Local state may have moved while peers were being asked.
        let mut guard = self.lock();
        let state = &mut *guard;
        let adopted = match best {
            Some((peer, blocks)) if blocks.len() > state.chain.len() => {
                self.adopt_chain(state, &peer, blocks);
                true
            }
            _ => false,
        };
        let attached = self.attach_speculative(state);
        if adopted || attached > 0 {
            self.persist_chain(state);
            self.persist_registry(state);
        }
        adopted
    }

    /// Replace the chain wholesale. Balances and rewards are replayed from
    /// the new chain; transactions from replaced blocks that the new chain
    /// does not carry go back to the front of the pool.
    fn adopt_chain(&self, state: &mut LedgerState, peer: &str, blocks: Vec<Block>) {
        let replaced = std::mem::replace(&mut state.chain, Chain::from_blocks_unchecked(blocks));
        self.rebuild_ledger(state);

        let sealed: BTreeSet<Hash> = state
            .chain
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        let dropped = state.pool.remove_sealed(&sealed);

        let requeue: Vec<Transaction> = replaced
            .into_blocks()
            .into_iter()
            .flat_map(|b| b.transactions)
            .filter(|tx| !tx.is_system() && !sealed.contains(&tx.id))
            .collect();
        let requeued = requeue.len();
        state.pool.restore(requeue);

        log::info!(
            "🔄 Adopted chain of {} blocks from {} ({} pending already sealed, {} requeued)",
            state.chain.len(),
            peer,
            dropped,
            requeued
        );
    }

    /// Recompute balances and the reward table from the current chain.
    fn rebuild_ledger(&self, state: &mut LedgerState) {
        state.balances.rebuild_from(state.chain.blocks());
        state.registry.clear_rewards();
        for block in state.chain.blocks() {
            if let Some(producer) = &block.producer {
                state.registry.reward(producer, self.options.block_reward);
            }
        }
    }

    /// Append held blocks that link onto the tip, in order, then drop the
    /// rest. Returns how many were appended.
    fn attach_speculative(&self, state: &mut LedgerState) -> usize {
        let mut attached = 0;
        while let Some(pos) = state
            .speculative
            .iter()
            .position(|b| Self::extends_tip(&state.chain, b))
        {
            let block = state.speculative.remove(pos);
            let index = block.index;
            match self.append_block(state, block) {
                Ok(()) => attached += 1,
                Err(reason) => log::warn!("Held block #{} not appended: {}", index, reason),
            }
        }
        if !state.speculative.is_empty() {
            log::info!(
                "Dropping {} unlinked block(s) after resolution",
                state.speculative.len()
            );
            state.speculative.clear();
        }
        attached
    }

    // ─────────────────────────────────────────────────────────────
    // Staking
    // ─────────────────────────────────────────────────────────────

    pub fn stake(&self, validator: &str, amount: Amount) -> Result<Amount, NodeError> {
        let mut state = self.lock();
        let total = state.registry.stake(validator, amount)?;
        log::info!("🔒 {} staked {} (now {})", validator, amount, total);
        self.persist_registry(&state);
        Ok(total)
    }

    /// Lenient delegation: an unknown validator is a logged no-op.
    pub fn delegate(&self, delegator: &str, validator: &str, amount: Amount) -> bool {
        let mut state = self.lock();
        let applied = state.registry.delegate(delegator, validator, amount);
        if applied {
            log::info!("🤝 {} delegated {} to {}", delegator, amount, validator);
            self.persist_registry(&state);
        }
        applied
    }

    pub fn try_delegate(
        &self,
        delegator: &str,
        validator: &str,
        amount: Amount,
    ) -> Result<Amount, NodeError> {
        let mut state = self.lock();
        let total = state.registry.try_delegate(delegator, validator, amount)?;
        self.persist_registry(&state);
        Ok(total)
    }

    pub fn register_validator(&self, validator: &str) -> bool {
        let mut state = self.lock();
        let added = state.registry.register(validator);
        if added {
            self.persist_registry(&state);
        }
        added
    }

    // ─────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn chain(&self) -> Vec<Block> {
        self.lock().chain.blocks().to_vec()
    }

    pub fn chain_len(&self) -> usize {
        self.lock().chain.len()
    }

    pub fn tip(&self) -> Block {
        self.lock().chain.tip().clone()
    }

    pub fn is_chain_valid(&self) -> bool {
        self.lock().chain.verify()
    }

    pub fn balances(&self) -> BTreeMap<String, Amount> {
        self.lock().balances.snapshot()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.lock().balances.balance_of(account)
    }

    pub fn validators(&self) -> Vec<ValidatorSummary> {
        self.lock().registry.summaries()
    }

    pub fn registry(&self) -> ValidatorRegistry {
        self.lock().registry.clone()
    }

    pub fn reward_of(&self, id: &str) -> Amount {
        self.lock().registry.reward_of(id)
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock().pool.snapshot()
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.lock();
        NodeStatus {
            node_id: self.node_id.clone(),
            height: state.chain.len(),
            tip_hash: state.chain.tip().hash.clone(),
            chain_valid: state.chain.verify(),
            validators: state.registry.len(),
            total_stake: state.registry.total_stake(),
            peers: self.transport.peers(),
            pool: state.pool.stats(),
            speculative: state.speculative.len(),
            persistent: self.store.is_some(),
        }
    }

    pub fn flush(&self) -> Result<(), NodeError> {
        match &self.store {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InboundHandler for LedgerService {
    async fn on_new_block(&self, block: Block) {
        let index = block.index;
        let outcome = self.receive_remote_block(block).await;
        log::debug!("Remote block #{} -> {:?}", index, outcome);
    }

    fn chain_snapshot(&self) -> Vec<Block> {
        self.chain()
    }
}
