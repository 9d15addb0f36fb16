// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - NODE
//
// Ledger service wiring: one mutex around chain, pending pool, balances
// and validator registry; peer transport for broadcast and chain pulls;
// optional sled persistence; operator console.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Mutex, MutexGuard};

pub mod config;
pub mod console;
pub mod error;
pub mod pool;
pub mod service;
pub mod store;

pub use config::{GenesisConfig, NodeConfig, ValidatorSeed};
pub use error::NodeError;
pub use pool::{PendingPool, PoolStats};
pub use service::{LedgerService, NodeStatus, ReceiveOutcome, ServiceOptions};
pub use store::ChainStore;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("⚠️ Mutex was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}

/// First 12 characters of a digest, for log lines.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
